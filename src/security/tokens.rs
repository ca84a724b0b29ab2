//! Access token minting and stateless validation.
//!
//! Tokens are HS256 JWTs carrying the role at issuance time and the id of the
//! session row they belong to. Validation checks signature and expiry only;
//! the session and role checks against the store happen afterwards in the
//! request pipeline.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use super::account::{Account, Role, Session};
use super::error::AuthError;

pub const ACCESS_COOKIE_NAME: &str = "ci_access_token";
const DEFAULT_TTL_SECONDS: i64 = 15 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// A freshly minted token and the cookie lifetime that goes with it.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_age_seconds: i64,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    cookie_secure: bool,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .field("cookie_secure", &self.cookie_secure)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            ttl: Duration::seconds(DEFAULT_TTL_SECONDS),
            cookie_secure: true,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl = Duration::seconds(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// # Errors
    /// Returns an internal error if signing fails.
    pub fn issue(
        &self,
        account: &Account,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: account.id,
            email: account.email.clone(),
            role: account.role,
            sid: session.id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("failed to sign token: {err}")))?;
        Ok(IssuedToken {
            token,
            expires_at,
            max_age_seconds: self.ttl.num_seconds(),
        })
    }

    /// Signature and expiry only. Every failure is the same `unauthenticated`.
    ///
    /// # Errors
    /// Returns `AuthError::Unauthenticated` for malformed, forged or expired tokens.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<AccessClaims>(token, &self.decoding, &validation).map_err(|err| {
            debug!("Rejected access token: {err}");
            AuthError::Unauthenticated
        })?;

        if now.timestamp() >= data.claims.exp {
            debug!("Rejected expired access token");
            return Err(AuthError::Unauthenticated);
        }
        Ok(data.claims)
    }

    #[must_use]
    pub fn cookie(&self, issued: &IssuedToken) -> String {
        let mut cookie = format!(
            "{ACCESS_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            issued.token, issued.max_age_seconds
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    #[must_use]
    pub fn clear_cookie(&self) -> String {
        let mut cookie = format!("{ACCESS_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
