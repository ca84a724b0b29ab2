//! Auth configuration and the component graph shared by every handler.

use anyhow::Result;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use crate::notify::EmailSender;
use crate::security::{
    audit::AuditLogger,
    clock::Clock,
    credentials::CredentialValidator,
    csrf::CsrfGuard,
    hasher::PasswordHasher,
    lockout::LockoutPolicy,
    rate_limit::{RateLimitRule, RateLimiter},
    reset::PasswordResetTokenStore,
    role_guard::RoleConsistencyGuard,
    sessions::SessionStore,
    tokens::TokenIssuer,
};
use crate::store::AuthStore;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_LOCKOUT_THRESHOLD: i32 = 5;
const DEFAULT_LOCKOUT_DURATION_SECONDS: i64 = 30 * 60;
const DEFAULT_HASH_WORKERS: usize = 4;
const DEFAULT_AUDIT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_LOGIN_RATE_LIMIT: RateLimitRule = RateLimitRule::new(10, 15 * 60);
const DEFAULT_FORGOT_PASSWORD_RATE_LIMIT: RateLimitRule = RateLimitRule::new(5, 15 * 60);

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    frontend_base_url: String,
    cookie_secure: bool,
    access_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    lockout_threshold: i32,
    lockout_duration_seconds: i64,
    login_rate_limit: RateLimitRule,
    forgot_password_rate_limit: RateLimitRule,
    hash_workers: usize,
    audit_write_timeout: Duration,
    trust_proxy_headers: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString, frontend_base_url: String) -> Self {
        Self {
            jwt_secret,
            frontend_base_url,
            cookie_secure: true,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_duration_seconds: DEFAULT_LOCKOUT_DURATION_SECONDS,
            login_rate_limit: DEFAULT_LOGIN_RATE_LIMIT,
            forgot_password_rate_limit: DEFAULT_FORGOT_PASSWORD_RATE_LIMIT,
            hash_workers: DEFAULT_HASH_WORKERS,
            audit_write_timeout: DEFAULT_AUDIT_WRITE_TIMEOUT,
            trust_proxy_headers: false,
        }
    }

    /// Drop the `Secure` cookie attribute (plain-HTTP local development).
    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_seconds(mut self, seconds: i64) -> Self {
        self.lockout_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.login_rate_limit = rule;
        self
    }

    #[must_use]
    pub fn with_forgot_password_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.forgot_password_rate_limit = rule;
        self
    }

    #[must_use]
    pub fn with_hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_audit_write_timeout(mut self, timeout: Duration) -> Self {
        self.audit_write_timeout = timeout;
        self
    }

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`. Only
    /// enable behind a reverse proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn hash_workers(&self) -> usize {
        self.hash_workers
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    #[must_use]
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new()
            .with_threshold(self.lockout_threshold)
            .with_duration_seconds(self.lockout_duration_seconds)
    }
}

/// Built once at boot; cloned behind an `Arc` into every request.
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn EmailSender>,
    hasher: PasswordHasher,
    tokens: TokenIssuer,
    sessions: SessionStore,
    csrf: CsrfGuard,
    credentials: CredentialValidator,
    role_guard: RoleConsistencyGuard,
    resets: PasswordResetTokenStore,
    rate_limiter: RateLimiter,
    audit: AuditLogger,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the login validator cannot prepare its dummy hash.
    pub async fn new(
        config: AuthConfig,
        store: Arc<dyn AuthStore>,
        hasher: PasswordHasher,
        notifier: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let audit = AuditLogger::new(store.clone(), clock.clone())
            .with_write_timeout(config.audit_write_timeout);
        let tokens = TokenIssuer::new(&config.jwt_secret)
            .with_ttl_seconds(config.access_token_ttl_seconds)
            .with_cookie_secure(config.cookie_secure);
        let sessions =
            SessionStore::new(store.clone()).with_ttl_seconds(config.session_ttl_seconds);
        let csrf = CsrfGuard::new(sessions.clone());
        let credentials = CredentialValidator::new(
            store.clone(),
            hasher.clone(),
            config.lockout_policy(),
            sessions.clone(),
            tokens.clone(),
            audit.clone(),
        )
        .await?;
        let role_guard = RoleConsistencyGuard::new(store.clone(), sessions.clone(), audit.clone());
        let resets = PasswordResetTokenStore::new(store.clone(), hasher.clone(), audit.clone())
            .with_ttl_seconds(config.reset_token_ttl_seconds);
        let rate_limiter = RateLimiter::new(
            store.clone(),
            config.login_rate_limit,
            config.forgot_password_rate_limit,
        );

        Ok(Self {
            config,
            store,
            clock,
            notifier,
            hasher,
            tokens,
            sessions,
            csrf,
            credentials,
            role_guard,
            resets,
            rate_limiter,
            audit,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn EmailSender> {
        &self.notifier
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn credentials(&self) -> &CredentialValidator {
        &self.credentials
    }

    pub fn role_guard(&self) -> &RoleConsistencyGuard {
        &self.role_guard
    }

    pub fn resets(&self) -> &PasswordResetTokenStore {
        &self.resets
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}
