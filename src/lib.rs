//! # ci-auth (Credential & Session Security)
//!
//! `ci-auth` authenticates users of the clinical intake platform with
//! first-party email/password credentials and guards the cookie sessions it
//! issues.
//!
//! ## Sessions
//!
//! A successful login mints a short-lived HS256 JWT carried in the
//! `ci_access_token` cookie and binds it to a server-side session row. The JWT
//! is only a capability hint: every authenticated request also touches the
//! session row (revocation, absolute expiry) and re-reads the account role.
//! A role that diverges from the token claim, in either direction, revokes the
//! session and the client must log in again.
//!
//! ## CSRF
//!
//! State-changing requests on cookie-authenticated routes must echo the token
//! from `GET /auth/csrf` in the `X-CSRF-Token` header. Only the SHA-256 of the
//! token is stored on the session row.
//!
//! ## Lockout & Rate Limits
//!
//! Five consecutive failed logins lock an account for 30 minutes. Locks are
//! evaluated lazily against stored timestamps; there are no unlock jobs.
//! Login and forgot-password are additionally rate limited with fixed windows
//! stored in the shared database, independent of lockout.
//!
//! ## Password Reset
//!
//! Reset tokens are opaque, single use and valid for at most one hour. Issuing
//! a token expires every outstanding token of the account. Consuming a token
//! rotates the credential, clears lockout state, and revokes all sessions in
//! one transaction.

pub mod api;
pub mod cli;
pub mod notify;
pub mod security;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
