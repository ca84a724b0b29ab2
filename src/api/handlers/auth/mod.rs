//! Auth handlers and supporting modules.
//!
//! ## Session model
//!
//! Login returns a short-lived HS256 access token in the `ci_access_token`
//! `HttpOnly` cookie. The token names a server-side session (`sid`), so a
//! session can be revoked before the token expires. Every authenticated
//! request re-reads the account and revokes the session if its role no longer
//! matches the token claim.
//!
//! ## CSRF
//!
//! State-changing requests must echo the token from `GET /auth/csrf` in the
//! `X-CSRF-Token` header. Only its SHA-256 is stored, on the session row.
//!
//! ## Rate Limiting
//!
//! - **Login:** 10 attempts per `(email, ip)` per 15 minutes.
//! - **Forgot password:** 5 requests per ip per 15 minutes.
//! - **Lockout:** 5 consecutive failures lock the account for 30 minutes,
//!   independently of the rate limiter.

pub(crate) mod csrf;
pub(crate) mod login;
pub(crate) mod password_reset;
pub(crate) mod principal;
pub(crate) mod session;
mod state;
pub(crate) mod types;
pub(crate) mod utils;

pub use state::{AuthConfig, AuthState};
