//! Credential and session security components.
//!
//! Leaf first: hashing, rate limiting, lockout, reset tokens, sessions, then
//! the orchestrating validator and the per-request guards. All of them share
//! one [`crate::store::AuthStore`] and read time from a [`clock::Clock`].

pub mod account;
pub mod audit;
pub mod clock;
pub mod credentials;
pub mod crypto;
pub mod csrf;
pub mod error;
pub mod hasher;
pub mod lockout;
pub mod password_policy;
pub mod rate_limit;
pub mod reset;
pub mod role_guard;
pub mod sessions;
pub mod tokens;

pub use account::{Account, AccountStatus, Role, Session};
pub use error::AuthError;
