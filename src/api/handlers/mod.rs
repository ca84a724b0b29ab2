//! HTTP handlers for ci-auth.
//!
//! Every handler receives the shared [`auth::AuthState`] through an
//! `Extension` layer and returns either a response or an
//! [`crate::security::AuthError`], rendered by [`crate::api::error`].

pub mod admin;
pub mod auth;
pub mod health;
pub mod root;
