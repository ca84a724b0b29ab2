use crate::{
    api::{self, AuthConfig},
    cli::telemetry,
    security::rate_limit::RateLimitRule,
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub environment: String,
    pub frontend_base_url: String,
    pub trust_proxy_headers: bool,
    pub access_token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub lockout_threshold: i32,
    pub lockout_duration_seconds: i64,
    pub login_rate_limit: i64,
    pub login_rate_window_seconds: i64,
    pub forgot_password_rate_limit: i64,
    pub forgot_password_rate_window_seconds: i64,
    pub hash_workers: usize,
}

impl Args {
    /// Translate CLI arguments into the runtime auth configuration.
    /// Cookies are only marked `Secure` outside of `local`.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.jwt_secret.clone(), self.frontend_base_url.clone())
            .with_cookie_secure(self.environment != "local")
            .with_trust_proxy_headers(self.trust_proxy_headers)
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_reset_token_ttl_seconds(self.reset_token_ttl_seconds)
            .with_lockout_threshold(self.lockout_threshold)
            .with_lockout_duration_seconds(self.lockout_duration_seconds)
            .with_login_rate_limit(RateLimitRule::new(
                self.login_rate_limit,
                self.login_rate_window_seconds,
            ))
            .with_forgot_password_rate_limit(RateLimitRule::new(
                self.forgot_password_rate_limit,
                self.forgot_password_rate_window_seconds,
            ))
            .with_hash_workers(self.hash_workers)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config();
    debug!(
        environment = %args.environment,
        cookie_secure = auth_config.cookie_secure(),
        trust_proxy_headers = auth_config.trust_proxy_headers(),
        hash_workers = auth_config.hash_workers(),
        "Auth configuration loaded"
    );
    info!(port = args.port, "Starting ci-auth");

    let result = api::new(args.port, args.dsn, auth_config).await;
    telemetry::shutdown_tracer();
    result
}
