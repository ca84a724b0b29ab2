use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, builder::PossibleValuesParser};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

const MIN_JWT_SECRET_LEN: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_auth_identity_args(command);
    let command = with_auth_ttl_args(command);
    let command = with_lockout_args(command);
    let command = with_rate_limit_args(command);
    command.arg(
        Arg::new("hash-workers")
            .long("hash-workers")
            .help("Maximum concurrent Argon2 hash/verify operations")
            .env("CI_AUTH_HASH_WORKERS")
            .default_value("4")
            .value_parser(clap::value_parser!(usize)),
    )
}

fn with_auth_identity_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 signing secret for access tokens (at least 32 bytes)")
                .env("CI_AUTH_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment; cookies are Secure outside of local")
                .env("CI_AUTH_ENVIRONMENT")
                .default_value("production")
                .value_parser(PossibleValuesParser::new(["local", "staging", "production"])),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for reset links and the CORS origin")
                .env("CI_AUTH_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Take the client IP from X-Forwarded-For/X-Real-IP (only behind a reverse proxy)")
                .env("CI_AUTH_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

fn with_auth_ttl_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token TTL in seconds")
                .env("CI_AUTH_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Absolute server-side session lifetime in seconds")
                .env("CI_AUTH_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds (at most one hour)")
                .env("CI_AUTH_RESET_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..=3600)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Consecutive failed logins before the account locks")
                .env("CI_AUTH_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(i32).range(1..)),
        )
        .arg(
            Arg::new("lockout-duration-seconds")
                .long("lockout-duration-seconds")
                .help("Lock duration in seconds")
                .env("CI_AUTH_LOCKOUT_DURATION_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-rate-limit")
                .long("login-rate-limit")
                .help("Login attempts allowed per (email, ip) per window")
                .env("CI_AUTH_LOGIN_RATE_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("login-rate-window-seconds")
                .long("login-rate-window-seconds")
                .help("Login rate-limit window in seconds")
                .env("CI_AUTH_LOGIN_RATE_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("forgot-password-rate-limit")
                .long("forgot-password-rate-limit")
                .help("Forgot-password requests allowed per ip per window")
                .env("CI_AUTH_FORGOT_PASSWORD_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("forgot-password-rate-window-seconds")
                .long("forgot-password-rate-window-seconds")
                .help("Forgot-password rate-limit window in seconds")
                .env("CI_AUTH_FORGOT_PASSWORD_RATE_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
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

impl Options {
    /// Parse auth options from CLI matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or the JWT secret is too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("--jwt-secret must be at least {MIN_JWT_SECRET_LEN} bytes");
        }

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            environment: string(matches, ARG_ENVIRONMENT)?,
            frontend_base_url: string(matches, ARG_FRONTEND_BASE_URL)?,
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
            access_token_ttl_seconds: value(matches, "access-token-ttl-seconds")?,
            session_ttl_seconds: value(matches, "session-ttl-seconds")?,
            reset_token_ttl_seconds: value(matches, "reset-token-ttl-seconds")?,
            lockout_threshold: value(matches, "lockout-threshold")?,
            lockout_duration_seconds: value(matches, "lockout-duration-seconds")?,
            login_rate_limit: value(matches, "login-rate-limit")?,
            login_rate_window_seconds: value(matches, "login-rate-window-seconds")?,
            forgot_password_rate_limit: value(matches, "forgot-password-rate-limit")?,
            forgot_password_rate_window_seconds: value(
                matches,
                "forgot-password-rate-window-seconds",
            )?,
            hash_workers: value(matches, "hash-workers")?,
        })
    }
}

fn string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn value<T: Copy + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .copied()
        .with_context(|| format!("missing required argument: --{id}"))
}
