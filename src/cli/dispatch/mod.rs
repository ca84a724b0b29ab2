//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret: auth_opts.jwt_secret,
        environment: auth_opts.environment,
        frontend_base_url: auth_opts.frontend_base_url,
        trust_proxy_headers: auth_opts.trust_proxy_headers,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        lockout_threshold: auth_opts.lockout_threshold,
        lockout_duration_seconds: auth_opts.lockout_duration_seconds,
        login_rate_limit: auth_opts.login_rate_limit,
        login_rate_window_seconds: auth_opts.login_rate_window_seconds,
        forgot_password_rate_limit: auth_opts.forgot_password_rate_limit,
        forgot_password_rate_window_seconds: auth_opts.forgot_password_rate_window_seconds,
        hash_workers: auth_opts.hash_workers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const DSN: &str = "postgres://user@localhost:5432/ci_auth";

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("CI_AUTH_DSN", Some(DSN)),
                ("CI_AUTH_JWT_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("CI_AUTH_ENVIRONMENT", Some("staging")),
                ("CI_AUTH_HASH_WORKERS", Some("8")),
                ("CI_AUTH_LOGIN_RATE_LIMIT", Some("20")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ci-auth"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, DSN);
                    assert_eq!(args.environment, "staging");
                    assert_eq!(args.hash_workers, 8);
                    assert_eq!(args.login_rate_limit, 20);
                    assert_eq!(args.login_rate_window_seconds, 900);
                    assert!(!args.trust_proxy_headers);
                    assert_eq!(
                        args.jwt_secret.expose_secret(),
                        "0123456789abcdef0123456789abcdef"
                    );
                }
            },
        );
    }

    #[test]
    fn trust_proxy_headers_from_env() {
        temp_env::with_vars(
            [
                ("CI_AUTH_DSN", Some(DSN)),
                ("CI_AUTH_JWT_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("CI_AUTH_TRUST_PROXY_HEADERS", Some("true")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ci-auth"]);
                let action = handler(&matches);
                assert!(matches!(
                    action,
                    Ok(Action::Server(Args {
                        trust_proxy_headers: true,
                        ..
                    }))
                ));
            },
        );
    }

    #[test]
    fn short_jwt_secret_rejected() {
        temp_env::with_vars(
            [
                ("CI_AUTH_DSN", Some(DSN)),
                ("CI_AUTH_JWT_SECRET", Some("too-short")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ci-auth"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--jwt-secret must be at least"));
                }
            },
        );
    }
}
