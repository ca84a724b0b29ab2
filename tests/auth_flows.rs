//! End-to-end flows through the public router against the in-memory store.
//!
//! 1. Sign in, fetch a CSRF token, call a protected route, sign out.
//! 2. Forgot password, follow the emailed link, sign in with the new password.
//! 3. An admin provisions an account whose owner signs in with the emailed
//!    temporary password.

use anyhow::{Context, Result, bail};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderMap, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
};
use chrono::{TimeZone, Utc};
use ci_auth::{
    api::{self, AuthConfig, AuthState},
    notify::{ACCOUNT_CREDENTIALS_TEMPLATE, MemoryOutbox, PASSWORD_RESET_TEMPLATE},
    security::{
        Role,
        account::NewAccount,
        clock::{Clock, ManualClock},
        hasher::PasswordHasher,
    },
    store::{AccountRepository, MemoryStore},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

const PASSWORD: &str = "Intake-Desk-2026";

struct Service {
    app: Router,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    outbox: Arc<MemoryOutbox>,
    hasher: PasswordHasher,
}

impl Service {
    async fn start() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 11, 7, 30, 0)
                .single()
                .context("valid start time")?,
        ));
        let outbox = Arc::new(MemoryOutbox::new());
        let hasher = PasswordHasher::with_params(1024, 1, 1, 2)?;
        let config = AuthConfig::new(
            SecretString::from("integration-secret-0123456789abcdef"),
            "https://intake.example.org".to_string(),
        )
        .with_cookie_secure(false);
        let state = AuthState::new(
            config,
            store.clone(),
            hasher.clone(),
            outbox.clone(),
            clock.clone(),
        )
        .await?;
        Ok(Self {
            app: api::app(Arc::new(state))?,
            store,
            clock,
            outbox,
            hasher,
        })
    }

    async fn seed(&self, email: &str, role: Role) -> Result<()> {
        self.store
            .insert_account(
                NewAccount {
                    email: email.to_string(),
                    password_hash: self.hasher.hash(PASSWORD).await?,
                    role,
                },
                self.clock.now(),
            )
            .await?
            .context("seed account")?;
        Ok(())
    }

    async fn call(&self, request: Request<Body>) -> Result<(StatusCode, HeaderMap, Value)> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, headers, body))
    }

    async fn post(
        &self,
        uri: &str,
        body: &Value,
        session: Option<(&str, &str)>,
    ) -> Result<(StatusCode, HeaderMap, Value)> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some((cookie, csrf)) = session {
            builder = builder.header(COOKIE, cookie).header("x-csrf-token", csrf);
        }
        self.call(builder.body(Body::from(body.to_string()))?).await
    }

    async fn get(&self, uri: &str, cookie: &str) -> Result<(StatusCode, HeaderMap, Value)> {
        self.call(
            Request::builder()
                .uri(uri)
                .header(COOKIE, cookie)
                .body(Body::empty())?,
        )
        .await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        let (status, headers, body) = self
            .post(
                "/auth/login",
                &json!({"email": email, "password": password}),
                None,
            )
            .await?;
        if status != StatusCode::OK {
            bail!("login failed: {status} {body}");
        }
        let set_cookie = headers.get(SET_COOKIE).context("set-cookie")?.to_str()?;
        set_cookie
            .split(';')
            .next()
            .map(|pair| pair.trim().to_string())
            .context("cookie pair")
    }

    async fn csrf(&self, cookie: &str) -> Result<String> {
        let (status, _, body) = self.get("/auth/csrf", cookie).await?;
        assert_eq!(status, StatusCode::OK);
        body["token"]
            .as_str()
            .map(str::to_string)
            .context("csrf token")
    }

    async fn wait_for_email(&self, template: &str) -> Result<Value> {
        for _ in 0..200 {
            if let Some(message) = self
                .outbox
                .messages()
                .into_iter()
                .find(|message| message.template == template)
            {
                return Ok(serde_json::from_str(&message.payload_json)?);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("no {template} email delivered")
    }
}

#[tokio::test]
async fn sign_in_csrf_and_sign_out() -> Result<()> {
    let service = Service::start().await?;
    service.seed("triage@example.org", Role::Standard).await?;

    let cookie = service.sign_in("triage@example.org", PASSWORD).await?;
    let (status, _, body) = service.get("/auth/me", &cookie).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "triage@example.org");

    let csrf = service.csrf(&cookie).await?;
    let (status, _, body) = service
        .post("/auth/logout", &json!({}), Some((&cookie, "forged")))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "csrf_token_invalid");

    let (status, _, _) = service
        .post("/auth/logout", &json!({}), Some((&cookie, &csrf)))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = service.get("/auth/me", &cookie).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthenticated");
    Ok(())
}

#[tokio::test]
async fn forgot_password_link_sets_new_password() -> Result<()> {
    let service = Service::start().await?;
    service.seed("records@example.org", Role::Standard).await?;
    let old_cookie = service.sign_in("records@example.org", PASSWORD).await?;

    let (status, _, _) = service
        .post(
            "/auth/forgot-password",
            &json!({"email": "records@example.org"}),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let payload = service.wait_for_email(PASSWORD_RESET_TEMPLATE).await?;
    let reset_url = payload["resetUrl"].as_str().context("resetUrl")?;
    assert!(reset_url.starts_with("https://intake.example.org/reset-password#token="));
    let token = reset_url
        .split_once("#token=")
        .map(|(_, token)| token.to_string())
        .context("token fragment")?;

    let (status, _, body) = service
        .call(
            Request::builder()
                .uri(format!("/auth/reset-password/validate?token={token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let new_password = "Fresh-Chart-2026";
    let (status, _, _) = service
        .post(
            "/auth/reset-password",
            &json!({"token": token, "newPassword": new_password}),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = service.get("/auth/me", &old_cookie).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = service
        .post(
            "/auth/login",
            &json!({"email": "records@example.org", "password": PASSWORD}),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "invalid_credentials");

    let cookie = service.sign_in("records@example.org", new_password).await?;
    let (status, _, _) = service.get("/auth/me", &cookie).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn admin_provisioned_account_signs_in_with_emailed_password() -> Result<()> {
    let service = Service::start().await?;
    service.seed("lead@example.org", Role::Admin).await?;

    let admin_cookie = service.sign_in("lead@example.org", PASSWORD).await?;
    let csrf = service.csrf(&admin_cookie).await?;
    let (status, _, body) = service
        .post(
            "/admin/accounts",
            &json!({"email": "Intake.Clerk@example.org"}),
            Some((&admin_cookie, &csrf)),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["account"]["email"], "intake.clerk@example.org");
    assert_eq!(body["account"]["role"], "standard");
    assert_eq!(body["credentialsSent"], true);
    assert!(!body.to_string().contains("temporaryPassword"));

    let payload = service.wait_for_email(ACCOUNT_CREDENTIALS_TEMPLATE).await?;
    let temporary = payload["temporaryPassword"]
        .as_str()
        .context("temporaryPassword")?;

    let cookie = service.sign_in("intake.clerk@example.org", temporary).await?;
    let (status, _, body) = service.get("/auth/me", &cookie).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "standard");

    let (status, _, body) = service.get("/admin/audit-events", &cookie).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
    Ok(())
}
