//! Postgres implementation of the auth store.
//!
//! Atomic units:
//! - failure increment + lock: one `UPDATE … RETURNING`
//! - success reset: one `UPDATE` guarded on the lock state
//! - reset issuance: transaction holding the account row lock
//! - reset consumption: transaction with `SELECT … FOR UPDATE` on the token
//!   and account rows
//! - rate-limit increment: `INSERT … ON CONFLICT DO UPDATE … RETURNING`

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use super::{
    AccountRepository, AuditRepository, AuthStore, ConsumeOutcome, RateLimitRepository,
    ResetTokenRepository, SessionRepository,
};
use crate::security::{
    account::{Account, AccountStatus, AccountUpdate, NewAccount, ResetToken, Role, Session},
    audit::{AuditAction, AuditEvent, AuditFilter},
    lockout::{FailureOutcome, LockoutPolicy},
};

macro_rules! account_columns {
    () => {
        "id, email, password_hash, role, status, failed_login_attempts, locked_until, deleted_at, created_at, updated_at"
    };
}

macro_rules! session_columns {
    () => {
        "id, account_id, csrf_hash, created_at, expires_at, last_activity_at, revoked_at"
    };
}

macro_rules! reset_token_columns {
    () => {
        "id, account_id, token_hash, created_at, expires_at, used_at"
    };
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::from_db(&role).ok_or_else(|| anyhow!("unknown role: {role}"))?,
        status: AccountStatus::from_db(&status)
            .ok_or_else(|| anyhow!("unknown account status: {status}"))?,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        locked_until: row.try_get("locked_until")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        csrf_hash: row.try_get("csrf_hash")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

fn reset_token_from_row(row: &PgRow) -> Result<ResetToken> {
    Ok(ResetToken {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        token_hash: row.try_get("token_hash")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        used_at: row.try_get("used_at")?,
    })
}

fn audit_event_from_row(row: &PgRow) -> Result<AuditEvent> {
    let action: String = row.try_get("action")?;
    Ok(AuditEvent {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        action: AuditAction::from_db(&action)
            .ok_or_else(|| anyhow!("unknown audit action: {action}"))?,
        resource: row.try_get("resource")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        const QUERY: &str = concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE email = $1"
        );
        let row = sqlx::query(QUERY)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", QUERY))
            .await
            .context("failed to lookup account by email")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        const QUERY: &str = concat!("SELECT ", account_columns!(), " FROM accounts WHERE id = $1");
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", QUERY))
            .await
            .context("failed to lookup account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_account(
        &self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        const QUERY: &str = concat!(
            "INSERT INTO accounts (id, email, password_hash, role, status, created_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, 'active', $5, $5) ",
            "ON CONFLICT DO NOTHING RETURNING ",
            account_columns!()
        );
        let row = sqlx::query(QUERY)
            .bind(Uuid::now_v7())
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", QUERY))
            .await
            .context("failed to insert account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        const QUERY: &str = concat!(
            "UPDATE accounts SET role = COALESCE($2, role), status = COALESCE($3, status), ",
            "updated_at = $4 WHERE id = $1 RETURNING ",
            account_columns!()
        );
        let row = sqlx::query(QUERY)
            .bind(id)
            .bind(update.role.map(Role::as_str))
            .bind(update.status.map(AccountStatus::as_str))
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to update account")?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn record_login_failure(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>> {
        // SET expressions see the pre-update row, hence `+ 1` in the CASE.
        const QUERY: &str = r"
            UPDATE accounts
            SET failed_login_attempts = failed_login_attempts + 1,
                locked_until = CASE
                    WHEN failed_login_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END,
                updated_at = $4
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
        ";
        let row = sqlx::query(QUERY)
            .bind(id)
            .bind(policy.threshold())
            .bind(policy.lock_expiry(now))
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to record login failure")?;
        row.map(|row| -> Result<FailureOutcome> {
            Ok(FailureOutcome {
                failed_attempts: row.try_get("failed_login_attempts")?,
                locked_until: row.try_get("locked_until")?,
            })
        })
        .transpose()
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        const QUERY: &str = r"
            UPDATE accounts
            SET failed_login_attempts = 0, locked_until = NULL, updated_at = $2
            WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2)
        ";
        let result = sqlx::query(QUERY)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to record login success")?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        const QUERY: &str = r"
            INSERT INTO sessions
                (id, account_id, csrf_hash, created_at, expires_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(QUERY)
            .bind(session.id)
            .bind(session.account_id)
            .bind(&session.csrf_hash)
            .bind(session.created_at)
            .bind(session.expires_at)
            .bind(session.last_activity_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", QUERY))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        const QUERY: &str = concat!("SELECT ", session_columns!(), " FROM sessions WHERE id = $1");
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", QUERY))
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn touch_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Session>> {
        const QUERY: &str = concat!(
            "UPDATE sessions SET last_activity_at = $2 ",
            "WHERE id = $1 AND revoked_at IS NULL AND expires_at > $2 RETURNING ",
            session_columns!()
        );
        let row = sqlx::query(QUERY)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to touch session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn set_csrf_hash(&self, id: Uuid, csrf_hash: &[u8], now: DateTime<Utc>) -> Result<bool> {
        const QUERY: &str = r"
            UPDATE sessions SET csrf_hash = $2
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > $3
        ";
        let result = sqlx::query(QUERY)
            .bind(id)
            .bind(csrf_hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to store csrf hash")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        const QUERY: &str =
            "UPDATE sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL";
        let result = sqlx::query(QUERY)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_account_sessions(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        const QUERY: &str =
            "UPDATE sessions SET revoked_at = $2 WHERE account_id = $1 AND revoked_at IS NULL";
        let result = sqlx::query(QUERY)
            .bind(account_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", QUERY))
            .await
            .context("failed to revoke account sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ResetTokenRepository for PgStore {
    async fn issue_reset_token(&self, token: &ResetToken, now: DateTime<Utc>) -> Result<u64> {
        const LOCK: &str = "SELECT id FROM accounts WHERE id = $1 FOR UPDATE";
        const EXPIRE: &str = r"
            UPDATE password_reset_tokens SET expires_at = $2
            WHERE account_id = $1 AND used_at IS NULL AND expires_at > $2
        ";
        const INSERT: &str = concat!(
            "INSERT INTO password_reset_tokens (",
            reset_token_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, NULL)"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin reset issuance transaction")?;

        // Serializes concurrent issuance for the same account.
        sqlx::query(LOCK)
            .bind(token.account_id)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", LOCK))
            .await
            .context("failed to lock account for reset issuance")?;

        let expired = sqlx::query(EXPIRE)
            .bind(token.account_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", EXPIRE))
            .await
            .context("failed to expire outstanding reset tokens")?
            .rows_affected();

        sqlx::query(INSERT)
            .bind(token.id)
            .bind(token.account_id)
            .bind(&token.token_hash)
            .bind(token.created_at)
            .bind(token.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", INSERT))
            .await
            .context("failed to insert reset token")?;

        tx.commit()
            .await
            .context("commit reset issuance transaction")?;
        Ok(expired)
    }

    async fn find_reset_token(&self, token_hash: &[u8]) -> Result<Option<ResetToken>> {
        const QUERY: &str = concat!(
            "SELECT ",
            reset_token_columns!(),
            " FROM password_reset_tokens WHERE token_hash = $1"
        );
        let row = sqlx::query(QUERY)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", QUERY))
            .await
            .context("failed to lookup reset token")?;
        row.as_ref().map(reset_token_from_row).transpose()
    }

    async fn consume_reset_token(
        &self,
        token_hash: &[u8],
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        const LOCK_TOKEN: &str = concat!(
            "SELECT ",
            reset_token_columns!(),
            " FROM password_reset_tokens WHERE token_hash = $1 FOR UPDATE"
        );
        const LOCK_ACCOUNT: &str = concat!(
            "SELECT ",
            account_columns!(),
            " FROM accounts WHERE id = $1 FOR UPDATE"
        );
        const UPDATE_ACCOUNT: &str = r"
            UPDATE accounts
            SET password_hash = $2, failed_login_attempts = 0, locked_until = NULL, updated_at = $3
            WHERE id = $1
        ";
        const MARK_USED: &str = "UPDATE password_reset_tokens SET used_at = $2 WHERE id = $1";
        const REVOKE_SESSIONS: &str =
            "UPDATE sessions SET revoked_at = $2 WHERE account_id = $1 AND revoked_at IS NULL";

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin reset consume transaction")?;

        let token = sqlx::query(LOCK_TOKEN)
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", LOCK_TOKEN))
            .await
            .context("failed to lock reset token")?;
        let Some(token) = token.as_ref().map(reset_token_from_row).transpose()? else {
            return Ok(ConsumeOutcome::Invalid);
        };
        // Dropping `tx` without commit rolls back.
        if token.is_expired(now) {
            return Ok(ConsumeOutcome::Expired);
        }
        if token.used_at.is_some() {
            return Ok(ConsumeOutcome::Used);
        }

        let account = sqlx::query(LOCK_ACCOUNT)
            .bind(token.account_id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", LOCK_ACCOUNT))
            .await
            .context("failed to lock account for reset")?;
        let Some(account) = account.as_ref().map(account_from_row).transpose()? else {
            return Ok(ConsumeOutcome::Invalid);
        };
        if !account.is_usable() {
            return Ok(ConsumeOutcome::AccountInactive);
        }

        sqlx::query(UPDATE_ACCOUNT)
            .bind(account.id)
            .bind(password_hash)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", UPDATE_ACCOUNT))
            .await
            .context("failed to update credential")?;

        sqlx::query(MARK_USED)
            .bind(token.id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", MARK_USED))
            .await
            .context("failed to mark reset token used")?;

        let sessions_revoked = sqlx::query(REVOKE_SESSIONS)
            .bind(account.id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", REVOKE_SESSIONS))
            .await
            .context("failed to revoke sessions after reset")?
            .rows_affected();

        tx.commit()
            .await
            .context("commit reset consume transaction")?;

        Ok(ConsumeOutcome::Consumed {
            account_id: account.id,
            sessions_revoked,
        })
    }
}

#[async_trait]
impl RateLimitRepository for PgStore {
    async fn increment_rate_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64> {
        const QUERY: &str = r"
            WITH pruned AS (
                DELETE FROM rate_limit_counters
                WHERE window_end < $2 AND key <> $1
            )
            INSERT INTO rate_limit_counters (key, window_start, window_end, count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (key) DO UPDATE SET
                count = CASE
                    WHEN rate_limit_counters.window_start >= EXCLUDED.window_start
                        THEN rate_limit_counters.count + 1
                    ELSE 1
                END,
                window_end = CASE
                    WHEN rate_limit_counters.window_start >= EXCLUDED.window_start
                        THEN rate_limit_counters.window_end
                    ELSE EXCLUDED.window_end
                END,
                window_start = GREATEST(rate_limit_counters.window_start, EXCLUDED.window_start)
            RETURNING count
        ";
        let row = sqlx::query(QUERY)
            .bind(key)
            .bind(window_start)
            .bind(window_end)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", QUERY))
            .await
            .context("failed to increment rate limit counter")?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        const QUERY: &str = r"
            INSERT INTO audit_events (id, actor, action, resource, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(QUERY)
            .bind(event.id)
            .bind(event.actor)
            .bind(event.action.as_str())
            .bind(&event.resource)
            .bind(&event.metadata)
            .bind(event.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", QUERY))
            .await
            .context("failed to append audit event")?;
        Ok(())
    }

    async fn list_audit_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        const QUERY: &str = r"
            SELECT id, actor, action, resource, metadata, created_at
            FROM audit_events
            WHERE ($1::text IS NULL OR action = $1)
              AND ($2::uuid IS NULL OR actor = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
        ";
        let rows = sqlx::query(QUERY)
            .bind(filter.action.map(AuditAction::as_str))
            .bind(filter.actor)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", QUERY))
            .await
            .context("failed to list audit events")?;
        rows.iter().map(audit_event_from_row).collect()
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}
