//! Ledger Store Module
//!
//! PostgreSQL connection pooling via deadpool-postgres plus the ledger
//! operations every other component builds on: account rows, usage events,
//! processed billing events, and context snapshots.
//!
//! All multi-row updates that must land together (debits, reconciliation)
//! run inside explicit transactions; single reads go straight through the
//! pool.

use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::NoTls;

use latchkey_core::{
    AccessCode, Account, BillingStatus, ContextPayload, ContextSnapshot, PlanTier, UsageOutcome,
    UsageRecord, WindowedUsage,
};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "latchkey".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("LATCHKEY_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("LATCHKEY_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("LATCHKEY_DB_NAME").unwrap_or_else(|_| "latchkey".to_string()),
            user: std::env::var("LATCHKEY_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("LATCHKEY_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LATCHKEY_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("LATCHKEY_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Idempotent schema bootstrap, applied at startup.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    access_code     TEXT PRIMARY KEY,
    plan            TEXT NOT NULL,
    billing_status  TEXT NOT NULL,
    billing_ref     TEXT UNIQUE,
    is_enabled      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMPTZ NOT NULL,
    last_activity   TIMESTAMPTZ,
    total_requests  BIGINT NOT NULL DEFAULT 0,
    total_tokens    BIGINT NOT NULL DEFAULT 0,
    total_cost      DOUBLE PRECISION NOT NULL DEFAULT 0,
    last_event_at   TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS usage_events (
    id             BIGSERIAL PRIMARY KEY,
    access_code    TEXT NOT NULL REFERENCES accounts(access_code) ON DELETE CASCADE,
    created_at     TIMESTAMPTZ NOT NULL,
    input_tokens   BIGINT NOT NULL,
    output_tokens  BIGINT NOT NULL,
    cost           DOUBLE PRECISION NOT NULL,
    outcome        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS usage_events_code_time
    ON usage_events (access_code, created_at DESC);

CREATE TABLE IF NOT EXISTS billing_events (
    event_id      TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    processed_at  TIMESTAMPTZ NOT NULL,
    effect        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_snapshots (
    id           BIGSERIAL PRIMARY KEY,
    access_code  TEXT NOT NULL REFERENCES accounts(access_code) ON DELETE CASCADE,
    fingerprint  TEXT NOT NULL,
    payload      JSONB NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    expires_at   TIMESTAMPTZ NOT NULL,
    UNIQUE (access_code, fingerprint)
);

CREATE INDEX IF NOT EXISTS context_snapshots_expiry
    ON context_snapshots (expires_at);
"#;

// ============================================================================
// LEDGER STORE
// ============================================================================

/// Ledger store wrapping a connection pool.
///
/// Every component that touches durable state (admission, reconciler,
/// usage recorder, context cache) goes through this type.
#[derive(Clone)]
pub struct LedgerStore {
    pool: Pool,
}

/// Result of a context snapshot upsert.
pub struct StoredSnapshot {
    pub snapshot: ContextSnapshot,
    /// True when an identical fingerprint already existed and only its
    /// expiry was refreshed.
    pub deduplicated: bool,
}

impl LedgerStore {
    /// Create a new ledger store with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new ledger store from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    pub(crate) async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Apply the schema. Safe to run on every startup.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    // ========================================================================
    // ACCOUNT OPERATIONS
    // ========================================================================

    /// Insert a fresh trial account. Returns false on access-code collision
    /// so the caller can regenerate and retry.
    pub async fn account_insert_trial(&self, account: &Account) -> ApiResult<bool> {
        let conn = self.get_conn().await?;

        let inserted = conn
            .execute(
                "INSERT INTO accounts
                     (access_code, plan, billing_status, is_enabled, created_at)
                 VALUES ($1, $2, $3, TRUE, $4)
                 ON CONFLICT (access_code) DO NOTHING",
                &[
                    &account.access_code.as_str(),
                    &account.plan.as_str(),
                    &account.billing_status.as_str(),
                    &account.created_at,
                ],
            )
            .await?;

        Ok(inserted == 1)
    }

    /// Look up an account by access code.
    pub async fn account_get(&self, code: &AccessCode) -> ApiResult<Option<Account>> {
        let conn = self.get_conn().await?;

        let row = conn
            .query_opt(
                "SELECT access_code, plan, billing_status, billing_ref, is_enabled,
                        created_at, last_activity, total_requests, total_tokens,
                        total_cost, last_event_at
                 FROM accounts WHERE access_code = $1",
                &[&code.as_str()],
            )
            .await?;

        row.map(|r| parse_account_row(&r)).transpose()
    }

    /// Look up an account by payment-processor reference.
    pub async fn account_get_by_billing_ref(
        &self,
        billing_ref: &str,
    ) -> ApiResult<Option<Account>> {
        let conn = self.get_conn().await?;

        let row = conn
            .query_opt(
                "SELECT access_code, plan, billing_status, billing_ref, is_enabled,
                        created_at, last_activity, total_requests, total_tokens,
                        total_cost, last_event_at
                 FROM accounts WHERE billing_ref = $1",
                &[&billing_ref],
            )
            .await?;

        row.map(|r| parse_account_row(&r)).transpose()
    }

    /// List accounts ordered by creation time, newest first.
    pub async fn account_list(&self, limit: i64, offset: i64) -> ApiResult<Vec<Account>> {
        let conn = self.get_conn().await?;

        let rows = conn
            .query(
                "SELECT access_code, plan, billing_status, billing_ref, is_enabled,
                        created_at, last_activity, total_requests, total_tokens,
                        total_cost, last_event_at
                 FROM accounts ORDER BY created_at DESC LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .await?;

        rows.iter().map(parse_account_row).collect()
    }

    /// Flip the administrative kill switch. Returns false when the account
    /// does not exist.
    pub async fn account_set_enabled(&self, code: &AccessCode, enabled: bool) -> ApiResult<bool> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE accounts SET is_enabled = $2 WHERE access_code = $1",
                &[&code.as_str(), &enabled],
            )
            .await?;

        Ok(updated == 1)
    }

    /// Delete an account and, via cascade, its usage and context rows.
    pub async fn account_delete(&self, code: &AccessCode) -> ApiResult<bool> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute("DELETE FROM accounts WHERE access_code = $1", &[&code.as_str()])
            .await?;

        Ok(deleted == 1)
    }

    // ========================================================================
    // USAGE OPERATIONS
    // ========================================================================

    /// Aggregate successful usage over the trailing window.
    pub async fn windowed_usage(
        &self,
        code: &AccessCode,
        since: DateTime<Utc>,
    ) -> ApiResult<WindowedUsage> {
        let conn = self.get_conn().await?;

        let row = conn
            .query_one(
                "SELECT COUNT(*), COALESCE(SUM(input_tokens + output_tokens), 0),
                        COALESCE(SUM(cost), 0::float8)
                 FROM usage_events
                 WHERE access_code = $1 AND created_at >= $2 AND outcome = 'success'",
                &[&code.as_str(), &since],
            )
            .await?;

        Ok(WindowedUsage {
            requests: row.get(0),
            tokens: row.get(1),
            cost: row.get(2),
        })
    }

    /// Write one usage event and bump the account's lifetime counters in
    /// the same transaction. Failed calls are logged in usage_events but do
    /// not consume quota.
    pub async fn record_usage(
        &self,
        code: &AccessCode,
        record: &UsageRecord,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let outcome = match record.outcome {
            UsageOutcome::Success => "success",
            UsageOutcome::Failure => "failure",
        };

        tx.execute(
            "INSERT INTO usage_events
                 (access_code, created_at, input_tokens, output_tokens, cost, outcome)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &code.as_str(),
                &now,
                &record.input_tokens,
                &record.output_tokens,
                &record.cost,
                &outcome,
            ],
        )
        .await?;

        let debit = i64::from(record.outcome == UsageOutcome::Success);
        let updated = tx
            .execute(
                "UPDATE accounts
                 SET total_requests = total_requests + $2,
                     total_tokens = total_tokens + $3,
                     total_cost = total_cost + $4,
                     last_activity = $5
                 WHERE access_code = $1",
                &[
                    &code.as_str(),
                    &debit,
                    &record.total_tokens(),
                    &record.cost,
                    &now,
                ],
            )
            .await?;

        if updated != 1 {
            tx.rollback().await?;
            return Err(ApiError::account_not_found());
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // CONTEXT SNAPSHOT OPERATIONS
    // ========================================================================

    /// Upsert a context snapshot keyed on (access_code, fingerprint).
    ///
    /// A repeated submission of identical content refreshes the expiry of
    /// the existing row instead of inserting a duplicate.
    pub async fn context_store(
        &self,
        code: &AccessCode,
        payload: &ContextPayload,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<StoredSnapshot> {
        let conn = self.get_conn().await?;
        let fingerprint = payload.fingerprint();
        let payload_json = serde_json::to_value(payload)?;

        // xmax <> 0 distinguishes the update arm of the upsert.
        let row = conn
            .query_one(
                "INSERT INTO context_snapshots
                     (access_code, fingerprint, payload, created_at, expires_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (access_code, fingerprint)
                 DO UPDATE SET expires_at = EXCLUDED.expires_at
                 RETURNING created_at, (xmax <> 0) AS refreshed",
                &[&code.as_str(), &fingerprint, &payload_json, &now, &expires_at],
            )
            .await?;

        let created_at: DateTime<Utc> = row.get(0);
        let deduplicated: bool = row.get(1);

        Ok(StoredSnapshot {
            snapshot: ContextSnapshot {
                access_code: code.clone(),
                fingerprint,
                payload: payload.clone(),
                created_at,
                expires_at,
            },
            deduplicated,
        })
    }

    /// List live snapshots for an account, newest first. Expired rows are
    /// filtered at read time regardless of sweeper progress.
    pub async fn context_recent(
        &self,
        code: &AccessCode,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ApiResult<Vec<ContextSnapshot>> {
        let conn = self.get_conn().await?;

        let rows = conn
            .query(
                "SELECT fingerprint, payload, created_at, expires_at
                 FROM context_snapshots
                 WHERE access_code = $1 AND expires_at > $2
                 ORDER BY created_at DESC
                 LIMIT $3",
                &[&code.as_str(), &now, &limit],
            )
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload_json: serde_json::Value = row.get(1);
            let payload: ContextPayload = serde_json::from_value(payload_json)?;
            snapshots.push(ContextSnapshot {
                access_code: code.clone(),
                fingerprint: row.get(0),
                payload,
                created_at: row.get(2),
                expires_at: row.get(3),
            });
        }

        Ok(snapshots)
    }

    /// Drop all snapshots for one account. Returns the number removed.
    pub async fn context_clear(&self, code: &AccessCode) -> ApiResult<u64> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM context_snapshots WHERE access_code = $1",
                &[&code.as_str()],
            )
            .await?;

        Ok(deleted)
    }

    /// Physically delete expired snapshots. Called by the background
    /// sweeper; reads never depend on it having run.
    pub async fn context_sweep(&self, now: DateTime<Utc>) -> ApiResult<u64> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM context_snapshots WHERE expires_at <= $1",
                &[&now],
            )
            .await?;

        Ok(deleted)
    }

    /// Enforce the per-account snapshot cap, dropping the oldest rows
    /// beyond it. Returns the number removed.
    pub async fn context_trim(&self, code: &AccessCode, cap: i64) -> ApiResult<u64> {
        let conn = self.get_conn().await?;

        let deleted = conn
            .execute(
                "DELETE FROM context_snapshots
                 WHERE access_code = $1
                   AND fingerprint NOT IN (
                       SELECT fingerprint FROM context_snapshots
                       WHERE access_code = $1
                       ORDER BY created_at DESC
                       LIMIT $2
                   )",
                &[&code.as_str(), &cap],
            )
            .await?;

        Ok(deleted)
    }
}

// ============================================================================
// ROW PARSING
// ============================================================================

/// Parse an accounts row into the domain type.
fn parse_account_row(row: &tokio_postgres::Row) -> ApiResult<Account> {
    let plan_str: &str = row.get(1);
    let status_str: &str = row.get(2);

    let plan = PlanTier::from_str(plan_str)
        .map_err(|e| ApiError::internal_error(format!("Corrupt account row: {}", e)))?;
    let billing_status = BillingStatus::from_str(status_str)
        .map_err(|e| ApiError::internal_error(format!("Corrupt account row: {}", e)))?;

    Ok(Account {
        access_code: AccessCode::new(row.get::<_, String>(0)),
        plan,
        billing_status,
        billing_ref: row.get(3),
        is_enabled: row.get(4),
        created_at: row.get(5),
        last_activity: row.get(6),
        total_requests: row.get(7),
        total_tokens: row.get(8),
        total_cost: row.get(9),
        last_event_at: row.get(10),
    })
}
