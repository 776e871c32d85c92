//! Context Cache
//!
//! TTL'd, content-addressed storage for the context snapshots the IDE
//! add-in ships alongside prompts. Identical content (by canonical-JSON
//! fingerprint) is stored once per account; resubmission refreshes the
//! expiry instead of duplicating the row.
//!
//! Expiry is enforced twice: reads filter on expires_at so a snapshot is
//! invisible the instant it lapses, and a background sweeper physically
//! deletes lapsed rows on an interval.

use std::time::Duration;

use crate::db::{LedgerStore, StoredSnapshot};
use crate::error::ApiResult;
use chrono::Utc;
use latchkey_core::{AccessCode, ContextPayload, ContextSnapshot};

/// Ledger-backed context cache.
#[derive(Clone)]
pub struct ContextCache {
    store: LedgerStore,
    ttl: chrono::Duration,
    sweep_interval: Duration,
    max_per_account: i64,
}

impl ContextCache {
    pub fn new(
        store: LedgerStore,
        ttl: Duration,
        sweep_interval: Duration,
        max_per_account: i64,
    ) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
            sweep_interval,
            max_per_account,
        }
    }

    /// Validate and store a snapshot, deduplicating on content.
    pub async fn store_snapshot(
        &self,
        code: &AccessCode,
        payload: &ContextPayload,
    ) -> ApiResult<StoredSnapshot> {
        payload.validate()?;

        let now = Utc::now();
        let stored = self
            .store
            .context_store(code, payload, now, now + self.ttl)
            .await?;

        if stored.deduplicated {
            tracing::debug!(
                code = %code,
                fingerprint = %stored.snapshot.fingerprint,
                "Context snapshot deduplicated, expiry refreshed"
            );
        } else {
            // A fresh row may push the account past its cap; drop oldest.
            let trimmed = self.store.context_trim(code, self.max_per_account).await?;
            if trimmed > 0 {
                tracing::debug!(code = %code, trimmed, "Trimmed oldest context snapshots");
            }
        }

        Ok(stored)
    }

    /// Live snapshots for an account, newest first.
    pub async fn recent(&self, code: &AccessCode, limit: i64) -> ApiResult<Vec<ContextSnapshot>> {
        self.store.context_recent(code, Utc::now(), limit).await
    }

    /// Drop everything stored for an account.
    pub async fn clear(&self, code: &AccessCode) -> ApiResult<u64> {
        self.store.context_clear(code).await
    }

    /// Spawn the background sweeper. Runs until the process exits.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick; startup is busy enough.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.context_sweep(Utc::now()).await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        tracing::info!(deleted, "Swept expired context snapshots");
                    }
                    Err(err) => {
                        // Next tick retries; reads stay correct meanwhile.
                        tracing::warn!(error = %err, "Context sweep failed");
                    }
                }
            }
        })
    }
}
