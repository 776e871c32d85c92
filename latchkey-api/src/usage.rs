//! Usage Recorder
//!
//! Writes the post-call debit for every admitted chat request. The write
//! is retried with exponential backoff because losing a debit undercounts
//! quota and revenue; the chat response has usually already been produced
//! by the time the debit lands, so the recorder must be the persistent one.
//!
//! Each attempt goes through LedgerStore::record_usage, which inserts the
//! usage event and bumps the account counters in one transaction, so a
//! retried attempt can never double-debit a partially-applied write.

use std::time::Duration;

use crate::db::LedgerStore;
use crate::error::ApiResult;
use chrono::Utc;
use latchkey_core::{AccessCode, UsageRecord};

/// Retrying usage recorder.
#[derive(Clone)]
pub struct UsageRecorder {
    store: LedgerStore,
    attempts: u32,
    base_delay: Duration,
}

impl UsageRecorder {
    pub fn new(store: LedgerStore, attempts: u32, base_delay: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Record a debit, retrying transient store failures.
    ///
    /// The delay doubles per attempt. The final error is returned so the
    /// caller can decide whether the request as a whole still succeeds.
    pub async fn record(&self, code: &AccessCode, record: &UsageRecord) -> ApiResult<()> {
        let mut delay = self.base_delay;
        let mut last_err = None;

        for attempt in 1..=self.attempts {
            match self.store.record_usage(code, record, Utc::now()).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(code = %code, attempt, "Usage debit landed after retry");
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        code = %code,
                        attempt,
                        attempts = self.attempts,
                        error = %err,
                        "Usage debit failed"
                    );
                    last_err = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| {
            crate::error::ApiError::internal_error("Usage recording failed without error")
        });
        tracing::error!(code = %code, error = %err, "Usage debit dropped after all retries");
        Err(err)
    }
}
