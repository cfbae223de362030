//! [RELAY] Store-and-forward for offline recipients (spec §4.8/§9).
//!
//! Delegates durability to the caller's `PersistenceAdapter`; this module
//! only owns retry/backoff policy and expiry bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::RelayConfig;
use crate::persistence::{PersistenceAdapter, StoredMessage, StoredPriority};

const BACKOFF_CAP_MS: u64 = 3_600_000;

pub struct StoreForward {
    adapter: Arc<dyn PersistenceAdapter>,
    config: RelayConfig,
}

impl StoreForward {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, config: RelayConfig) -> Self {
        Self { adapter, config }
    }

    pub async fn store(
        &self,
        id: &str,
        recipient_id: &str,
        payload: Vec<u8>,
        priority: StoredPriority,
        now_ms: u64,
    ) -> anyhow::Result<()> {
        if self.adapter.size().await? >= self.config.max_stored_messages {
            debug!(id, "store-and-forward at capacity, dropping oldest via adapter prune");
            self.adapter.prune_expired(now_ms).await?;
        }
        let message = StoredMessage {
            id: id.to_string(),
            recipient_id: recipient_id.to_string(),
            payload,
            attempts: 0,
            last_attempt_ms: None,
            expires_at_ms: now_ms + self.config.store_timeout_ms,
            priority,
            created_at_ms: now_ms,
        };
        self.adapter.save_message(id, message).await
    }

    /// Exponential backoff from `retryBackoffMs`, doubling per attempt and
    /// capped at one hour (spec §4.8: "retryBackoff 5s doubling/capped").
    pub fn next_retry_delay(&self, attempts: u32) -> Duration {
        let base = self.config.retry_backoff_ms;
        let scaled = base.saturating_mul(1u64 << attempts.min(16));
        Duration::from_millis(scaled.min(BACKOFF_CAP_MS))
    }

    pub fn is_exhausted(&self, stored: &StoredMessage) -> bool {
        stored.attempts >= self.config.max_retries
    }

    pub fn due_for_retry(&self, stored: &StoredMessage, now_ms: u64) -> bool {
        if self.is_exhausted(stored) {
            return false;
        }
        match stored.last_attempt_ms {
            None => true,
            Some(last) => {
                let delay = self.next_retry_delay(stored.attempts);
                now_ms.saturating_sub(last) >= delay.as_millis() as u64
            }
        }
    }

    /// Messages ready for a retry attempt right now, oldest first.
    pub async fn due_messages(&self, now_ms: u64) -> anyhow::Result<Vec<StoredMessage>> {
        self.adapter.prune_expired(now_ms).await?;
        let mut all: Vec<StoredMessage> = self
            .adapter
            .get_all_messages()
            .await?
            .into_values()
            .filter(|m| self.due_for_retry(m, now_ms))
            .collect();
        all.sort_by_key(|m| m.created_at_ms);
        Ok(all)
    }

    pub async fn record_attempt(&self, id: &str, attempts: u32, now_ms: u64, success: bool) -> anyhow::Result<()> {
        if success {
            self.adapter.remove_message(id).await
        } else {
            self.adapter.update_message(id, attempts, now_ms, false).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistenceAdapter;

    fn sf() -> StoreForward {
        StoreForward::new(
            Arc::new(InMemoryPersistenceAdapter::default()),
            RelayConfig { retry_backoff_ms: 1000, max_retries: 3, ..RelayConfig::default() },
        )
    }

    #[tokio::test]
    async fn stored_message_is_due_immediately() {
        let sf = sf();
        sf.store("m1", "peer-b", b"hi".to_vec(), StoredPriority::Text, 0).await.unwrap();
        let due = sf.due_messages(0).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_after_max_retries() {
        let sf = sf();
        let stored = StoredMessage {
            id: "m1".into(),
            recipient_id: "b".into(),
            payload: vec![],
            attempts: 3,
            last_attempt_ms: Some(0),
            expires_at_ms: u64::MAX,
            priority: StoredPriority::Text,
            created_at_ms: 0,
        };
        assert!(sf.is_exhausted(&stored));
        assert!(!sf.due_for_retry(&stored, 1_000_000));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let sf = sf();
        assert_eq!(sf.next_retry_delay(0), Duration::from_millis(1000));
        assert_eq!(sf.next_retry_delay(1), Duration::from_millis(2000));
        assert_eq!(sf.next_retry_delay(20), Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[tokio::test]
    async fn successful_attempt_removes_message() {
        let sf = sf();
        sf.store("m1", "b", b"x".to_vec(), StoredPriority::Text, 0).await.unwrap();
        sf.record_attempt("m1", 1, 100, true).await.unwrap();
        assert!(sf.due_messages(200).await.unwrap().is_empty());
    }
}
