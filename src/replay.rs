//! Replay protection for store notifications.
//!
//! Keeps a bounded, time-windowed set of processed notification identities.
//! Stores retry delivery with the same `notificationUUID`, so a UUID seen
//! within the retention window is a replay. The set lives in memory: a
//! missed duplicate after a restart is tolerable because the upsert is
//! idempotent for identical inputs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Processed notifications are remembered for 24 hours.
const NOTIFICATION_TTL_SECS: i64 = 24 * 60 * 60;

/// Sweep interval for the eviction task.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    NotReplay,
    Replay,
}

pub struct ReplayGuard {
    processed: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self {
            processed: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check-and-record a notification. An empty UUID cannot be
    /// judged and is allowed through.
    pub fn check(&self, notification_uuid: &str, signed_date: i64) -> ReplayCheck {
        if notification_uuid.is_empty() {
            tracing::debug!("Notification UUID is empty, skipping replay check");
            return ReplayCheck::NotReplay;
        }

        let id = notification_id(notification_uuid, signed_date);
        let mut processed = self.processed.lock().unwrap();

        if let Some(first_seen) = processed.get(&id) {
            tracing::info!(
                "Replay detected - notification_id: {}, first seen at: {}",
                id,
                first_seen
            );
            return ReplayCheck::Replay;
        }

        processed.insert(id, Utc::now());
        ReplayCheck::NotReplay
    }

    /// Evict entries older than the retention window. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let mut processed = self.processed.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::seconds(NOTIFICATION_TTL_SECS);
        let before = processed.len();
        processed.retain(|_, first_seen| *first_seen > cutoff);
        before - processed.len()
    }

    pub fn len(&self) -> usize {
        self.processed.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.processed.lock().unwrap().clear();
    }
}

fn notification_id(notification_uuid: &str, signed_date: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", notification_uuid, signed_date));
    hex::encode(hasher.finalize())
}

/// Spawn the hourly eviction task.
pub fn spawn_sweeper(guard: Arc<ReplayGuard>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;
            let removed = guard.sweep();
            if removed > 0 {
                tracing::debug!(
                    "Replay guard sweep: removed {} expired entries, {} remaining",
                    removed,
                    guard.len()
                );
            }
        }
    });

    tracing::info!("Replay guard sweeper started (runs every hour)");
}
