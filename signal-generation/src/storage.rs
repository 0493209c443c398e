// Signal Ledger
// Remembers when each signal key was last emitted so repeats inside the
// cooldown window are suppressed

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Trait for dedupe ledger backends
#[async_trait::async_trait]
pub trait SignalLedger: Send + Sync {
    /// Atomically check and stamp `key`.
    ///
    /// Returns `true` (and records `now`) when no entry exists or the
    /// existing entry is strictly older than `cooldown`. Otherwise leaves
    /// the entry untouched and returns `false`.
    async fn try_claim(&self, key: &str, now: DateTime<Utc>, cooldown: Duration) -> Result<bool>;
}

/// In-memory ledger. Lost on restart, which only means a repeat alert may
/// go out once after a redeploy.
pub struct InMemoryLedger {
    entries: tokio::sync::RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SignalLedger for InMemoryLedger {
    async fn try_claim(&self, key: &str, now: DateTime<Utc>, cooldown: Duration) -> Result<bool> {
        // single write guard covers the read and the stamp
        let mut entries = self.entries.write().await;
        let claimable = match entries.get(key) {
            Some(last) => now - *last > cooldown,
            None => true,
        };
        if claimable {
            entries.insert(key.to_string(), now);
        }
        Ok(claimable)
    }
}
