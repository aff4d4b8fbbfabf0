use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use std::time::Duration;

use crate::models::identity::IdentityRecord;

/// Window counter entry for the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryCounter {
    pub count: u64,
    pub expires_at: DateTime<Utc>,
}

/// In-memory counting store. Each `DashMap` entry call holds the shard lock
/// for the whole closure, which is what makes check-and-increment atomic here.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(crate) identities: DashMap<String, IdentityRecord>,
    pub(crate) counters: DashMap<String, MemoryCounter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn cleanup_expired_counters(&self, now: DateTime<Utc>) {
        debug!("Cleaning up expired rate limit counters from memory");
        self.counters.retain(|_, counter| counter.expires_at > now);
    }
}

/// Periodically drops expired window counters from an in-memory store.
pub async fn start_memory_store_cleanup_task(
    store: std::sync::Arc<MemoryStore>,
    cleanup_interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
    log::info!(
        "Starting rate limit memory store cleanup task (interval: {}s)",
        cleanup_interval_secs
    );

    loop {
        interval.tick().await;
        store.cleanup_expired_counters(Utc::now());
        debug!("Rate limit memory cleanup completed ({} counters live)", store.counter_count());
    }
}
