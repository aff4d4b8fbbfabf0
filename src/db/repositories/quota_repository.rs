use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};

use crate::db::memory_store::MemoryCounter;
use crate::db::store::{redis_key, CountingStore, StoreError};
#[cfg(test)]
use crate::db::store::unavailable;

// Read, compare and increment in one server-side step. A rejected request
// leaves the counter unchanged, so the count never passes the limit.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
    local current = tonumber(redis.call('GET', KEYS[1]) or '0')
    local limit = tonumber(ARGV[1])
    if current >= limit then
        return {0, current}
    end
    current = redis.call('INCR', KEYS[1])
    if current == 1 then
        redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
    end
    return {1, current}
"#;

/// Result of one atomic check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    pub admitted: bool,
    /// Counter value after the call.
    pub count: u64,
}

/// Window-scoped request counters.
#[derive(Clone)]
pub struct QuotaRepository {
    store: CountingStore,
}

fn counter_key(identity_key: &str, window_index: u64) -> String {
    format!("{}:{}", identity_key, window_index)
}

impl QuotaRepository {
    pub fn new(store: CountingStore) -> Self {
        Self { store }
    }

    /// Increments the counter for `(identity_key, window_index)` only if it is
    /// below `limit`. `expires_at` bounds how long the counter is kept.
    pub async fn check_and_increment(
        &self,
        identity_key: &str,
        window_index: u64,
        limit: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CounterOutcome, StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => {
                let mut entry = memory
                    .counters
                    .entry(counter_key(identity_key, window_index))
                    .or_insert_with(|| MemoryCounter { count: 0, expires_at });

                if entry.count >= limit {
                    return Ok(CounterOutcome { admitted: false, count: entry.count });
                }
                entry.count += 1;
                Ok(CounterOutcome { admitted: true, count: entry.count })
            }
            CountingStore::Redis { connection_manager, key_prefix } => {
                let mut conn = connection_manager.as_ref().clone();
                let key = redis_key(key_prefix, "rate_limit", &counter_key(identity_key, window_index));
                let ttl_secs = (expires_at - now).num_seconds().max(1);

                let (admitted, count): (i64, i64) = Script::new(CHECK_AND_INCREMENT_SCRIPT)
                    .key(&key)
                    .arg(limit)
                    .arg(ttl_secs)
                    .invoke_async(&mut conn)
                    .await?;

                Ok(CounterOutcome {
                    admitted: admitted == 1,
                    count: count.max(0) as u64,
                })
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    /// Current counter value without incrementing.
    pub async fn current_count(&self, identity_key: &str, window_index: u64) -> Result<u64, StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => Ok(memory
                .counters
                .get(&counter_key(identity_key, window_index))
                .map(|c| c.count)
                .unwrap_or(0)),
            CountingStore::Redis { connection_manager, key_prefix } => {
                let mut conn = connection_manager.as_ref().clone();
                let key = redis_key(key_prefix, "rate_limit", &counter_key(identity_key, window_index));
                let count: Option<u64> = conn.get(&key).await?;
                Ok(count.unwrap_or(0))
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }
}

/// Seconds added to counter expiry so a counter is never dropped while its
/// window can still be read.
pub const COUNTER_EXPIRY_GRACE_SECS: i64 = 60;
