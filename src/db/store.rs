use std::sync::Arc;

use redis::aio::ConnectionManager;
use thiserror::Error;

use crate::db::memory_store::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Handle to the shared counting store. Cloning is cheap; every clone talks to
/// the same backing state.
#[derive(Clone)]
pub enum CountingStore {
    /// In-process maps. Correct for a single instance only.
    Memory(Arc<MemoryStore>),
    /// Redis-backed store shared by every service instance.
    Redis {
        connection_manager: Arc<ConnectionManager>,
        key_prefix: String,
    },
    /// Answers every call with a connection error.
    #[cfg(test)]
    Unavailable,
}

impl CountingStore {
    pub fn new_memory() -> Self {
        Self::Memory(Arc::new(MemoryStore::new()))
    }

    pub fn new_redis(connection_manager: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self::Redis {
            connection_manager: Arc::new(connection_manager),
            key_prefix: key_prefix.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_unavailable() -> Self {
        Self::Unavailable
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis { .. } => "redis",
            #[cfg(test)]
            Self::Unavailable => "unavailable",
        }
    }

    /// Round trip to the store, used by health checks.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Redis { connection_manager, .. } => {
                let mut conn = connection_manager.as_ref().clone();
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            }
            #[cfg(test)]
            Self::Unavailable => Err(unavailable()),
        }
    }
}

#[cfg(test)]
pub(crate) fn unavailable() -> StoreError {
    StoreError::Connection("counting store unavailable".to_string())
}

pub(crate) fn redis_key(prefix: &str, kind: &str, rest: &str) -> String {
    format!("{}:{}:{}", prefix, kind, rest)
}
