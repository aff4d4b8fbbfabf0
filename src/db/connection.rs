use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::config::settings::{StoreBackend, StoreConfig};
use crate::db::store::{CountingStore, StoreError};

/// Opens a Redis connection manager, retrying a few times before failing.
pub async fn create_connection_manager(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    log::info!("Creating Redis connection manager for the counting store");

    let client = redis::Client::open(redis_url)?;

    let max_retries = 3;
    let mut last_error = None;

    for attempt in 1..=max_retries {
        log::info!("Redis connection attempt {} of {}", attempt, max_retries);

        match ConnectionManager::new(client.clone()).await {
            Ok(manager) => {
                log::info!("Successfully connected to Redis");
                return Ok(manager);
            }
            Err(e) => {
                log::warn!("Redis connection attempt {} failed: {}", attempt, e);
                last_error = Some(e);

                if attempt < max_retries {
                    let delay = Duration::from_secs(2 * attempt as u64);
                    log::info!("Retrying in {} seconds...", delay.as_secs());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    match last_error {
        Some(error) => {
            log::error!("All Redis connection attempts failed: {}", error);
            Err(StoreError::Redis(error))
        }
        None => Err(StoreError::Connection("Unknown Redis connection error".to_string())),
    }
}

/// Builds the counting store selected by configuration.
pub async fn create_counting_store(config: &StoreConfig) -> Result<CountingStore, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            log::warn!("Using in-memory counting store; quotas are not shared across instances");
            Ok(CountingStore::new_memory())
        }
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                StoreError::Connection("REDIS_URL must be set for the redis backend".to_string())
            })?;
            let manager = create_connection_manager(url).await?;
            Ok(CountingStore::new_redis(manager, config.key_prefix.clone()))
        }
    }
}

/// Verifies the store answers a PING.
pub async fn verify_connection(store: &CountingStore) -> Result<(), StoreError> {
    store.ping().await.map_err(|e| {
        log::error!("Counting store verification failed: {}", e);
        e
    })
}

/// Store on the Redis instance named by `REDIS_URL`, under a fresh key prefix.
#[cfg(test)]
pub(crate) async fn redis_test_store() -> CountingStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let manager = create_connection_manager(&url)
        .await
        .expect("REDIS_URL must point at a reachable Redis");
    CountingStore::new_redis(manager, format!("pdfgw-test-{}", rand::random::<u32>()))
}
