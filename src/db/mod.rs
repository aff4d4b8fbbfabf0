pub mod connection;
pub mod memory_store;
pub mod repositories;
pub mod store;

// Re-export the connection module's functions for ease of use
pub use connection::{create_counting_store, verify_connection};
pub use repositories::*;
pub use store::{CountingStore, StoreError};
