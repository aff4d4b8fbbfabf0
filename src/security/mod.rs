pub mod api_key_hashing;

pub use api_key_hashing::{constant_time_equal, generate_api_key, ApiKeyHasher};
