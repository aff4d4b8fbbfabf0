use crate::error::AppError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hashes raw API keys so only digests are ever stored.
#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Vec<u8>,
}

impl std::fmt::Debug for ApiKeyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyHasher").finish_non_exhaustive()
    }
}

impl ApiKeyHasher {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Hashes an API key using HMAC-SHA256
    ///
    /// # Arguments
    /// * `raw_key` - The raw API key to hash
    ///
    /// # Returns
    /// * `Result<String, AppError>` - Hex-encoded hash or error
    pub fn hash_api_key(&self, raw_key: &str) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;

        mac.update(raw_key.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Identity key under which a direct API key's record is stored.
    pub fn identity_key_for(&self, raw_key: &str) -> Result<String, AppError> {
        Ok(format!("key:{}", self.hash_api_key(raw_key)?))
    }
}

/// Generates a new API key of the form `pdf_<environment>_<token>`, where the
/// token is 32 random bytes in URL-safe base64 (43 characters).
pub fn generate_api_key(environment: &str) -> String {
    let mut key_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut key_bytes);
    format!("pdf_{}_{}", environment, URL_SAFE_NO_PAD.encode(key_bytes))
}

/// Compares two strings in constant time to prevent timing attacks
///
/// # Arguments
/// * `a` - First string to compare
/// * `b` - Second string to compare
///
/// # Returns
/// * `bool` - True if strings are equal, false otherwise
pub fn constant_time_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
