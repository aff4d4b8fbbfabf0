use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::repositories::IdentityRepository;
use crate::error::{AppError, AppResult};
use crate::models::identity::IdentityRecord;
use crate::models::plan::Plan;
use crate::security::{generate_api_key, ApiKeyHasher};

/// A freshly issued key. The raw key is only ever available here.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub api_key: String,
    pub identity_key: String,
    pub plan: Plan,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Which identity an admin operation targets.
#[derive(Debug, Clone)]
pub enum KeyTarget {
    ApiKey(String),
    IdentityKey(String),
}

/// Issues and administers direct API keys.
#[derive(Clone)]
pub struct ApiKeyService {
    identities: IdentityRepository,
    hasher: ApiKeyHasher,
    key_environment: String,
}

impl ApiKeyService {
    pub fn new(identities: IdentityRepository, hasher: ApiKeyHasher, key_environment: String) -> Self {
        Self {
            identities,
            hasher,
            key_environment,
        }
    }

    pub async fn issue_key(&self, email: &str, plan: Plan) -> AppResult<IssuedKey> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }

        let api_key = generate_api_key(&self.key_environment);
        let identity_key = self.hasher.identity_key_for(&api_key)?;
        let record = IdentityRecord::direct(identity_key.clone(), plan, Some(email.to_string()));

        let (stored, created) = self.identities.create_if_absent(&record).await?;
        if !created {
            // 256 random bits colliding means the generator is broken.
            return Err(AppError::Internal("Generated API key already exists".to_string()));
        }

        info!(identity_key = %identity_key, plan = %plan, "Issued API key");

        Ok(IssuedKey {
            api_key,
            identity_key,
            plan: stored.plan,
            email: email.to_string(),
            created_at: stored.created_at,
        })
    }

    fn resolve_target(&self, target: &KeyTarget) -> AppResult<String> {
        match target {
            KeyTarget::ApiKey(raw) => self.hasher.identity_key_for(raw),
            KeyTarget::IdentityKey(key) => Ok(key.clone()),
        }
    }

    pub async fn deactivate(&self, target: &KeyTarget) -> AppResult<String> {
        let identity_key = self.resolve_target(target)?;
        if !self.identities.set_active(&identity_key, false).await? {
            return Err(AppError::NotFound("API key not found".to_string()));
        }
        info!(identity_key = %identity_key, "Deactivated identity");
        Ok(identity_key)
    }

    /// The explicit upgrade/downgrade event; the new plan applies from the
    /// next admitted request.
    pub async fn change_plan(&self, target: &KeyTarget, plan: Plan) -> AppResult<String> {
        let identity_key = self.resolve_target(target)?;
        if !self.identities.set_plan(&identity_key, plan).await? {
            return Err(AppError::NotFound("API key not found".to_string()));
        }
        info!(identity_key = %identity_key, plan = %plan, "Changed identity plan");
        Ok(identity_key)
    }
}
