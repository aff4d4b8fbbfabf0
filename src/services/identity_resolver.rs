use tracing::{debug, info, warn};

use crate::db::repositories::IdentityRepository;
use crate::error::{AppError, AppResult};
use crate::models::identity::IdentityRecord;
use crate::models::plan::Plan;
use crate::security::{constant_time_equal, ApiKeyHasher};

/// Credentials presented by a request. Exactly one kind is resolved per
/// request; header extraction decides which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Marketplace {
        proxy_secret: String,
        user: Option<String>,
        subscription: Option<String>,
    },
}

pub fn marketplace_identity_key(user: &str) -> String {
    format!("rapidapi:{}", user)
}

/// Turns credentials into a stored identity record.
#[derive(Clone)]
pub struct IdentityResolver {
    identities: IdentityRepository,
    hasher: ApiKeyHasher,
    marketplace_secret: Option<String>,
}

impl IdentityResolver {
    pub fn new(
        identities: IdentityRepository,
        hasher: ApiKeyHasher,
        marketplace_secret: Option<String>,
    ) -> Self {
        Self {
            identities,
            hasher,
            marketplace_secret,
        }
    }

    pub async fn resolve(&self, credentials: &Credentials) -> AppResult<IdentityRecord> {
        match credentials {
            Credentials::ApiKey(raw_key) => self.resolve_direct(raw_key).await,
            Credentials::Marketplace {
                proxy_secret,
                user,
                subscription,
            } => {
                self.resolve_marketplace(proxy_secret, user.as_deref(), subscription.as_deref())
                    .await
            }
        }
    }

    async fn resolve_direct(&self, raw_key: &str) -> AppResult<IdentityRecord> {
        if raw_key.trim().is_empty() {
            return Err(AppError::Unauthorized("API key required".to_string()));
        }

        let identity_key = self.hasher.identity_key_for(raw_key)?;

        let record = self
            .identities
            .find(&identity_key)
            .await?
            .ok_or_else(|| {
                warn!("Unknown API key presented");
                AppError::Unauthorized("Invalid API key".to_string())
            })?;

        if !record.active {
            warn!(identity_key = %record.identity_key, "Inactive API key presented");
            return Err(AppError::Unauthorized("API key is inactive".to_string()));
        }

        debug!(identity_key = %record.identity_key, plan = %record.plan, "Resolved direct API key");
        Ok(record)
    }

    async fn resolve_marketplace(
        &self,
        proxy_secret: &str,
        user: Option<&str>,
        subscription: Option<&str>,
    ) -> AppResult<IdentityRecord> {
        let expected = self.marketplace_secret.as_deref().ok_or_else(|| {
            warn!("Marketplace request received but no proxy secret is configured");
            AppError::Forbidden("Invalid RapidAPI proxy secret".to_string())
        })?;

        if !constant_time_equal(proxy_secret, expected) {
            warn!("Marketplace request with invalid proxy secret");
            return Err(AppError::Forbidden("Invalid RapidAPI proxy secret".to_string()));
        }

        let user = user
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing RapidAPI user header".to_string()))?;

        let identity_key = marketplace_identity_key(user);
        let plan = Plan::from_marketplace_tier(subscription);

        // Plan is fixed when the record is first created; later tiers are ignored.
        let candidate = IdentityRecord::marketplace(identity_key, plan, user);
        let (record, created) = self.identities.create_if_absent(&candidate).await?;

        if created {
            info!(identity_key = %record.identity_key, plan = %record.plan, "Provisioned marketplace identity");
        } else if record.plan != plan {
            debug!(
                identity_key = %record.identity_key,
                stored_plan = %record.plan,
                requested_plan = %plan,
                "Marketplace tier differs from stored plan; keeping stored plan"
            );
        }

        if !record.active {
            warn!(identity_key = %record.identity_key, "Inactive marketplace identity");
            return Err(AppError::Unauthorized("Marketplace identity is inactive".to_string()));
        }

        Ok(record)
    }
}
