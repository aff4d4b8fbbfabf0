use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::AppSettings;
use crate::db::repositories::{IdentityRepository, QuotaRepository};
use crate::db::store::CountingStore;
use crate::error::{AppError, AppResult};
use crate::models::identity::ResolvedIdentity;
use crate::models::quota::{QuotaDecision, QuotaUsage};
use crate::security::ApiKeyHasher;
use crate::services::identity_resolver::{Credentials, IdentityResolver};
use crate::services::plan_registry::PlanRegistry;
use crate::services::quota_ledger::QuotaLedger;

/// A request that passed both identity resolution and the quota check.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub identity: ResolvedIdentity,
    pub usage: QuotaUsage,
}

/// Identity resolution followed by quota metering. The counting store is
/// passed in explicitly; the gate keeps no global state.
#[derive(Clone)]
pub struct Gate {
    resolver: IdentityResolver,
    ledger: QuotaLedger,
    registry: PlanRegistry,
    identities: IdentityRepository,
}

impl Gate {
    pub fn new(store: CountingStore, settings: &AppSettings) -> Self {
        let identities = IdentityRepository::new(store.clone());
        let resolver = IdentityResolver::new(
            identities.clone(),
            ApiKeyHasher::new(&settings.security.api_key_hash_secret),
            settings.security.rapidapi_proxy_secret.clone(),
        );
        Self::from_parts(
            resolver,
            QuotaLedger::new(QuotaRepository::new(store)),
            PlanRegistry::new(settings.rate_limit.clone()),
            identities,
        )
    }

    pub fn from_parts(
        resolver: IdentityResolver,
        ledger: QuotaLedger,
        registry: PlanRegistry,
        identities: IdentityRepository,
    ) -> Self {
        Self {
            resolver,
            ledger,
            registry,
            identities,
        }
    }

    pub fn registry(&self) -> &PlanRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn identities(&self) -> &IdentityRepository {
        &self.identities
    }

    pub async fn admit(&self, credentials: Option<&Credentials>) -> AppResult<Admission> {
        self.admit_at(credentials, Utc::now()).await
    }

    /// Resolves the caller, then counts the request against its plan.
    /// Any failure returns before the caller is forwarded anywhere.
    pub async fn admit_at(
        &self,
        credentials: Option<&Credentials>,
        now: DateTime<Utc>,
    ) -> AppResult<Admission> {
        let credentials =
            credentials.ok_or_else(|| AppError::Unauthorized("API key required".to_string()))?;

        let record = self.resolver.resolve(credentials).await?;
        let limits = self.registry.limits_for(record.plan);

        let decision = self
            .ledger
            .check_and_increment_at(&record.identity_key, limits, now)
            .await
            .map_err(|e| {
                warn!(identity_key = %record.identity_key, error = %e, "Counting store unavailable, rejecting request");
                AppError::from(e)
            })?;

        match decision {
            QuotaDecision::Admitted(usage) => {
                debug!(identity_key = %record.identity_key, count = usage.count, "Gate admitted request");

                let identities = self.identities.clone();
                let identity_key = record.identity_key.clone();
                tokio::spawn(async move {
                    if let Err(e) = identities.touch_usage(&identity_key, now).await {
                        warn!(identity_key = %identity_key, error = %e, "Failed to update identity usage");
                    }
                });

                Ok(Admission {
                    identity: ResolvedIdentity::from(&record),
                    usage,
                })
            }
            QuotaDecision::Rejected { retry_after_secs, .. } => Err(AppError::QuotaExceeded {
                message: format!(
                    "Rate limit of {} requests per {}s reached for the {} plan. Please upgrade your plan or try again later.",
                    limits.max_requests, limits.window_secs, record.plan
                ),
                limit: limits.max_requests,
                retry_after_secs,
            }),
        }
    }
}
