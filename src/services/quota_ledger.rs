use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::db::repositories::quota_repository::{QuotaRepository, COUNTER_EXPIRY_GRACE_SECS};
use crate::db::store::StoreError;
use crate::models::plan::PlanLimits;
use crate::models::quota::{QuotaDecision, QuotaUsage};

/// Fixed counting window aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl Window {
    pub fn containing(now: DateTime<Utc>, window_secs: u64) -> Self {
        let window_secs = window_secs.max(1);
        let secs = now.timestamp().max(0) as u64;
        let index = secs / window_secs;
        let start = index * window_secs;
        Self {
            index,
            start,
            end: start + window_secs,
        }
    }

    /// Seconds from `now` to the end of the window, at least 1.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        let secs = now.timestamp().max(0) as u64;
        self.end.saturating_sub(secs).max(1)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.end as i64, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Per-identity request counting against plan limits.
#[derive(Clone)]
pub struct QuotaLedger {
    counters: QuotaRepository,
}

impl QuotaLedger {
    pub fn new(counters: QuotaRepository) -> Self {
        Self { counters }
    }

    pub async fn check_and_increment(
        &self,
        identity_key: &str,
        limits: PlanLimits,
    ) -> Result<QuotaDecision, StoreError> {
        self.check_and_increment_at(identity_key, limits, Utc::now()).await
    }

    /// Admits and counts one request if the identity is under its limit for
    /// the window containing `now`.
    pub async fn check_and_increment_at(
        &self,
        identity_key: &str,
        limits: PlanLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, StoreError> {
        let window = Window::containing(now, limits.window_secs);
        let reset_at = window.end_time();
        let expires_at = reset_at + Duration::seconds(COUNTER_EXPIRY_GRACE_SECS);

        let outcome = self
            .counters
            .check_and_increment(identity_key, window.index, limits.max_requests, expires_at, now)
            .await?;

        let usage = QuotaUsage {
            count: outcome.count,
            limit: limits.max_requests,
            window_secs: limits.window_secs,
            reset_after_secs: window.seconds_remaining(now),
            reset_at,
        };

        if outcome.admitted {
            debug!(
                identity_key = identity_key,
                count = usage.count,
                limit = usage.limit,
                "Request admitted by quota ledger"
            );
            Ok(QuotaDecision::Admitted(usage))
        } else {
            warn!(
                identity_key = identity_key,
                limit = usage.limit,
                retry_after = usage.reset_after_secs,
                "Quota exhausted for current window"
            );
            Ok(QuotaDecision::Rejected {
                retry_after_secs: usage.reset_after_secs,
                usage,
            })
        }
    }

    /// Usage in the window containing `now`, without counting a request.
    pub async fn usage_at(
        &self,
        identity_key: &str,
        limits: PlanLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaUsage, StoreError> {
        let window = Window::containing(now, limits.window_secs);
        let count = self.counters.current_count(identity_key, window.index).await?;
        Ok(QuotaUsage {
            count,
            limit: limits.max_requests,
            window_secs: limits.window_secs,
            reset_after_secs: window.seconds_remaining(now),
            reset_at: window.end_time(),
        })
    }
}
