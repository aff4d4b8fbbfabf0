use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counter state for one identity in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub count: u64,
    pub limit: u64,
    pub window_secs: u64,
    /// Seconds until the current window closes, always in `1..=window_secs`.
    pub reset_after_secs: u64,
    pub reset_at: DateTime<Utc>,
}

impl QuotaUsage {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    pub fn percentage_used(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.count as f64 / self.limit as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Admitted(QuotaUsage),
    Rejected { retry_after_secs: u64, usage: QuotaUsage },
}

impl QuotaDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, QuotaDecision::Admitted(_))
    }

    pub fn usage(&self) -> &QuotaUsage {
        match self {
            QuotaDecision::Admitted(usage) => usage,
            QuotaDecision::Rejected { usage, .. } => usage,
        }
    }
}
