use crate::config::settings::RateLimitConfig;
use crate::models::plan::{Plan, PlanLimits};

/// Static plan → quota table, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRegistry {
    limits: RateLimitConfig,
}

impl PlanRegistry {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self { limits }
    }

    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        self.limits.limits_for(plan)
    }

    pub fn entries(&self) -> impl Iterator<Item = (Plan, PlanLimits)> + '_ {
        Plan::ALL.into_iter().map(|plan| (plan, self.limits_for(plan)))
    }
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
