pub mod identity;
pub mod plan;
pub mod quota;

pub use identity::{IdentityRecord, IdentitySource, ResolvedIdentity};
pub use plan::{Plan, PlanLimits};
pub use quota::{QuotaDecision, QuotaUsage};
