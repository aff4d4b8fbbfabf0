use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Service tier. Ordering follows the feature hierarchy, so
/// `Plan::Pro >= Plan::Basic` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    Pro,
    Enterprise,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Basic, Plan::Pro, Plan::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Maps a RapidAPI subscription tier to an internal plan.
    /// Unknown or missing tiers fall back to the lowest plan.
    pub fn from_marketplace_tier(tier: Option<&str>) -> Plan {
        match tier.map(|t| t.trim().to_ascii_uppercase()).as_deref() {
            Some("BASIC") => Plan::Basic,
            Some("PRO") => Plan::Pro,
            Some("ULTRA") | Some("MEGA") => Plan::Enterprise,
            _ => Plan::Basic,
        }
    }

    pub fn includes(&self, required: Plan) -> bool {
        *self >= required
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(format!("Unknown plan: {}", other)),
        }
    }
}

/// Quota attached to a plan: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_requests: u64,
    pub window_secs: u64,
}
