use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::{ready, Ready};
use std::str::FromStr;

use crate::models::plan::Plan;

/// Which billing path created the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Direct,
    Rapidapi,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Direct => "direct",
            IdentitySource::Rapidapi => "rapidapi",
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentitySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(IdentitySource::Direct),
            "rapidapi" => Ok(IdentitySource::Rapidapi),
            other => Err(format!("Unknown identity source: {}", other)),
        }
    }
}

/// Persisted caller record. The per-window request counter is kept by the
/// quota ledger under a window-scoped key, not on this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: String,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub source: IdentitySource,
    pub email: Option<String>,
    pub marketplace_user: Option<String>,
    pub total_requests: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    pub fn direct(identity_key: String, plan: Plan, email: Option<String>) -> Self {
        Self {
            identity_key,
            plan,
            created_at: Utc::now(),
            active: true,
            source: IdentitySource::Direct,
            email,
            marketplace_user: None,
            total_requests: 0,
            last_used_at: None,
        }
    }

    pub fn marketplace(identity_key: String, plan: Plan, marketplace_user: &str) -> Self {
        Self {
            identity_key,
            plan,
            created_at: Utc::now(),
            active: true,
            source: IdentitySource::Rapidapi,
            email: Some(format!("{}@rapidapi.com", marketplace_user)),
            marketplace_user: Some(marketplace_user.to_string()),
            total_requests: 0,
            last_used_at: None,
        }
    }
}

/// The caller a request was admitted for. Inserted into request extensions
/// by the gate middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub identity_key: String,
    pub plan: Plan,
    pub source: IdentitySource,
}

impl From<&IdentityRecord> for ResolvedIdentity {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            identity_key: record.identity_key.clone(),
            plan: record.plan,
            source: record.source,
        }
    }
}

impl FromRequest for ResolvedIdentity {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if let Some(identity) = req.extensions().get::<ResolvedIdentity>() {
            ready(Ok(identity.clone()))
        } else {
            ready(Err(actix_web::error::ErrorUnauthorized("Not authenticated")))
        }
    }
}
