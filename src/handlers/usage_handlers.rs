use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::identity::ResolvedIdentity;
use crate::models::plan::Plan;
use crate::models::quota::QuotaUsage;
use crate::services::gate::Gate;

/// Response data structure for the usage report
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageResponse {
    pub identity: String,
    pub plan: Plan,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub window_secs: u64,
    pub reset_at: String,
    pub percentage_used: f64,
    pub total_requests: u64,
}

/// Current-window usage for the caller. This request is itself counted.
pub async fn get_usage_handler(
    req: HttpRequest,
    identity: ResolvedIdentity,
    gate: web::Data<Gate>,
) -> AppResult<HttpResponse> {
    let usage = req.extensions().get::<QuotaUsage>().copied();
    let usage = match usage {
        Some(usage) => usage,
        None => {
            let limits = gate.registry().limits_for(identity.plan);
            gate.ledger()
                .usage_at(&identity.identity_key, limits, Utc::now())
                .await?
        }
    };

    let total_requests = gate
        .identities()
        .find(&identity.identity_key)
        .await?
        .map(|record| record.total_requests)
        .unwrap_or_default();

    let response = UsageResponse {
        identity: identity.identity_key,
        plan: identity.plan,
        used: usage.count,
        limit: usage.limit,
        remaining: usage.remaining(),
        window_secs: usage.window_secs,
        reset_at: usage.reset_at.to_rfc3339(),
        percentage_used: (usage.percentage_used() * 100.0).round() / 100.0,
        total_requests,
    };

    Ok(HttpResponse::Ok().json(response))
}
