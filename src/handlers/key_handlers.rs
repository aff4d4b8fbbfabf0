use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::AdminAccess;
use crate::models::plan::Plan;
use crate::services::api_key_service::{ApiKeyService, KeyTarget};

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub email: String,
    #[serde(default)]
    pub plan: Option<Plan>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub api_key: Option<String>,
    pub identity_key: Option<String>,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct KeyStatusResponse {
    pub identity_key: String,
    pub status: String,
}

/// Issues a new direct API key. The raw key appears only in this response.
pub async fn create_key_handler(
    _admin: AdminAccess,
    service: web::Data<ApiKeyService>,
    payload: web::Json<CreateKeyRequest>,
) -> AppResult<HttpResponse> {
    let plan = payload.plan.unwrap_or(Plan::Basic);
    let issued = service.issue_key(&payload.email, plan).await?;
    Ok(HttpResponse::Created().json(issued))
}

pub async fn deactivate_key_handler(
    _admin: AdminAccess,
    service: web::Data<ApiKeyService>,
    payload: web::Json<DeactivateKeyRequest>,
) -> AppResult<HttpResponse> {
    let identity_key = service
        .deactivate(&KeyTarget::ApiKey(payload.into_inner().api_key))
        .await?;
    Ok(HttpResponse::Ok().json(KeyStatusResponse {
        identity_key,
        status: "deactivated".to_string(),
    }))
}

pub async fn change_plan_handler(
    _admin: AdminAccess,
    service: web::Data<ApiKeyService>,
    payload: web::Json<ChangePlanRequest>,
) -> AppResult<HttpResponse> {
    let ChangePlanRequest {
        api_key,
        identity_key,
        plan,
    } = payload.into_inner();

    let target = match (api_key, identity_key) {
        (Some(api_key), None) => KeyTarget::ApiKey(api_key),
        (None, Some(identity_key)) => KeyTarget::IdentityKey(identity_key),
        _ => {
            return Err(AppError::Validation(
                "Exactly one of api_key or identity_key is required".to_string(),
            ));
        }
    };

    let identity_key = service.change_plan(&target, plan).await?;
    Ok(HttpResponse::Ok().json(KeyStatusResponse {
        identity_key,
        status: format!("plan changed to {}", plan),
    }))
}
