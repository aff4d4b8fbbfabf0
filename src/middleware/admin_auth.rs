use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use log::warn;
use std::future::{ready, Ready};

use crate::config::AppSettings;
use crate::error::AppError;
use crate::security::constant_time_equal;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Proof that the request carried the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

fn check_admin_token(req: &HttpRequest) -> Result<AdminAccess, AppError> {
    let settings = req
        .app_data::<web::Data<AppSettings>>()
        .ok_or_else(|| AppError::Internal("Settings not registered".to_string()))?;

    let expected = settings
        .security
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Forbidden("Key administration is disabled".to_string()))?;

    let presented = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !constant_time_equal(presented, expected) {
        warn!("Rejected admin request to {}", req.path());
        return Err(AppError::Forbidden("Invalid admin token".to_string()));
    }

    Ok(AdminAccess)
}

impl FromRequest for AdminAccess {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(check_admin_token(req))
    }
}
