use actix_web::http::header::{HeaderMap, AUTHORIZATION};

use crate::error::AppError;
use crate::services::identity_resolver::Credentials;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const PROXY_SECRET_HEADER: &str = "x-rapidapi-proxy-secret";
pub const MARKETPLACE_USER_HEADER: &str = "x-rapidapi-user";
pub const MARKETPLACE_SUBSCRIPTION_HEADER: &str = "x-rapidapi-subscription";

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

/// Extract API key from request headers
/// Priority: X-API-Key header first, then Authorization: ApiKey <key>,
/// then Authorization: Bearer <key>. Schemes are matched case-insensitively.
///
/// A key header that is present but not visible ASCII is an invalid key,
/// never an absent one.
pub fn extract_api_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    if let Some(value) = headers.get(API_KEY_HEADER) {
        let key = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid API key".to_string()))?
            .trim();
        if !key.is_empty() {
            return Ok(Some(key.to_string()));
        }
    }

    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let auth = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("Malformed Authorization header".to_string()))?;

    let Some((scheme, key)) = auth.trim().split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("apikey") && !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }

    let key = key.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

/// Picks the credentials a request is resolved with. A direct key wins over
/// marketplace headers when both are present.
pub fn extract_credentials(headers: &HeaderMap) -> Result<Option<Credentials>, AppError> {
    if let Some(api_key) = extract_api_key(headers)? {
        return Ok(Some(Credentials::ApiKey(api_key)));
    }

    let Some(secret) = headers.get(PROXY_SECRET_HEADER) else {
        return Ok(None);
    };
    let proxy_secret = secret
        .to_str()
        .map_err(|_| AppError::Forbidden("Invalid RapidAPI proxy secret".to_string()))?;

    Ok(Some(Credentials::Marketplace {
        proxy_secret: proxy_secret.to_string(),
        user: optional_header(headers, MARKETPLACE_USER_HEADER),
        subscription: optional_header(headers, MARKETPLACE_SUBSCRIPTION_HEADER),
    }))
}
