use actix_web::{
    http::{header, Method, StatusCode},
    web, HttpRequest, HttpResponse,
};
use log::{debug, warn};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::identity::ResolvedIdentity;
use crate::services::pdf_engine::{
    EngineBody, EngineRequest, OperationMethod, OperationTarget, PdfEngine, PdfOperation,
};

const PDF_MAGIC: &[u8] = b"%PDF";

fn request_content_type(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Checks plan access and the body shape before handing off to the engine.
fn validate_request(
    operation: PdfOperation,
    identity: &ResolvedIdentity,
    content_type: Option<&str>,
    body: &[u8],
) -> AppResult<()> {
    let required = operation.required_plan();
    if !identity.plan.includes(required) {
        return Err(AppError::Forbidden(format!(
            "The '{}' operation requires the {} plan or higher",
            operation.path_segment(),
            required
        )));
    }

    if operation.method() == OperationMethod::Post && body.is_empty() {
        return Err(AppError::BadRequest("Request body is required".to_string()));
    }

    let is_pdf_body = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/pdf"))
        .unwrap_or(false);
    if is_pdf_body && operation.takes_pdf_input() && !body.starts_with(PDF_MAGIC) {
        return Err(AppError::BadRequest("Body is not a valid PDF document".to_string()));
    }

    Ok(())
}

fn request_method(req: &HttpRequest) -> Option<OperationMethod> {
    if req.method() == Method::GET {
        Some(OperationMethod::Get)
    } else if req.method() == Method::POST {
        Some(OperationMethod::Post)
    } else {
        None
    }
}

/// Forwards an admitted PDF operation to the engine and relays its answer.
pub async fn pdf_operation_handler(
    req: HttpRequest,
    path: web::Path<String>,
    identity: ResolvedIdentity,
    engine: web::Data<Arc<dyn PdfEngine>>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let path = path.into_inner();
    let target = OperationTarget::parse(&path)
        .filter(|target| request_method(&req) == Some(target.operation.method()))
        .ok_or_else(|| AppError::NotFound(format!("Unknown PDF operation '{} {}'", req.method(), path)))?;
    let operation = target.operation;

    let content_type = request_content_type(&req);
    validate_request(operation, &identity, content_type.as_deref(), &body)?;

    debug!(
        "Forwarding {} for {} ({} bytes)",
        operation.path_segment(),
        identity.identity_key,
        body.len()
    );

    let response = engine
        .execute(EngineRequest {
            operation,
            resource: target.resource,
            identity,
            content_type,
            query: req.query_string().to_string(),
            body,
        })
        .await?;

    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!("PDF engine returned invalid status {}", response.status);
        StatusCode::BAD_GATEWAY
    });

    let mut builder = HttpResponse::build(status);
    if let Some(content_type) = response.content_type {
        builder.content_type(content_type);
    }
    Ok(match response.body {
        EngineBody::Full(bytes) => builder.body(bytes),
        EngineBody::Stream(stream) => builder
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .streaming(stream),
    })
}
