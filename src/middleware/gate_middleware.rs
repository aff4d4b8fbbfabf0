use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        Method,
        header::{HeaderMap, HeaderName, HeaderValue},
    },
    Error, HttpMessage, ResponseError,
};
use futures_util::future::{LocalBoxFuture, Ready, ok};
use log::{debug, warn};
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::middleware::credentials::extract_credentials;
use crate::models::quota::QuotaUsage;
use crate::services::gate::Gate;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

fn apply_rate_limit_headers(headers: &mut HeaderMap, usage: &QuotaUsage) {
    let values = [
        (RATE_LIMIT_LIMIT_HEADER, usage.limit),
        (RATE_LIMIT_REMAINING_HEADER, usage.remaining()),
        (RATE_LIMIT_RESET_HEADER, usage.reset_after_secs),
    ];
    for (name, value) in values {
        headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
    }
}

/// Runs every wrapped request through the gate before the handler sees it.
/// Rejected requests are answered here and never reach the inner service.
pub struct GateMiddleware {
    gate: Gate,
}

impl GateMiddleware {
    pub fn new(gate: Gate) -> Self {
        Self { gate }
    }
}

impl<S, B> Transform<S, ServiceRequest> for GateMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = GateMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(GateMiddlewareService {
            service: Rc::new(service),
            gate: self.gate.clone(),
        })
    }
}

pub struct GateMiddlewareService<S> {
    service: Rc<S>,
    gate: Gate,
}

impl<S, B> Service<ServiceRequest> for GateMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let gate = self.gate.clone();

        Box::pin(async move {
            // CORS preflight carries no credentials
            if req.method() == Method::OPTIONS {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let path = req.path().to_string();
            let credentials = match extract_credentials(req.headers()) {
                Ok(credentials) => credentials,
                Err(err) => {
                    warn!("Unreadable credentials on request to {}: {}", path, err);
                    return Ok(req.into_response(err.error_response()).map_into_right_body());
                }
            };

            match gate.admit(credentials.as_ref()).await {
                Ok(admission) => {
                    debug!(
                        "Admitted {} for {} ({} of {})",
                        path, admission.identity.identity_key, admission.usage.count, admission.usage.limit
                    );
                    req.extensions_mut().insert(admission.identity);
                    req.extensions_mut().insert(admission.usage);

                    let mut res = service.call(req).await?;
                    apply_rate_limit_headers(res.headers_mut(), &admission.usage);
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    warn!("Gate rejected request to {}: {}", path, err);
                    let response = err.error_response();
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::RateLimitConfig;
    use crate::db::repositories::{IdentityRepository, QuotaRepository};
    use crate::db::store::CountingStore;
    use crate::models::identity::{IdentityRecord, ResolvedIdentity};
    use crate::models::plan::{Plan, PlanLimits};
    use crate::security::ApiKeyHasher;
    use crate::services::identity_resolver::IdentityResolver;
    use crate::services::plan_registry::PlanRegistry;
    use crate::services::quota_ledger::QuotaLedger;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn gate_with_key(limit: u64) -> Gate {
        let store = CountingStore::new_memory();
        let identities = IdentityRepository::new(store.clone());
        let hasher = ApiKeyHasher::new(SECRET);
        let record = IdentityRecord::direct(
            hasher.identity_key_for("pdf_test_mw").unwrap(),
            Plan::Basic,
            None,
        );
        identities.create_if_absent(&record).await.unwrap();

        let limits = PlanLimits { max_requests: limit, window_secs: 3600 };
        Gate::from_parts(
            IdentityResolver::new(identities.clone(), hasher, None),
            QuotaLedger::new(QuotaRepository::new(store)),
            PlanRegistry::new(RateLimitConfig { basic: limits, pro: limits, enterprise: limits }),
            identities,
        )
    }

    #[actix_web::test]
    async fn test_gate_blocks_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = test::init_service(
            App::new().service(
                web::scope("/gated")
                    .wrap(GateMiddleware::new(gate_with_key(1).await))
                    .route(
                        "/echo",
                        web::get().to(move |identity: ResolvedIdentity| {
                            let counter = counter.clone();
                            async move {
                                counter.fetch_add(1, Ordering::SeqCst);
                                HttpResponse::Ok().body(identity.identity_key)
                            }
                        }),
                    ),
            ),
        )
        .await;

        let missing = test::call_service(&app, test::TestRequest::get().uri("/gated/echo").to_request()).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let first = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/gated/echo")
                .insert_header(("X-API-Key", "pdf_test_mw"))
                .to_request(),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get(RATE_LIMIT_LIMIT_HEADER).unwrap(), "1");
        assert_eq!(first.headers().get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");

        let second = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/gated/echo")
                .insert_header(("X-API-Key", "pdf_test_mw"))
                .to_request(),
        )
        .await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        assert_eq!(second.headers().get(RATE_LIMIT_LIMIT_HEADER).unwrap(), "1");
        assert_eq!(second.headers().get(RATE_LIMIT_REMAINING_HEADER).unwrap(), "0");
        assert_eq!(
            second.headers().get(RATE_LIMIT_RESET_HEADER),
            second.headers().get("retry-after")
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_undecodable_api_key_rejected_before_handler() {
        let app = test::init_service(
            App::new().service(
                web::scope("/gated")
                    .wrap(GateMiddleware::new(gate_with_key(5).await))
                    .route("/echo", web::get().to(|| async { HttpResponse::Ok().finish() })),
            ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/gated/echo")
            .insert_header(("X-API-Key", HeaderValue::from_bytes(b"pdf_\xfftest").unwrap()))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(!res.headers().contains_key(RATE_LIMIT_LIMIT_HEADER));
    }

    #[actix_web::test]
    async fn test_options_passes_through_uncounted() {
        let app = test::init_service(
            App::new().service(
                web::scope("/gated")
                    .wrap(GateMiddleware::new(gate_with_key(1).await))
                    .route("/echo", web::method(Method::OPTIONS).to(|| async { HttpResponse::NoContent().finish() })),
            ),
        )
        .await;

        let res = test::call_service(
            &app,
            test::TestRequest::default()
                .method(Method::OPTIONS)
                .uri("/gated/echo")
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
}
