use actix_web::web;

use crate::handlers;
use crate::middleware::GateMiddleware;
use crate::services::gate::Gate;

/// Key administration (/api/v1/keys/*). Guarded by the admin token, not the gate.
pub fn configure_admin_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::post().to(handlers::key_handlers::create_key_handler))
        .route("/deactivate", web::post().to(handlers::key_handlers::deactivate_key_handler))
        .route("/plan", web::post().to(handlers::key_handlers::change_plan_handler));
}

/// Metered routes (/api/v1/*). Mounted behind GateMiddleware.
pub fn configure_gated_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/usage", web::get().to(handlers::usage_handlers::get_usage_handler));

    // PDF operations (/api/v1/pdf/*)
    cfg.service(
        web::scope("/pdf")
            .route("/{operation:.*}", web::get().to(handlers::pdf_handlers::pdf_operation_handler))
            .route("/{operation:.*}", web::post().to(handlers::pdf_handlers::pdf_operation_handler)),
    );
}

/// Registers the whole API surface. The admin scope must come before the
/// gated scope since both share the /api/v1 prefix.
pub fn configure_api(cfg: &mut web::ServiceConfig, gate: Gate) {
    cfg.route("/health", web::get().to(handlers::health::health_check));
    cfg.service(web::scope("/api/v1/keys").configure(configure_admin_routes));
    cfg.service(
        web::scope("/api/v1")
            .wrap(GateMiddleware::new(gate))
            .configure(configure_gated_routes),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;
    use crate::db::repositories::IdentityRepository;
    use crate::db::CountingStore;
    use crate::error::AppResult;
    use crate::models::plan::Plan;
    use crate::security::ApiKeyHasher;
    use crate::services::api_key_service::ApiKeyService;
    use crate::services::pdf_engine::{EngineBody, EngineRequest, EngineResponse, PdfEngine};
    use actix_web::{http::StatusCode, test, App};
    use actix_web::http::header::HeaderValue;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ADMIN_TOKEN: &str = "admin-token-for-tests";
    const PROXY_SECRET: &str = "proxy-secret-for-tests";

    #[derive(Default)]
    struct StubEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PdfEngine for StubEngine {
        async fn execute(&self, request: EngineRequest) -> AppResult<EngineResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = request.engine_path();
            let body = if request.operation.streams_response() {
                let chunks: Vec<AppResult<Bytes>> =
                    vec![Ok(Bytes::from_static(b"%PDF-")), Ok(Bytes::from(path))];
                EngineBody::Stream(Box::pin(stream::iter(chunks)))
            } else {
                EngineBody::Full(Bytes::from(format!("%PDF-{}", path)))
            };
            Ok(EngineResponse {
                status: 200,
                content_type: Some("application/pdf".to_string()),
                body,
            })
        }
    }

    struct TestState {
        settings: AppSettings,
        store: CountingStore,
        gate: Gate,
        keys: ApiKeyService,
        engine: Arc<StubEngine>,
    }

    impl TestState {
        fn new(overrides: &[(&str, &str)]) -> Self {
            Self::with_store(CountingStore::new_memory(), overrides)
        }

        fn with_store(store: CountingStore, overrides: &[(&str, &str)]) -> Self {
            let mut vars = vec![
                ("ADMIN_TOKEN", ADMIN_TOKEN),
                ("RAPIDAPI_PROXY_SECRET", PROXY_SECRET),
                ("RATE_LIMIT_BASIC", "2"),
                ("RATE_LIMIT_PRO", "5"),
            ];
            vars.extend_from_slice(overrides);
            let settings = AppSettings::for_tests(&vars);
            let gate = Gate::new(store.clone(), &settings);
            let keys = ApiKeyService::new(
                IdentityRepository::new(store.clone()),
                ApiKeyHasher::new(&settings.security.api_key_hash_secret),
                settings.security.key_environment.clone(),
            );
            Self {
                settings,
                store,
                gate,
                keys,
                engine: Arc::new(StubEngine::default()),
            }
        }

        fn engine_calls(&self) -> usize {
            self.engine.calls.load(Ordering::SeqCst)
        }

        async fn issue(&self, plan: Plan) -> String {
            self.keys.issue_key("user@example.com", plan).await.unwrap().api_key
        }
    }

    macro_rules! init_app {
        ($state:expr) => {{
            let engine: Arc<dyn PdfEngine> = $state.engine.clone();
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.settings.clone()))
                    .app_data(web::Data::new($state.store.clone()))
                    .app_data(web::Data::new($state.gate.clone()))
                    .app_data(web::Data::new($state.keys.clone()))
                    .app_data(web::Data::new(engine))
                    .app_data(web::PayloadConfig::new($state.settings.server.max_upload_size))
                    .configure(|cfg| configure_api(cfg, $state.gate.clone())),
            )
            .await
        }};
    }

    fn pdf_request(operation: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri(&format!("/api/v1/pdf/{}", operation))
            .insert_header(("Content-Type", "application/pdf"))
            .set_payload("%PDF-1.7 body")
    }

    #[actix_web::test]
    async fn test_missing_credentials_rejected_before_engine() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(&app, pdf_request("merge").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["code"], 401);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_quota_exhaustion_returns_429_with_retry_after() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        for _ in 0..2 {
            let res = test::call_service(
                &app,
                pdf_request("merge").insert_header(("X-API-Key", api_key.as_str())).to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = test::call_service(
            &app,
            pdf_request("merge").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry_after: u64 = res
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap();
        assert!((1..=3600).contains(&retry_after));
        assert_eq!(state.engine_calls(), 2);
    }

    #[actix_web::test]
    async fn test_bad_proxy_secret_forbidden() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            pdf_request("merge")
                .insert_header(("X-RapidAPI-Proxy-Secret", "wrong"))
                .insert_header(("X-RapidAPI-User", "mallory"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_direct_key_takes_precedence_over_marketplace_headers() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/usage")
                .insert_header(("Authorization", format!("ApiKey {}", api_key)))
                .insert_header(("X-RapidAPI-Proxy-Secret", "wrong"))
                .insert_header(("X-RapidAPI-User", "mallory"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let body: Value = test::read_body_json(res).await;
        assert!(body["identity"].as_str().unwrap().starts_with("key:"));
    }

    #[actix_web::test]
    async fn test_marketplace_pro_subscriber_can_compress() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            pdf_request("compress")
                .insert_header(("X-RapidAPI-Proxy-Secret", PROXY_SECRET))
                .insert_header(("X-RapidAPI-User", "ulrich"))
                .insert_header(("X-RapidAPI-Subscription", "PRO"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "4");

        let body = test::read_body(res).await;
        assert_eq!(body, Bytes::from_static(b"%PDF-compress"));
    }

    #[actix_web::test]
    async fn test_basic_plan_cannot_use_premium_operation() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            pdf_request("watermark").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_unknown_operation_not_found() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Enterprise).await;

        let res = test::call_service(
            &app,
            pdf_request("ocr").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_oversized_body_rejected() {
        let state = TestState::new(&[("MAX_UPLOAD_SIZE", "16")]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/pdf/rotate")
                .insert_header(("X-API-Key", api_key.as_str()))
                .insert_header(("Content-Type", "application/pdf"))
                .set_payload(vec![b'%'; 64])
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_usage_counts_itself() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        test::call_service(
            &app,
            pdf_request("split").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/usage")
                .insert_header(("X-API-Key", api_key.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["plan"], "basic");
        assert_eq!(body["used"], 2);
        assert_eq!(body["limit"], 2);
        assert_eq!(body["remaining"], 0);
        assert_eq!(body["percentage_used"], 100.0);
    }

    #[actix_web::test]
    async fn test_admin_issue_deactivate_flow() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/keys")
                .insert_header(("X-Admin-Token", ADMIN_TOKEN))
                .set_json(serde_json::json!({ "email": "new@example.com", "plan": "pro" }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let issued: Value = test::read_body_json(res).await;
        let api_key = issued["api_key"].as_str().unwrap().to_string();
        assert!(api_key.starts_with("pdf_test_"));
        assert_eq!(issued["plan"], "pro");

        let res = test::call_service(
            &app,
            pdf_request("compress").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/keys/deactivate")
                .insert_header(("X-Admin-Token", ADMIN_TOKEN))
                .set_json(serde_json::json!({ "api_key": api_key }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(
            &app,
            pdf_request("compress").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.engine_calls(), 1);
    }

    #[actix_web::test]
    async fn test_admin_plan_change_applies_to_marketplace_identity() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let marketplace = |req: test::TestRequest| {
            req.insert_header(("X-RapidAPI-Proxy-Secret", PROXY_SECRET))
                .insert_header(("X-RapidAPI-User", "vera"))
                .insert_header(("X-RapidAPI-Subscription", "BASIC"))
        };

        let res = test::call_service(&app, marketplace(pdf_request("secure")).to_request()).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/keys/plan")
                .insert_header(("X-Admin-Token", ADMIN_TOKEN))
                .set_json(serde_json::json!({ "identity_key": "rapidapi:vera", "plan": "enterprise" }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = test::call_service(&app, marketplace(pdf_request("secure")).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_admin_routes_require_token() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/keys")
                .set_json(serde_json::json!({ "email": "new@example.com" }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/keys")
                .insert_header(("X-Admin-Token", "guess"))
                .set_json(serde_json::json!({ "email": "new@example.com" }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_health_is_not_gated() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_undecodable_proxy_secret_forbidden() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            pdf_request("merge")
                .insert_header(("X-RapidAPI-Proxy-Secret", HeaderValue::from_bytes(b"wr\xffong").unwrap()))
                .insert_header(("X-RapidAPI-User", "mallory"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_undecodable_api_key_not_replaced_by_marketplace_identity() {
        let state = TestState::new(&[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            pdf_request("merge")
                .insert_header(("X-API-Key", HeaderValue::from_bytes(b"pdf_\xfftest").unwrap()))
                .insert_header(("X-RapidAPI-Proxy-Secret", PROXY_SECRET))
                .insert_header(("X-RapidAPI-User", "ulrich"))
                .insert_header(("X-RapidAPI-Subscription", "PRO"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_lowercase_bearer_scheme_accepted() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            pdf_request("split")
                .insert_header(("Authorization", format!("bearer {}", api_key)))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_quota_rejection_carries_rate_limit_headers() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        for _ in 0..2 {
            test::call_service(
                &app,
                pdf_request("split").insert_header(("X-API-Key", api_key.as_str())).to_request(),
            )
            .await;
        }

        let res = test::call_service(
            &app,
            pdf_request("split").insert_header(("X-API-Key", api_key.as_str())).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "2");
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(res.headers().get("x-ratelimit-reset"), res.headers().get("retry-after"));
    }

    #[actix_web::test]
    async fn test_unavailable_store_returns_503_before_engine() {
        let state = TestState::with_store(CountingStore::new_unavailable(), &[]);
        let app = init_app!(state);

        let res = test::call_service(
            &app,
            pdf_request("merge").insert_header(("X-API-Key", "pdf_test_anything")).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["error_type"], "store_unavailable");
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_health_degraded_when_store_unavailable() {
        let state = TestState::with_store(CountingStore::new_unavailable(), &[]);
        let app = init_app!(state);

        let res = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["status"], "degraded");
    }

    #[actix_web::test]
    async fn test_get_operations_are_gated_and_forwarded() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/pdf/templates/invoice")
                .insert_header(("X-API-Key", api_key.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "1");
        assert_eq!(test::read_body(res).await, Bytes::from_static(b"%PDF-templates/invoice"));

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/v1/pdf/download/images/f00d")
                .insert_header(("X-API-Key", api_key.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(test::read_body(res).await, Bytes::from_static(b"%PDF-download/images/f00d"));
        assert_eq!(state.engine_calls(), 2);
    }

    #[actix_web::test]
    async fn test_wrong_method_or_bad_file_id_not_found() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Enterprise).await;

        for req in [
            test::TestRequest::get().uri("/api/v1/pdf/merge"),
            test::TestRequest::post().uri("/api/v1/pdf/templates").set_payload("{}"),
            test::TestRequest::get().uri("/api/v1/pdf/download/.secret"),
        ] {
            let res = test::call_service(
                &app,
                req.insert_header(("X-API-Key", api_key.as_str())).to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }
        assert_eq!(state.engine_calls(), 0);
    }

    #[actix_web::test]
    async fn test_generate_stream_relays_chunks() {
        let state = TestState::new(&[]);
        let app = init_app!(state);
        let api_key = state.issue(Plan::Basic).await;

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/pdf/generate/stream")
                .insert_header(("X-API-Key", api_key.as_str()))
                .set_json(serde_json::json!({ "html": "<p>hello</p>" }))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("cache-control").unwrap(), "no-cache");
        assert_eq!(test::read_body(res).await, Bytes::from_static(b"%PDF-generate/stream"));
    }
}
