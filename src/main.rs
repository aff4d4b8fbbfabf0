use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;

use pdf_gateway_server::config::init_config;
use pdf_gateway_server::db::memory_store::start_memory_store_cleanup_task;
use pdf_gateway_server::db::repositories::IdentityRepository;
use pdf_gateway_server::db::{create_counting_store, verify_connection, CountingStore};
use pdf_gateway_server::routes::configure_api;
use pdf_gateway_server::security::ApiKeyHasher;
use pdf_gateway_server::services::{ApiKeyService, Gate, HttpPdfEngine, PdfEngine};

const MEMORY_CLEANUP_INTERVAL_SECS: u64 = 300;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match init_config() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Counting store setup
    let store = match create_counting_store(&app_settings.store).await {
        Ok(store) => {
            if let Err(e) = verify_connection(&store).await {
                log::error!("Counting store verification failed: {}", e);
                log::error!("Cannot start server without a working counting store");
                std::process::exit(1);
            }
            log::info!("Counting store ({}) ready", store.backend_name());
            store
        }
        Err(e) => {
            log::error!("Failed to create counting store: {}", e);
            log::error!("Cannot start server without a working counting store");
            std::process::exit(1);
        }
    };

    if let CountingStore::Memory(memory) = &store {
        tokio::spawn(start_memory_store_cleanup_task(
            memory.clone(),
            MEMORY_CLEANUP_INTERVAL_SECS,
        ));
    }

    // Services
    let gate = Gate::new(store.clone(), &app_settings);
    for (plan, limits) in gate.registry().entries() {
        log::info!(
            "Plan {}: {} requests per {}s",
            plan, limits.max_requests, limits.window_secs
        );
    }
    let key_service = ApiKeyService::new(
        IdentityRepository::new(store.clone()),
        ApiKeyHasher::new(&app_settings.security.api_key_hash_secret),
        app_settings.security.key_environment.clone(),
    );
    let pdf_engine: Arc<dyn PdfEngine> = match HttpPdfEngine::new(&app_settings.pdf_engine) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            log::error!("Failed to initialize PDF engine client: {}", e);
            std::process::exit(1);
        }
    };

    if app_settings.security.admin_token.is_none() {
        log::warn!("ADMIN_TOKEN is not set; key administration routes are disabled");
    }

    // Get server host and port from settings
    let host = &app_settings.server.host;
    let port = app_settings.server.port;

    log::info!("Starting {} at http://{}:{}", app_settings.app.name, host, port);

    let server_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(server_addr)?;

    let settings_data = web::Data::new(app_settings.clone());
    let store_data = web::Data::new(store);
    let gate_data = web::Data::new(gate.clone());
    let key_service_data = web::Data::new(key_service);
    let pdf_engine_data = web::Data::new(pdf_engine);

    HttpServer::new(move || {
        // Configure CORS using actix-cors
        let mut cors = Cors::default();

        // Add allowed origins based on configuration
        if app_settings.server.cors_origins.iter().any(|o| o == "*") {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }

        cors = cors
            .allow_any_method()
            .allow_any_header()
            .expose_headers([
                "x-ratelimit-limit",
                "x-ratelimit-remaining",
                "x-ratelimit-reset",
                "retry-after",
            ]);

        let gate = gate.clone();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(settings_data.clone())
            .app_data(store_data.clone())
            .app_data(gate_data.clone())
            .app_data(key_service_data.clone())
            .app_data(pdf_engine_data.clone())
            .app_data(web::PayloadConfig::new(app_settings.server.max_upload_size))
            .configure(move |cfg| configure_api(cfg, gate))
    })
    .listen(listener)?
    .run()
    .await
}
