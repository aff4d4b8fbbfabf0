use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::db::CountingStore;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyStatus {
    name: String,
    backend: String,
    healthy: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    version: String,
    dependencies: Vec<DependencyStatus>,
}

pub async fn health_check(store: web::Data<CountingStore>) -> impl Responder {
    // Public endpoint: dependency reachability only, no counters or identities
    let store_healthy = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Counting store health check failed: {}", e);
            false
        }
    };

    let response = HealthResponse {
        status: if store_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: vec![DependencyStatus {
            name: "counting_store".to_string(),
            backend: store.backend_name().to_string(),
            healthy: store_healthy,
        }],
    };

    if store_healthy {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
