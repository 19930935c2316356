use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::TenantRegistry;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "PMS data core",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "tenants": "/api/tenants/health (public - liveness of cached tenant connections)",
                "audit": "/api/audit (x-tenant-key, x-organization-id)",
            }
        }
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": chrono::Utc::now(),
        }
    }))
}

/// Probe every cached tenant connection; failed ones are evicted
pub async fn tenants_health(State(registry): State<Arc<TenantRegistry>>) -> impl IntoResponse {
    let tenants = registry.probe_all().await;
    let healthy = tenants.iter().all(|t| t.healthy);
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "success": healthy,
            "data": {
                "status": if healthy { "ok" } else { "degraded" },
                "timestamp": chrono::Utc::now(),
                "tenants": tenants,
            }
        })),
    )
}
