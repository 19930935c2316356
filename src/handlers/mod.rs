// HTTP surface
//
// Public:  /, /health, /api/tenants/health
// Scoped:  /api/audit (tenant + organization resolved by middleware)

pub mod audit;
pub mod health;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::database::TenantRegistry;
use crate::middleware::tenant_context_middleware;

pub fn app(registry: Arc<TenantRegistry>) -> Router {
    let scoped = Router::new()
        .route("/api/audit", get(audit::list))
        .layer(middleware::from_fn_with_state(registry.clone(), tenant_context_middleware));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/api/tenants/health", get(health::tenants_health))
        .merge(scoped)
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
