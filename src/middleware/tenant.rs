use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::config::CONFIG;
use crate::context::{run_with_context, ActorContext};
use crate::database::{TenantConnection, TenantRegistry};
use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-key";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Tenant connection resolved for the current request
#[derive(Clone)]
pub struct TenantHandle(pub Arc<TenantConnection>);

/// Resolves the tenant and organization for a request and runs the rest of
/// the request inside the ambient organization scope.
///
/// Inserts a [`TenantHandle`] and the request's [`ActorContext`] into the
/// request extensions. Requests without an organization are rejected here so
/// no handler ever runs unscoped.
pub async fn tenant_context_middleware(
    State(registry): State<Arc<TenantRegistry>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();

    let tenant_key = header(headers, TENANT_HEADER).unwrap_or_else(|| CONFIG.tenants.default_tenant.clone());
    let organization_id = header(headers, ORGANIZATION_HEADER).ok_or_else(|| ApiError::forbidden("Organization not found"))?;

    let mut actor = ActorContext::new().with_organization(organization_id.clone());
    if let Some(user_id) = header(headers, USER_ID_HEADER) {
        actor = actor.with_user(user_id, header(headers, USER_NAME_HEADER));
    }
    if let Some(user_agent) = header(headers, axum::http::header::USER_AGENT.as_str()) {
        actor = actor.with_user_agent(user_agent);
    }
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip().to_string());
    if let Some(ip) = client_ip(headers).or(peer) {
        actor = actor.with_ip(ip);
    }

    let conn = registry.get_or_create(&tenant_key).await?;

    tracing::debug!("Request scoped to tenant {} organization {}", tenant_key, organization_id);
    request.extensions_mut().insert(TenantHandle(conn));
    request.extensions_mut().insert(actor);

    Ok(run_with_context(organization_id, next.run(request)).await)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// First address of `x-forwarded-for`
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header(headers, FORWARDED_FOR_HEADER).and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
}
