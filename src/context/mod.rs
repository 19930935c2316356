// Request-scoped security context.
//
// `request` holds the ambient organization scope that follows a request through
// every await point; `actor` is the explicit who/where passed into writes.

pub mod actor;
pub mod request;

pub use actor::{ActorContext, ActorUser, OrganizationConflict};
pub use request::{current, current_organization_id, is_active, run_with_context, spawn_with_context, RequestContext};
