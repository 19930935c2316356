pub mod response;
pub mod tenant;

pub use response::{ApiResponse, ApiResult};
pub use tenant::{tenant_context_middleware, TenantHandle};
