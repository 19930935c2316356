use thiserror::Error;

use crate::context::actor::OrganizationConflict;

/// Observer system errors with structured error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    #[error("Organization not found")]
    MissingOrganization,

    #[error("Organization filter bypass requested inside a request context")]
    BypassDenied,

    #[error("Actor organization '{actor}' does not match request organization '{request}'")]
    OrganizationMismatch { actor: String, request: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<OrganizationConflict> for ObserverError {
    fn from(conflict: OrganizationConflict) -> Self {
        ObserverError::OrganizationMismatch {
            actor: conflict.actor,
            request: conflict.request,
        }
    }
}
