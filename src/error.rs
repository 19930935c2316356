// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::error::{ConstraintKind, ConstraintViolation, DataError};

/// One field-level validation entry in a 422 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub msg: String,
    pub path: String,
    pub location: &'static str,
}

impl FieldError {
    pub fn body(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: "field",
            msg: msg.into(),
            path: path.into(),
            location: "body",
        }
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 422 Unprocessable Entity
    UnprocessableEntity {
        message: String,
        field_errors: Vec<FieldError>,
    },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::UnprocessableEntity { .. } => 422,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::UnprocessableEntity { message, .. } => message,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::UnprocessableEntity { .. } => "UNPROCESSABLE_ENTITY",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ApiError::UnprocessableEntity { message, field_errors } => json!({
                "success": false,
                "message": message,
                "code": self.error_code(),
                "errors": field_errors,
            }),
            _ => json!({
                "success": false,
                "message": self.message(),
                "code": self.error_code(),
            }),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    fn from_constraint(violation: &ConstraintViolation) -> Self {
        match violation.kind {
            ConstraintKind::Unique | ConstraintKind::NotNull if !violation.fields.is_empty() => {
                let suffix = if violation.kind == ConstraintKind::Unique { "must be unique" } else { "is required" };
                ApiError::UnprocessableEntity {
                    message: "Validation failed".to_string(),
                    field_errors: violation
                        .fields
                        .iter()
                        .map(|field| FieldError::body(field.clone(), format!("{} {}", field, suffix)))
                        .collect(),
                }
            }
            ConstraintKind::ForeignKey => ApiError::Conflict("Referenced record does not exist".to_string()),
            _ => ApiError::UnprocessableEntity {
                message: violation.to_string(),
                field_errors: Vec::new(),
            },
        }
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err.root_cause() {
            DataError::TenantNotFound(key) => ApiError::not_found(format!("Tenant not found: {}", key)),
            DataError::ConnectionAuthentication { tenant, reason } => {
                tracing::error!("Tenant {} connection failed: {}", tenant, reason);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DataError::MissingOrganizationContext => ApiError::forbidden("Organization not found"),
            DataError::OrganizationBypassDenied | DataError::OrganizationMismatch { .. } => {
                tracing::warn!("Organization guard rejected request: {}", err);
                ApiError::forbidden("Organization access denied")
            }
            DataError::Constraint(violation) => ApiError::from_constraint(violation),
            DataError::PoolTimeout => ApiError::service_unavailable("Database busy, retry later"),
            DataError::NotFound(msg) => ApiError::not_found(msg.clone()),
            DataError::UnknownEntity(name) => ApiError::not_found(format!("Unknown entity: {}", name)),
            DataError::AppendOnly(_)
            | DataError::InvalidValue { .. }
            | DataError::InvalidOperation(_)
            | DataError::Query(_)
            | DataError::Serialization(_) => ApiError::bad_request(err.root_cause().to_string()),
            other => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Data access error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_maps_to_field_errors() {
        let err = DataError::Constraint(ConstraintViolation {
            kind: ConstraintKind::Unique,
            constraint: None,
            fields: vec!["code".to_string()],
            message: "UNIQUE constraint failed: pms_projects.code".to_string(),
        });
        let api = ApiError::from(err);
        assert_eq!(api.status_code(), 422);
        assert_eq!(
            api.to_json()["errors"],
            json!([{ "type": "field", "msg": "code must be unique", "path": "code", "location": "body" }])
        );
    }

    #[test]
    fn aborted_errors_map_by_root_cause() {
        let api = ApiError::from(DataError::aborted(DataError::MissingOrganizationContext));
        assert_eq!(api.status_code(), 403);
        assert_eq!(api.message(), "Organization not found");

        let api = ApiError::from(DataError::aborted(DataError::PoolTimeout));
        assert_eq!(api.status_code(), 503);
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let api = ApiError::from(DataError::Sqlx(sqlx::Error::RowNotFound));
        assert_eq!(api.status_code(), 500);
        assert!(!api.message().contains("RowNotFound"));
    }
}
