use std::fmt;

use serde::Serialize;
use sqlx::error::{DatabaseError as SqlxDatabaseError, ErrorKind};
use thiserror::Error;

use crate::context::OrganizationConflict;
use crate::filter::FilterError;
use crate::observer::ObserverError;

/// Errors surfaced by the data-access core
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Connection authentication failed for tenant '{tenant}': {reason}")]
    ConnectionAuthentication { tenant: String, reason: String },

    #[error("Organization not found")]
    MissingOrganizationContext,

    #[error("Organization filter bypass is not allowed inside a request context")]
    OrganizationBypassDenied,

    #[error("Actor organization '{actor}' does not match request organization '{request}'")]
    OrganizationMismatch { actor: String, request: String },

    #[error("Transaction aborted: {cause}")]
    TransactionAborted {
        #[source]
        cause: Box<DataError>,
    },

    #[error("{0}")]
    Constraint(ConstraintViolation),

    #[error("Timed out waiting for a database connection")]
    PoolTimeout,

    #[error("Entity '{0}' is append-only")]
    AppendOnly(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid value for '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query error: {0}")]
    Query(#[from] FilterError),

    #[error("Observer error: {0}")]
    Observer(ObserverError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl DataError {
    /// Wrap a failure that happened inside an audited transaction.
    /// Constraint violations keep their identity; already wrapped errors are not wrapped twice.
    pub fn aborted(cause: DataError) -> Self {
        match cause {
            DataError::Constraint(_) | DataError::TransactionAborted { .. } => cause,
            other => DataError::TransactionAborted { cause: Box::new(other) },
        }
    }

    /// The innermost error behind any `TransactionAborted` layers
    pub fn root_cause(&self) -> &DataError {
        match self {
            DataError::TransactionAborted { cause } => cause.root_cause(),
            other => other,
        }
    }

    /// Safe to retry the whole unit of work later
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), DataError::PoolTimeout)
    }

    pub fn constraint(&self) -> Option<&ConstraintViolation> {
        match self {
            DataError::Constraint(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DataError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => DataError::PoolTimeout,
            sqlx::Error::Database(db) => match ConstraintViolation::from_database_error(db.as_ref()) {
                Some(violation) => DataError::Constraint(violation),
                None => DataError::Sqlx(sqlx::Error::Database(db)),
            },
            other => DataError::Sqlx(other),
        }
    }
}

impl From<OrganizationConflict> for DataError {
    fn from(conflict: OrganizationConflict) -> Self {
        DataError::OrganizationMismatch {
            actor: conflict.actor,
            request: conflict.request,
        }
    }
}

impl From<ObserverError> for DataError {
    fn from(error: ObserverError) -> Self {
        match error {
            ObserverError::MissingOrganization => DataError::MissingOrganizationContext,
            ObserverError::BypassDenied => DataError::OrganizationBypassDenied,
            ObserverError::OrganizationMismatch { actor, request } => DataError::OrganizationMismatch { actor, request },
            other => DataError::Observer(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

/// Integrity violation reported by the database, passed through to callers unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub constraint: Option<String>,
    pub fields: Vec<String>,
    pub message: String,
}

impl ConstraintViolation {
    pub fn from_database_error(error: &dyn SqlxDatabaseError) -> Option<Self> {
        let kind = match error.kind() {
            ErrorKind::UniqueViolation => ConstraintKind::Unique,
            ErrorKind::ForeignKeyViolation => ConstraintKind::ForeignKey,
            ErrorKind::NotNullViolation => ConstraintKind::NotNull,
            ErrorKind::CheckViolation => ConstraintKind::Check,
            _ => return None,
        };

        let mut fields = Vec::new();
        if let Some(pg) = error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            if let Some(detail) = pg.detail() {
                fields = Self::fields_from_pg_detail(detail);
            }
            if fields.is_empty() {
                fields.extend(pg.column().map(str::to_string));
            }
        } else {
            fields = Self::fields_from_sqlite_message(error.message());
        }

        Some(Self {
            kind,
            constraint: error.constraint().map(str::to_string),
            fields,
            message: error.message().to_string(),
        })
    }

    /// `Key (organization_id, code)=(org-a, PRJ) already exists.`
    fn fields_from_pg_detail(detail: &str) -> Vec<String> {
        detail
            .strip_prefix("Key (")
            .and_then(|rest| rest.split_once(")="))
            .map(|(columns, _)| columns.split(',').map(|c| c.trim().trim_matches('"').to_string()).collect())
            .unwrap_or_default()
    }

    /// `UNIQUE constraint failed: pms_projects.organization_id, pms_projects.code`
    fn fields_from_sqlite_message(message: &str) -> Vec<String> {
        message
            .split_once("failed: ")
            .map(|(_, columns)| {
                columns
                    .split(',')
                    .map(|c| c.trim().rsplit('.').next().unwrap_or_default().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConstraintKind::Unique => write!(f, "Unique constraint violated on ({})", self.fields.join(", ")),
            ConstraintKind::ForeignKey => write!(f, "Foreign key constraint violated: {}", self.message),
            ConstraintKind::NotNull => write!(f, "Required value missing: {}", self.message),
            ConstraintKind::Check => write!(f, "Check constraint violated: {}", self.message),
        }
    }
}
