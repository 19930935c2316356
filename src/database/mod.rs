pub mod catalog;
pub mod connection;
pub mod connector;
pub mod entity;
pub mod error;
pub mod migrate;
pub mod query_builder;
pub mod record;
pub mod registry;
pub mod repository;

pub use catalog::{Dialect, TenantCatalog, TenantEntry};
pub use connection::TenantConnection;
pub use connector::{SqlxConnector, TenantConnector};
pub use entity::{ColumnType, EntityDef, EntityRegistry};
pub use error::{ConstraintKind, ConstraintViolation, DataError};
pub use record::{Record, RecordError, RecordState};
pub use registry::{TenantHealth, TenantRegistry};
pub use repository::{QueryOptions, Repository};
