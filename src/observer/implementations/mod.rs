// Observer implementations organized by rings

// Ring 2: Security - organization scoping on reads
#[path = "2/organization_scope.rs"]
pub mod organization_scope;

// Ring 4: Enrichment - audit field stamping on writes
#[path = "4/audit_stamp.rs"]
pub mod audit_stamp;

pub use audit_stamp::*;
pub use organization_scope::*;
