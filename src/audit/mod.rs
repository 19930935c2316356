// Append-only audit log and the transactional wrappers that write it

pub mod model;
pub mod service;

pub use model::{AuditAction, AuditLogEntry, AUDIT_ENTITY};
pub use service::{
    run_audited, run_audited_sequence, unit_of_work, AuditRequest, AuditTransaction, OperationDescriptor, UnitOfWork,
};
