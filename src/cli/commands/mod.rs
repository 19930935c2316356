pub mod job;
pub mod tenant;
