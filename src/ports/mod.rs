//! Port traits the core consumes and exposes (collaborator seams).

pub mod config_port;
pub mod data_port;
pub mod report_port;
