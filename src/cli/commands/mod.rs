//! CLI command implementations.

pub mod backup;
pub mod daemon;
pub mod device;
pub mod drift;
pub mod job;
