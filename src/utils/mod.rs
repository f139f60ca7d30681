//! Utility modules.

pub mod hash;
