//! CLI command implementations.

pub mod mount;
