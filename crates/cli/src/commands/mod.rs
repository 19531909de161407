//! CLI command implementations

pub mod discover;
pub mod reconcile;
pub mod sanitize;
