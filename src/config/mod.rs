//! # rmstore Configuration Module
//!
//! This module centralizes all configuration constants for rmstore. The store
//! file layout, compaction buffer, and notification backpressure values are
//! co-located here so a change to one shows its dependents.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation

pub mod constants;
pub use constants::*;
