//! Shared test utilities for ec2-audit
//!
//! This crate provides common test helpers that can be used across
//! multiple test modules without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection for ignored integration tests
//! - [`fixtures`]: Instance/volume builders and a scripted inventory provider

pub mod aws;
pub mod fixtures;

// Re-export commonly used items
pub use aws::get_test_region;
pub use fixtures::{FIXTURE_IMAGE, ScriptedInventory, data_volume, named_instance, root_volume};
