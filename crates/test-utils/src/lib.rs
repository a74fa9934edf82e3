//! Shared test utilities for the pixel-zarr workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Deterministic synthetic pixel generators
//! - Ready-made images and an in-memory repository holding them
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, pattern_value};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
