#![allow(dead_code, unused_imports)] // Each test binary uses a different subset

//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - Seeded in-memory stores and started mirrors
//! - A store wrapper with injectable failures
//! - Wait helpers for eventually-consistent assertions

pub mod flaky_store;
pub mod fixtures;

pub use fixtures::*;
pub use flaky_store::*;
