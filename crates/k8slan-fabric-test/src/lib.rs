//! Integration test infrastructure for the k8slan fabric engine
//!
//! Provides:
//! - An in-memory kernel with per-namespace link tables
//! - Spec builders for common LAN layouts
//! - Topology verification helpers

pub mod fake;
pub mod fixtures;
mod verification;

pub use fake::{FakeKernel, FakeLinks};
pub use fixtures::*;
pub use verification::*;
