//! patcha-core — shared types for Patcha.
//!
//! Holds the entity model (instances, patch deployments and the raw
//! descriptors a fleet source returns), the [`FleetGraph`] that keeps the
//! instance ↔ deployment relation as two key indexes, and the `patcha.toml`
//! configuration.

pub mod config;
pub mod graph;
pub mod types;

pub use config::{ConfigError, PatchaConfig, StoreKind};
pub use graph::FleetGraph;
pub use types::*;
