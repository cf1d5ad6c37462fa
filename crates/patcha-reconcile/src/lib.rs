//! patcha-reconcile — turn raw fleet listings into a linked graph.
//!
//! ```text
//! Reconciler
//!   ├── FleetAdapter (pagination, per-call timeout, partial listings)
//!   │   └── FleetSource (page-level API: cloud client, InventorySource, ...)
//!   └── GraphBuilder (dedup by key, bidirectional links, anomalies)
//!       └── FleetGraph
//! ```
//!
//! Source failures never abort a reconciliation. Whatever was fetched before
//! the failure is kept, the affected deployment is flagged incomplete, and
//! the failure is reported alongside the result.

pub mod error;
pub mod inventory;
pub mod reconciler;
pub mod source;

pub use error::{SourceError, SourceResult};
pub use inventory::{Inventory, InventorySource};
pub use reconciler::{
    Anomaly, FailureScope, GraphBuilder, Reconciliation, Reconciler, SourceFailure, reconcile,
};
pub use source::{FleetAdapter, FleetSource, Listing, Page, PageFuture};
