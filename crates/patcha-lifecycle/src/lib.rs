//! patcha-lifecycle — decides, per invocation, what to do with the cache.
//!
//! | empty | expired | options     | action                     |
//! |-------|---------|-------------|----------------------------|
//! | no    | yes     |             | Refresh (clear, reconcile, build) |
//! | no    | no      | `force`     | Refresh                    |
//! | no    | no      |             | Serve from the store       |
//! | yes   | any     | `bootstrap` | Bootstrap (reconcile, build) |
//! | yes   | any     |             | Idle                       |
//!
//! The expiry only moves forward after a refresh in which every source call
//! succeeded. A partial refresh is still written, so queries see the best
//! data available, but the next run will try again.

pub mod controller;
pub mod error;

pub use controller::{
    Action, Clock, Controller, IdleReason, RefreshReport, RunOptions, RunOutcome, StoreState,
    DEFAULT_TTL, decide,
};
pub use error::{LifecycleError, LifecycleResult};
