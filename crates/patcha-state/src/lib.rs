//! patcha-state — the persisted cache of the reconciled fleet graph.
//!
//! [`CacheStore`] is the capability set the lifecycle controller and the
//! query surface depend on: whole-snapshot `build`/`clear`, the relation
//! queries, and a single expiry timestamp. [`RedbStore`] implements it over
//! [redb](https://docs.rs/redb), on disk or in memory.
//!
//! # Architecture
//!
//! All entities are JSON-serialized into redb's `&[u8]` value columns under
//! `{project}/{name}` keys. The relation is stored as two link tables, one
//! per direction, mirroring the index maps of `FleetGraph`. A snapshot is
//! written in a single write transaction, so readers see either the old or
//! the new snapshot and never a mix.
//!
//! One process is expected to own the store at a time; concurrent writers
//! from several processes are not coordinated.

pub mod cache;
pub mod error;
pub mod store;
pub mod tables;

use patcha_core::config::{StoreConfig, StoreKind};

pub use cache::{CacheStore, epoch_secs};
pub use error::{StateError, StateResult};
pub use store::RedbStore;

/// Open the store selected by `[store]` in the configuration.
pub fn open_configured(config: &StoreConfig) -> StateResult<Box<dyn CacheStore>> {
    match config.kind {
        StoreKind::Redb => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| StateError::Open("redb store needs a path".to_string()))?;
            Ok(Box::new(RedbStore::open(path)?))
        }
        StoreKind::Memory => Ok(Box::new(RedbStore::open_in_memory()?)),
    }
}
