//! Cache store failures.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A failed read or write of the persisted fleet snapshot.
///
/// The store is the only durable copy of the reconciled graph, so the
/// lifecycle controller aborts the run on any of these rather than serving
/// or expiring a snapshot it could not read or write.
#[derive(Debug, Error)]
pub enum StateError {
    /// The redb file (or in-memory backend) could not be opened.
    #[error("cannot open cache store: {0}")]
    Open(String),

    /// Beginning or committing a snapshot transaction failed. A failed
    /// commit leaves the previous snapshot in place.
    #[error("cache transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open cache table: {0}")]
    Table(String),

    #[error("cannot read cached snapshot: {0}")]
    Read(String),

    #[error("cannot write cached snapshot: {0}")]
    Write(String),

    /// An entity or link row could not be encoded as JSON.
    #[error("cannot encode snapshot row: {0}")]
    Serialize(String),

    /// A stored row is not valid JSON for its table.
    #[error("corrupt snapshot row: {0}")]
    Deserialize(String),
}
