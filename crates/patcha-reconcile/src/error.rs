//! Fleet source error types.

use std::time::Duration;

use thiserror::Error;

pub type SourceResult<T> = Result<T, SourceError>;

/// A fleet source call that did not return a page.
///
/// These are recorded per project or per deployment and never abort a
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("fleet source unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("pagination error: {0}")]
    Pagination(String),

    #[error("inventory error: {0}")]
    Inventory(String),
}
