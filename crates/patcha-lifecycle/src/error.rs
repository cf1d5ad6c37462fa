use patcha_state::StateError;
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cache store error: {0}")]
    Store(#[from] StateError),

    #[error("no projects configured; nothing to reconcile")]
    NoProjects,
}
