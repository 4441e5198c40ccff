// Error types surfaced by the application layer
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
    #[error("dashboard session {0} is closed")]
    SessionClosed(String),
    #[error("unknown widget {0}")]
    UnknownWidget(String),
    #[error("widget {0} cannot change its type")]
    KindChange(String),
}

/// Cache backend failures. The coordinator logs these and falls back to the
/// source of truth; callers never see them.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
