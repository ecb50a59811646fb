/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object is stored under the requested key.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The key resolves to a location outside the store root.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The input ended before the expected number of bytes was read.
    #[error("truncated write for {key}: expected {expected} bytes, received {received}")]
    Truncated {
        key: String,
        expected: u64,
        received: u64,
    },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Walking the store root failed.
    #[error("failed to walk store root: {0}")]
    Walk(String),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
