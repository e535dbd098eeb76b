//! Error types for storage backends.

/// Errors that can occur in the object and KV backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying filesystem or database I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The named object does not exist.
    #[error("object not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    /// The embedded KV database reported an error.
    #[error("kv database error: {0}")]
    Database(#[from] fjall::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// The requested backend implementation is not known.
    #[error("unknown backend implementation: {0}")]
    UnknownBackend(String),
}
