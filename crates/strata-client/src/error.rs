//! Error types for the client pipeline.

use strata_backend::StoreError;
use strata_message::MessageError;
use strata_pool::PoolError;
use strata_transform::TransformError;

/// Errors surfaced by client operations.
///
/// Batch execution folds these into its aggregate boolean: an operation
/// run that fails is logged and counted as `false`, sibling runs still
/// execute.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Invalid arguments, rejected before any I/O.
    #[error("invalid input: {0}")]
    InputInvalid(&'static str),

    /// A backend kind is needed but neither a local store nor servers are
    /// configured for it.
    #[error("no {0} backend available")]
    BackendUnavailable(&'static str),

    /// Leasing a connection failed.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A wire protocol error. The connection involved has been dropped.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// A local backend operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Decoding a transformed payload failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A KV metadata record could not be decoded.
    #[error("corrupt metadata record for {namespace}/{name}: {reason}")]
    CorruptMetadata {
        namespace: String,
        name: String,
        reason: String,
    },

    /// A metadata record failed to serialise.
    #[error("metadata encode failed: {0}")]
    Encode(#[from] postcard::Error),
}
