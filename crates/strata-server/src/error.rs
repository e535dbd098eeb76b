//! Error types for the server dispatcher.

use strata_backend::StoreError;
use strata_message::MessageError;

/// Errors that terminate a connection worker.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be parsed; the stream is no longer trustworthy.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// A backend operation failed in a way that poisons the connection
    /// state (per-operation failures are reported in replies instead).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request violates the protocol (bad enum byte, impossible field).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The request needs a backend this server was not configured with.
    #[error("no {0} backend configured")]
    BackendUnavailable(&'static str),
}
