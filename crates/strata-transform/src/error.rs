//! Error types for transformation codecs.

/// Errors that can occur while decoding a transformed payload.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The LZ4 block failed to decompress.
    #[error("lz4 decode failed: {0}")]
    Lz4(String),

    /// A run-length payload ended in the middle of a `(copies, value)` pair.
    #[error("run-length payload truncated")]
    RleTruncated,
}
