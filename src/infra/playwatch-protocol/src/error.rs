use thiserror::Error;

/// Errors raised while decoding playwatch wire documents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported backup format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}
