//! Error types for novaclub sync data types.

use thiserror::Error;

/// Errors raised while building or decoding sync data types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Entity type name is empty or contains characters outside `[a-z0-9_]`
    #[error("invalid entity type: {0:?}")]
    InvalidEntityType(String),

    /// Timestamp is neither RFC 3339 nor naive ISO-8601
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Record payload could not be decoded
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidEntityType("Members!".into());
        assert_eq!(err.to_string(), "invalid entity type: \"Members!\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
