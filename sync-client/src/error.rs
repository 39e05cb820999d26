//! Error types for sync-client.

use novaclub_sync_core::FailureKind;
use novaclub_sync_types::SyncError;

use crate::config::ConfigError;

/// Main error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote service error.
    #[error("remote error: {0}")]
    Gateway(#[from] GatewayError),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Invalid data.
    #[error("invalid data: {0}")]
    Data(#[from] SyncError),
}

impl ClientError {
    /// Classification used to decide how the caller should react.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Storage(_) => FailureKind::Storage,
            Self::Gateway(e) => e.kind(),
            Self::Auth(e) => e.kind(),
            Self::Config(_) | Self::Data(_) => FailureKind::Application,
        }
    }
}

/// Local store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row holds an invalid value.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Invalid record or identifier.
    #[error("invalid data: {0}")]
    Data(#[from] SyncError),
}

/// Outcome classification of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The token was missing, expired or refused. The token has been cleared.
    #[error("unauthorized")]
    Unauthorized,

    /// The server answered with an error status.
    #[error("{status}: {message}")]
    Application {
        /// HTTP status code.
        status: u16,
        /// Message decoded from the error body.
        message: String,
    },

    /// Transport-level failure (DNS, refused, reset, timeout).
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A success response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl GatewayError {
    /// Failure classification for the sync engine.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized => FailureKind::Unauthorized,
            Self::Connectivity(_) => FailureKind::Connectivity,
            Self::Application { .. } | Self::Decode(_) | Self::InvalidUrl(_) => {
                FailureKind::Application
            }
        }
    }

    /// Check if this is a transport-level failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Application { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email, wrong password, or no usable cached login.
    ///
    /// Offline logins report every failure with this variant so callers
    /// cannot tell whether a cached login exists.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// No session: sign in first.
    #[error("not signed in")]
    NotSignedIn,

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// Remote error other than rejected credentials.
    #[error("remote error: {0}")]
    Gateway(#[from] GatewayError),

    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Failure classification.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidCredentials | Self::NotSignedIn => FailureKind::Unauthorized,
            Self::Hashing(_) => FailureKind::Application,
            Self::Gateway(e) => e.kind(),
            Self::Storage(_) => FailureKind::Storage,
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_classify() {
        assert_eq!(GatewayError::Unauthorized.kind(), FailureKind::Unauthorized);
        assert_eq!(
            GatewayError::Connectivity("refused".into()).kind(),
            FailureKind::Connectivity
        );
        assert_eq!(
            GatewayError::Application {
                status: 422,
                message: "bad".into()
            }
            .kind(),
            FailureKind::Application
        );
        assert_eq!(GatewayError::Decode("eof".into()).kind(), FailureKind::Application);
    }

    #[test]
    fn client_error_kind_follows_source() {
        let err: ClientError = GatewayError::Connectivity("timeout".into()).into();
        assert_eq!(err.kind(), FailureKind::Connectivity);

        let err: ClientError = StorageError::CorruptRow("x".into()).into();
        assert_eq!(err.kind(), FailureKind::Storage);

        let err: ClientError = AuthError::InvalidCredentials.into();
        assert_eq!(err.kind(), FailureKind::Unauthorized);
    }

    #[test]
    fn application_error_display_includes_status() {
        let err = GatewayError::Application {
            status: 400,
            message: "Email already registered".into(),
        };
        assert_eq!(err.to_string(), "400: Email already registered");
        assert_eq!(err.status(), Some(400));
    }
}
