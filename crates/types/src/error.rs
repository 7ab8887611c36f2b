//! Unified error type for the vesta workspace.

use thiserror::Error;

/// Enumerates every failure the network layer can surface.
///
/// The set is closed: transport, HTTP status and streaming failures all map
/// onto one of these kinds at the failure site. The type is `Clone` so a
/// single refresh outcome can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The base URL, path or query could not be assembled into a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The request could not be built (bad header name/value, bad body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The host could not be reached.
    #[error("no connection: {0}")]
    NoConnection(String),

    /// The attempt exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a 5xx status.
    #[error("server error: status={status}{}", fmt_message(.message.as_deref()))]
    ServerError {
        status: u16,
        message: Option<String>,
    },

    /// The server answered with a 4xx status not covered by a dedicated kind.
    #[error("client error: status={status}{}", fmt_message(.message.as_deref()))]
    ClientError {
        status: u16,
        message: Option<String>,
    },

    /// No usable credentials, or the server rejected them.
    #[error("unauthorized")]
    Unauthorized,

    /// Credentials were accepted but lack permission.
    #[error("forbidden")]
    Forbidden,

    /// The resource does not exist.
    #[error("not found")]
    NotFound,

    /// The server throttled the request. `retry_after` is in seconds.
    #[error("rate limited{}", .retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    /// A response body did not match the expected shape.
    #[error("decoding error: {0}")]
    DecodingError(String),

    /// A request body could not be serialized.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// TLS handshake or certificate validation failed.
    #[error("tls error: {0}")]
    SslError(String),

    /// The operation was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,

    /// A stream operation was attempted without an open connection.
    #[error("stream not connected")]
    NotConnected,

    /// A stream frame could not be encoded or decoded.
    #[error("invalid stream message: {0}")]
    InvalidMessage(String),

    /// The durable token store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything that does not fit the kinds above.
    #[error("unknown error: {0}")]
    Unknown(String),
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for NetworkError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

fn fmt_message(message: Option<&str>) -> String {
    message.map(|m| format!(", message={m}")).unwrap_or_default()
}

impl NetworkError {
    /// Returns `true` for failures that may succeed if the same request is
    /// sent again: timeouts, lost connectivity and 5xx responses.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NoConnection(_) | Self::ServerError { .. }
        )
    }

    /// Human-readable description suitable for presentation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::InvalidUrl(_) => "The request address is invalid.".into(),
            Self::InvalidRequest(_) => "The request could not be created.".into(),
            Self::NoConnection(_) => "You appear to be offline.".into(),
            Self::Timeout => "The server took too long to respond.".into(),
            Self::ServerError { message, .. } => message
                .clone()
                .unwrap_or_else(|| "The server encountered an error.".into()),
            Self::ClientError { message, .. } => message
                .clone()
                .unwrap_or_else(|| "The request was rejected by the server.".into()),
            Self::Unauthorized => "Your session has expired.".into(),
            Self::Forbidden => "You don't have permission to do that.".into(),
            Self::NotFound => "The requested item could not be found.".into(),
            Self::RateLimited { retry_after: Some(secs) } => {
                format!("Too many requests. Try again in {secs} seconds.")
            }
            Self::RateLimited { retry_after: None } => {
                "Too many requests. Try again later.".into()
            }
            Self::DecodingError(_) => "The server response could not be read.".into(),
            Self::EncodingError(_) => "The request data could not be prepared.".into(),
            Self::SslError(_) => "A secure connection could not be established.".into(),
            Self::Cancelled => "The request was cancelled.".into(),
            Self::NotConnected => "The live connection is not open.".into(),
            Self::InvalidMessage(_) => "A live update could not be read.".into(),
            Self::Storage(_) => "Saved credentials could not be accessed.".into(),
            Self::Unknown(_) => "An unexpected error occurred.".into(),
        }
    }

    /// Advisory next step for the user, when one exists.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NoConnection(_) => Some("Check your connection and try again."),
            Self::Timeout | Self::ServerError { .. } => Some("Please try again in a moment."),
            Self::Unauthorized => Some("Sign in again."),
            Self::RateLimited { .. } => Some("Wait a moment before retrying."),
            Self::SslError(_) => Some("Make sure your network is trusted."),
            Self::NotConnected => Some("Reconnect to resume live updates."),
            Self::DecodingError(_) => Some("Update the app to the latest version."),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_server_error() {
        let err = NetworkError::ServerError {
            status: 503,
            message: Some("maintenance".into()),
        };
        assert_eq!(
            err.to_string(),
            "server error: status=503, message=maintenance"
        );
    }

    #[test]
    fn test_error_display_client_error_without_message() {
        let err = NetworkError::ClientError {
            status: 422,
            message: None,
        };
        assert_eq!(err.to_string(), "client error: status=422");
    }

    #[test]
    fn test_error_display_rate_limited() {
        let err = NetworkError::RateLimited {
            retry_after: Some(30),
        };
        assert!(err.to_string().contains("30s"));
        assert_eq!(
            NetworkError::RateLimited { retry_after: None }.to_string(),
            "rate limited"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(NetworkError::Timeout.is_transient());
        assert!(NetworkError::NoConnection("refused".into()).is_transient());
        assert!(
            NetworkError::ServerError {
                status: 502,
                message: None
            }
            .is_transient()
        );
    }

    #[test]
    fn test_is_not_transient() {
        assert!(!NetworkError::Unauthorized.is_transient());
        assert!(!NetworkError::DecodingError("bad".into()).is_transient());
        assert!(!NetworkError::RateLimited { retry_after: None }.is_transient());
        assert!(
            !NetworkError::ClientError {
                status: 400,
                message: None
            }
            .is_transient()
        );
    }

    #[test]
    fn test_recovery_suggestions() {
        assert_eq!(
            NetworkError::Unauthorized.recovery_suggestion(),
            Some("Sign in again.")
        );
        assert_eq!(
            NetworkError::NoConnection(String::new()).recovery_suggestion(),
            Some("Check your connection and try again.")
        );
        assert!(NetworkError::NotFound.recovery_suggestion().is_none());
    }

    #[test]
    fn test_description_prefers_server_message() {
        let err = NetworkError::ClientError {
            status: 400,
            message: Some("Symbol is required".into()),
        };
        assert_eq!(err.description(), "Symbol is required");
    }
}
