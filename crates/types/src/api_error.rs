//! Decoding of server error bodies.
//!
//! The API emits two shapes depending on the service:
//!
//! ```json
//! {"error": "invalid_symbol", "message": "Unknown ticker", "details": {...}}
//! {"error": {"code": "invalid_symbol", "message": "Unknown ticker", "details": {...}}}
//! ```
//!
//! Both decode to the same [`ApiErrorBody`].

use serde::Deserialize;
use serde_json::Value;

/// Normalised server error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Deserialize)]
struct NestedInner {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireShape {
    Nested {
        error: NestedInner,
    },
    Flat {
        error: String,
        message: String,
        #[serde(default)]
        details: Option<Value>,
    },
}

impl<'de> Deserialize<'de> for ApiErrorBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match WireShape::deserialize(deserializer)? {
            WireShape::Nested { error } => Self {
                code: error.code,
                message: error.message,
                details: error.details,
            },
            WireShape::Flat {
                error,
                message,
                details,
            } => Self {
                code: error,
                message,
                details,
            },
        })
    }
}

impl ApiErrorBody {
    /// Try to decode an error body; returns `None` for empty or foreign bodies.
    #[must_use]
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_and_nested_are_equivalent() {
        let flat = br#"{"error":"invalid_symbol","message":"Unknown ticker","details":{"symbol":"ZZZZ"}}"#;
        let nested = br#"{"error":{"code":"invalid_symbol","message":"Unknown ticker","details":{"symbol":"ZZZZ"}}}"#;
        let a = ApiErrorBody::parse(flat).unwrap();
        let b = ApiErrorBody::parse(nested).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.details, Some(json!({"symbol": "ZZZZ"})));
    }

    #[test]
    fn test_details_optional() {
        let a = ApiErrorBody::parse(br#"{"error":"bad","message":"Bad request"}"#).unwrap();
        assert_eq!(a.code, "bad");
        assert!(a.details.is_none());
    }

    #[test]
    fn test_foreign_body_is_none() {
        assert!(ApiErrorBody::parse(b"<html>502 Bad Gateway</html>").is_none());
        assert!(ApiErrorBody::parse(b"").is_none());
        assert!(ApiErrorBody::parse(br#"{"detail":"nope"}"#).is_none());
    }
}
