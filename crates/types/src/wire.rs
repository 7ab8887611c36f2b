//! Transport-level request and response values.
//!
//! A [`WireRequest`] is the fully resolved form of an endpoint descriptor:
//! absolute URL, final header set, body and per-attempt timeout. It is cheap
//! to clone so the retry loop can resend it unchanged.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

/// Body attached to a [`WireRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Raw bytes, sent with whatever `Content-Type` the headers carry.
    Bytes(Bytes),
    /// A `multipart/form-data` body with exactly one file part.
    Multipart(FilePart),
}

/// One file part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// Form field name.
    pub field: String,
    pub filename: String,
    pub mime_type: String,
    pub payload: Bytes,
}

/// A request ready to hand to an [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl WireRequest {
    /// Returns the bearer token currently attached, if any.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WireResponse {
    /// Creates a response with the given status and body and no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, ignoring names or values that are not valid HTTP.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
        self
    }
}
