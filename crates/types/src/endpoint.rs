//! Endpoint descriptors supplied by the endpoint-definition layer.

use crate::error::{NetworkError, Result};
use bytes::Bytes;
use http::Method;
use serde::Serialize;
use std::time::Duration;

/// Immutable description of one API call.
///
/// The network layer only reads descriptors; it never mutates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub path: String,
    pub method: Method,
    /// Extra headers, applied over the client defaults in order.
    pub headers: Vec<(String, String)>,
    /// Query parameters, appended in order.
    pub query: Vec<(String, String)>,
    /// JSON body bytes.
    pub body: Option<Bytes>,
    pub requires_auth: bool,
    /// Per-attempt timeout; the client default applies when `None`.
    pub timeout: Option<Duration>,
}

impl EndpointDescriptor {
    /// Create an authenticated descriptor with no headers, query or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            requires_auth: true,
            timeout: None,
        }
    }

    /// Shorthand for `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Shorthand for `POST path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach pre-encoded JSON bytes as the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::EncodingError`] if `value` cannot be serialized.
    pub fn json_body<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| NetworkError::EncodingError(e.to_string()))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Mark the endpoint as public (no `Authorization` header).
    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
