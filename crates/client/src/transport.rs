//! [`HttpTransport`] backed by `reqwest`.

use async_trait::async_trait;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use std::error::Error as _;
use vesta_types::{HttpTransport, NetworkError, RequestBody, Result, WireRequest, WireResponse};

/// Sends wire requests through a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Builds a client with rustls and connection pooling sized for
    /// `max_per_host` idle connections.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::SslError`] if the TLS backend cannot be
    /// initialised.
    pub fn with_pool(max_per_host: usize) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(max_per_host)
            .build()
            .map_err(|e| NetworkError::SslError(e.to_string()))?;
        Ok(Self { http })
    }
}

/// Returns `true` if any error in the chain looks like a TLS failure.
fn is_tls_failure(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return true;
        }
        source = e.source();
    }
    false
}

/// Map a `reqwest` failure onto the closed error taxonomy.
#[must_use]
pub fn map_reqwest_error(err: &reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout
    } else if err.is_builder() {
        NetworkError::InvalidRequest(err.to_string())
    } else if is_tls_failure(err) {
        NetworkError::SslError(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        NetworkError::NoConnection(err.to_string())
    } else if err.is_decode() {
        NetworkError::DecodingError(err.to_string())
    } else {
        NetworkError::Unknown(err.to_string())
    }
}

fn multipart(part: vesta_types::FilePart) -> Result<Form> {
    let file = Part::bytes(part.payload.to_vec())
        .file_name(part.filename)
        .mime_str(&part.mime_type)
        .map_err(|e| NetworkError::EncodingError(format!("invalid mime type: {e}")))?;
    Ok(Form::new().part(part.field, file))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        builder = match request.body {
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            Some(RequestBody::Multipart(part)) => builder.multipart(multipart(part)?),
            None => builder,
        };

        let resp = builder.send().await.map_err(|e| map_reqwest_error(&e))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| map_reqwest_error(&e))?;
        tracing::trace!(status = status.as_u16(), bytes = body.len(), "response received");

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}
