//! `refresh_token` grant against the identity endpoint.
//!
//! `POST <token_url>` with `{grant_type, client_id, refresh_token}`; the
//! response is `{access_token, refresh_token?, id_token?, token_type, expires_in}`.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, header};
use std::sync::Arc;
use std::time::Duration;
use vesta_types::{
    HttpTransport, NetworkError, RequestBody, Result, TokenResponse, WireRequest,
};

/// Timeout for one exchange attempt.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs token exchanges over an [`HttpTransport`].
pub struct TokenExchanger {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    client_id: String,
}

impl TokenExchanger {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
            client_id: client_id.into(),
        }
    }

    /// Build the JSON body for a `refresh_token` grant.
    #[must_use]
    pub fn build_refresh_body(&self, refresh_token: &str) -> serde_json::Value {
        serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.client_id,
            "refresh_token": refresh_token,
        })
    }

    fn build_request(&self, refresh_token: &str) -> WireRequest {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = self.build_refresh_body(refresh_token).to_string();
        WireRequest {
            method: Method::POST,
            url: self.token_url.clone(),
            headers,
            body: Some(RequestBody::Bytes(Bytes::from(body))),
            timeout: EXCHANGE_TIMEOUT,
        }
    }

    /// Exchange `refresh_token` for a new token set.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::Unauthorized`] if the endpoint answers non-2xx.
    /// - [`NetworkError::DecodingError`] if a 2xx body is not a token response.
    /// - The transport's error if the endpoint could not be reached.
    pub async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse> {
        let request = self.build_request(refresh_token);
        let response = self.transport.send(request).await?;

        if !response.status.is_success() {
            tracing::warn!(
                status = response.status.as_u16(),
                "token endpoint rejected refresh"
            );
            return Err(NetworkError::Unauthorized);
        }

        serde_json::from_slice::<TokenResponse>(&response.body).map_err(|e| {
            NetworkError::DecodingError(format!("failed to parse token response: {e}"))
        })
    }
}
