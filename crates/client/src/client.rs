//! Request executor: auth injection, retry and re-authentication.

use crate::classify::classify;
use crate::request::{self, Interceptor};
use crate::retry::RetryPolicy;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Semaphore;
use vesta_auth::TokenAuthority;
use vesta_config::ApiConfig;
use vesta_types::{
    EndpointDescriptor, FilePart, HttpTransport, NetworkError, RequestBody, Result, WireRequest,
};

/// Executes endpoint descriptors against the remote API.
///
/// Requests are independent and run in parallel, bounded by
/// `max_concurrent_requests`. One request's retry sequence is sequential.
pub struct ApiClient {
    config: ApiConfig,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<TokenAuthority>,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
    interceptors: Vec<Interceptor>,
}

impl ApiClient {
    pub fn new(
        config: ApiConfig,
        transport: Arc<dyn HttpTransport>,
        auth: Arc<TokenAuthority>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            transport,
            auth,
            limiter,
            interceptors: Vec::new(),
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append an interceptor; interceptors run in the order they were added.
    #[must_use]
    pub fn with_interceptor<F>(mut self, f: F) -> Self
    where
        F: Fn(WireRequest) -> Result<WireRequest> + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(f));
        self
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<TokenAuthority> {
        &self.auth
    }

    /// Execute `descriptor` and return the raw response body.
    ///
    /// # Errors
    ///
    /// Any [`NetworkError`]; transient failures and a first `Unauthorized`
    /// have already been retried by the time an error is returned.
    pub async fn execute(&self, descriptor: &EndpointDescriptor) -> Result<Bytes> {
        self.run(descriptor, None).await
    }

    /// Execute `descriptor` and decode the JSON body as `T`.
    ///
    /// # Errors
    ///
    /// [`NetworkError::DecodingError`] if the body does not match `T`; it is
    /// never retried. Otherwise as [`execute`](Self::execute).
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        descriptor: &EndpointDescriptor,
    ) -> Result<T> {
        let body = self.execute(descriptor).await?;
        serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(path = %descriptor.path, error = %e, "response did not match expected shape");
            NetworkError::DecodingError(e.to_string())
        })
    }

    /// Upload `payload` as a single-file multipart body.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn upload(
        &self,
        descriptor: &EndpointDescriptor,
        payload: impl Into<Bytes>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Result<Bytes> {
        let part = FilePart {
            field: "file".to_string(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            payload: payload.into(),
        };
        self.run(descriptor, Some(RequestBody::Multipart(part)))
            .await
    }

    async fn run(&self, descriptor: &EndpointDescriptor, body: Option<RequestBody>) -> Result<Bytes> {
        let mut request = self.intercept(request::build(&self.config, descriptor, body)?)?;
        if descriptor.requires_auth {
            let token = self.auth.current_token().await?;
            request::set_bearer(&mut request, &token)?;
        }

        let mut retries = 0u32;
        let mut reauthenticated = false;
        loop {
            match self.send_once(request.clone()).await {
                Ok(body) => return Ok(body),
                Err(NetworkError::Unauthorized) if descriptor.requires_auth && !reauthenticated => {
                    reauthenticated = true;
                    tracing::info!(path = %descriptor.path, "request unauthorized, refreshing session");
                    let token = self.auth.refresh().await?;
                    request::set_bearer(&mut request, &token)?;
                }
                Err(e) if self.retry.should_retry(&e, retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    tracing::warn!(
                        path = %descriptor.path,
                        error = %e,
                        retry = retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::debug!(path = %descriptor.path, error = %e, "request failed");
                    return Err(e);
                }
            }
        }
    }

    fn intercept(&self, request: WireRequest) -> Result<WireRequest> {
        self.interceptors
            .iter()
            .try_fold(request, |req, interceptor| interceptor(req))
    }

    /// One attempt: wait for a connection slot, send with the per-attempt
    /// timeout, classify the status.
    async fn send_once(&self, request: WireRequest) -> Result<Bytes> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| NetworkError::Cancelled)?;
        let timeout = request.timeout;
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| NetworkError::Timeout)??;
        classify(response)
    }
}
