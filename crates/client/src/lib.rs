//! REST client for the vesta API.
//!
//! [`ApiClient`] turns an [`EndpointDescriptor`](vesta_types::EndpointDescriptor)
//! into a wire request, attaches the session bearer from
//! [`TokenAuthority`](vesta_auth::TokenAuthority), retries transient failures
//! with linear backoff and re-authenticates once on `401`.

pub mod classify;
pub mod client;
pub mod request;
pub mod retry;
pub mod transport;

pub use classify::classify;
pub use client::ApiClient;
pub use request::Interceptor;
pub use retry::RetryPolicy;
pub use transport::ReqwestTransport;
