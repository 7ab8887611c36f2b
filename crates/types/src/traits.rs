//! Async traits shared across all vesta crates.
//!
//! Every cross-crate seam is defined here so that higher layers depend only
//! on `vesta-types`, not on each other.

use crate::{TokenKey, WireRequest, WireResponse, error::Result};
use async_trait::async_trait;

/// Durable key/value mirror of the session tokens.
///
/// The store is the system of record across process restarts. The token
/// authority is its only writer and calls it strictly sequentially.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read one value.
    async fn get(&self, key: TokenKey) -> Result<Option<String>>;
    /// Write (or overwrite) one value.
    async fn set(&self, key: TokenKey, value: &str) -> Result<()>;
    /// Remove one value.
    async fn remove(&self, key: TokenKey) -> Result<()>;
    /// Remove every value.
    async fn clear(&self) -> Result<()>;
}

/// Sends a fully resolved request and buffers the response.
///
/// Implementations map transport failures (connect, TLS, timeout) onto the
/// matching [`NetworkError`](crate::NetworkError) kind and return every HTTP
/// status, success or not, as a [`WireResponse`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse>;
}
