//! Core types and traits for the vesta workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! network access layer: the error taxonomy, endpoint descriptors, wire
//! request/response values, session tokens, lenient timestamps and the async
//! traits that the store, auth and client layers implement.

pub mod api_error;
pub mod endpoint;
pub mod error;
pub mod timestamp;
pub mod token;
pub mod traits;
pub mod wire;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use api_error::ApiErrorBody;
pub use endpoint::EndpointDescriptor;
pub use error::{NetworkError, Result};
pub use token::{TokenKey, TokenResponse, TokenSet, TokenState};
pub use traits::{HttpTransport, TokenStore};
pub use wire::{FilePart, RequestBody, WireRequest, WireResponse};
