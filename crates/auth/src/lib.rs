//! Session token lifecycle for the vesta API.
//!
//! [`TokenAuthority`] owns the in-memory token state, hands out usable bearer
//! tokens and coalesces concurrent refresh demand into a single exchange
//! against the identity endpoint (see [`exchange`]).

pub mod authority;
pub mod exchange;

pub use authority::TokenAuthority;
pub use exchange::TokenExchanger;
