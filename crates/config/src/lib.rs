//! Configuration loading for the vesta network layer.
//!
//! Uses figment to layer serialized defaults, an optional YAML file and
//! `VESTA_`-prefixed environment variables.

pub mod schema;

pub use schema::{ApiConfig, AuthConfig, Config, LogConfig, LogFormat, StreamConfig};
