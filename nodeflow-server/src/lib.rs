//! Nodeflow Server
//!
//! HTTP transport exposing nodeflow pipelines as sync and streaming endpoints.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod routes;

pub use config::{Args, ConfigType};
pub use routes::{router, Health, HEALTH_PATH};
