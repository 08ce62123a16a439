//! Transport layer for the admission engine.
//!
//! Currently provides HTTP transport via axum.

pub mod http;

pub use http::{ServerConfig, serve};
