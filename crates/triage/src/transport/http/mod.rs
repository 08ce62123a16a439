//! HTTP transport over axum.

mod routes;
mod server;

pub use routes::{RETRY_MESSAGE, routes, status_for};
pub use server::{ServerConfig, serve};
