//! API module
//!
//! HTTP ingress endpoints.

pub mod routes;

pub use routes::{create_router, AppState};
