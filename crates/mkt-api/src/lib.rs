//! mkt-api: HTTP API for Marketer
//!
//! Chat endpoints, session history endpoints and the static frontend,
//! built with axum.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{build_router, start_server, AppState};
