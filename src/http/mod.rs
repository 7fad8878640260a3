//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (correlation id, request span)
//!     → handlers.rs / webhook.rs (guard → access check → secure store)
//!     → response.rs (ApiError → JSON rejection with correlation id)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;
pub mod webhook;

pub use request::correlation_middleware;
pub use response::{ApiError, ApiResult, Rejection, CORRELATION_HEADER};
pub use server::{build_router, AppState, Dependencies, HttpServer};
