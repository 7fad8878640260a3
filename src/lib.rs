//! Request-scoped security and tenant-isolated data access for a
//! video-repurposing service.

pub mod admin;
pub mod audit;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod media;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::schema::AppConfig;
pub use http::{AppState, Dependencies, HttpServer};
pub use lifecycle::Shutdown;
