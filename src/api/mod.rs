//! API Module
//!
//! HTTP handlers and routing for the cache administration surface.
//!
//! # Endpoints
//! - `/v1/cache/*` - Statistics, invalidation, key inspection, strategy
//!   catalogue, ping and maintenance
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
