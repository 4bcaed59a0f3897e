//! API Routes
//!
//! Configures the Axum router with the cache admin endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_key_handler, get_key_handler, health_handler, invalidate_handler,
    list_keys_handler, maintenance_handler, ping_handler, reset_stats_handler, set_key_handler,
    stats_handler, strategy_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /v1/cache/stats` - Application and backend statistics
/// - `POST /v1/cache/stats/reset` - Zero the statistics counters
/// - `POST /v1/cache/clear` - Drop every cached entry
/// - `POST /v1/cache/invalidate` - Delete keys matching a glob pattern
/// - `GET /v1/cache/keys` - List keys with TTL and size
/// - `PUT /v1/cache/keys` - Store a raw key
/// - `GET|DELETE /v1/cache/keys/:key` - Read or delete a raw key
/// - `GET /v1/cache/strategy` - Strategy catalogue
/// - `GET /v1/cache/ping` - Backend latency check
/// - `POST /v1/cache/maintenance` - Schedule backend maintenance
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cache = Router::new()
        .route("/stats", get(stats_handler))
        .route("/stats/reset", post(reset_stats_handler))
        .route("/clear", post(clear_handler))
        .route("/invalidate", post(invalidate_handler))
        .route("/keys", get(list_keys_handler).put(set_key_handler))
        .route("/keys/:key", get(get_key_handler).delete(delete_key_handler))
        .route("/strategy", get(strategy_handler))
        .route("/ping", get(ping_handler))
        .route("/maintenance", post(maintenance_handler));

    Router::new()
        .nest("/v1/cache", cache)
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
