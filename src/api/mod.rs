pub mod chat;
pub mod health;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::auth::middleware::require_session;
use crate::config::Config;

/// Routes that require a signed-in session.
///
/// ```text
/// /api/chat          POST
/// /api/agents/chat   POST
/// ```
pub fn build_api_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(chat::relay_chat))
        .route("/api/agents/chat", post(chat::relay_agent_chat))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
}

/// Full application: public health route, gated API routes and the global
/// middleware stack.
pub fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(build_api_router(&state))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Allow-all when no origins are configured, otherwise the configured list.
pub fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
