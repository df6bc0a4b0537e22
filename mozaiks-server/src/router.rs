//! Router assembly for the runtime's HTTP and WebSocket surface.

use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

const RUNTIME_VERSION_HEADER: &str = "x-mozaiks-runtime-version";

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        RUNTIME_VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Unauthenticated
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/info", get(handlers::health::info))
        // User-authenticated
        .route("/api/plugins", get(handlers::plugins::list))
        .route("/api/execute/:plugin", post(handlers::plugins::execute))
        .route("/api/ai/capabilities", get(handlers::ai::capabilities))
        .route("/api/ai/launch", post(handlers::ai::launch))
        .route(
            "/api/chats/:app_id/:workflow_name/start",
            post(handlers::chats::start),
        )
        .route(
            "/api/chats/meta/:app_id/:workflow_name/:chat_id",
            get(handlers::chats::meta),
        )
        .route(
            "/api/sessions/list/:app_id/:user_id",
            get(handlers::chats::list_sessions),
        )
        .route(
            "/api/workflows/:app_id/available",
            get(handlers::chats::available_workflows),
        )
        .route("/api/navigation", get(handlers::config::navigation))
        .route("/api/app-config", get(handlers::config::app_config))
        .route("/api/theme-config", get(handlers::config::theme_config))
        .route(
            "/api/artifacts/:artifact_id/cached",
            get(handlers::artifacts::cached),
        )
        // Service-authenticated
        .route(
            "/api/internal/subscription/sync",
            post(handlers::internal::subscription_sync),
        )
        .route(
            "/api/v1/entitlements/:app_id/sync",
            post(handlers::internal::entitlements_sync),
        )
        // WebSocket
        .route(
            "/ws/:workflow_name/:app_id/:chat_id/:user_id",
            get(ws::chat_socket),
        )
        .route("/ws/notifications/:user_id_hint", get(ws::notification_socket))
        .layer(axum::middleware::map_response(add_version_header))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
