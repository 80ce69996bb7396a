//! Route definitions for the gateway API.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{auth, handlers, state::AppState};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api = chat_routes()
        .merge(admin_routes(&state))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    if state.config.server.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Chat routes; streams may outlive any request timeout
fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/models", get(handlers::list_models))
        .route("/models/:model/chat", post(handlers::chat))
}

/// Provider and account management; admin only, bounded by the request timeout
fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/providers",
            post(handlers::create_provider).get(handlers::list_providers),
        )
        .route(
            "/providers/:name",
            get(handlers::get_provider)
                .put(handlers::update_provider)
                .delete(handlers::delete_provider),
        )
        .route("/admin/providers/reload", post(handlers::reload_all))
        .route(
            "/admin/providers/:name/reload",
            post(handlers::reload_provider),
        )
        .route(
            "/admin/providers/:name/enable",
            post(handlers::enable_provider),
        )
        .route(
            "/admin/providers/:name/disable",
            post(handlers::disable_provider),
        )
        .route(
            "/users",
            post(handlers::create_user).get(handlers::list_users),
        )
        .route("/users/:id", get(handlers::get_user))
        .route(
            "/users/:id/apikeys",
            post(handlers::issue_key).get(handlers::list_keys),
        )
        .route("/users/:id/apikeys/:key_id", delete(handlers::delete_key))
        .route(
            "/users/:id/apikeys/:key_id/disable",
            put(handlers::disable_key),
        )
        .route_layer(middleware::from_fn(auth::require_admin))
        .layer(TimeoutLayer::new(state.config.server.request_timeout))
}
