use axum::{
    Router, middleware,
    routing::{get, patch, post, put},
};

use crate::auth;
use crate::messages;
use crate::middleware::require_auth;
use crate::state::AppState;

/// REST surface under `/api`. The WebSocket gateway, CORS and static files
/// are layered on by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout));

    let protected_routes = Router::new()
        .route("/api/auth/check", get(auth::check))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/messages/users", get(messages::get_users_for_sidebar))
        .route("/api/messages/{id}", get(messages::get_messages))
        .route("/api/messages/send/{id}", post(messages::send_message))
        .route("/api/messages/seen/{id}", patch(messages::mark_seen))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
