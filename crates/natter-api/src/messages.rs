use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use natter_types::api::{Claims, MarkSeenResponse, SendMessageRequest};
use natter_types::models::{Message, SidebarUser};

use crate::chat;
use crate::error::ApiError;
use crate::state::AppState;

/// Path ids are parsed by hand so a malformed id fails like every other
/// message-route error.
fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Invalid(format!("malformed user id '{}'", raw)))
}

/// GET /api/messages/users
pub async fn get_users_for_sidebar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<SidebarUser>>, ApiError> {
    let users = chat::list_conversation_partners(&state.db, claims.sub).await?;
    Ok(Json(users))
}

/// GET /api/messages/{id}
pub async fn get_messages(
    State(state): State<AppState>,
    Path(other): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let other = parse_user_id(&other)?;
    let messages = chat::list_messages(&state.db, claims.sub, other).await?;
    Ok(Json(messages))
}

/// POST /api/messages/send/{id}
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receiver = parse_user_id(&receiver)?;

    let image = match req.image.as_deref().filter(|i| !i.is_empty()) {
        Some(data_uri) => Some(state.images.upload(data_uri).await.map_err(|e| {
            warn!("Image upload from {} failed: {:#}", claims.sub, e);
            ApiError::Internal(e)
        })?),
        None => None,
    };

    let message = chat::send_message(
        &state.db,
        &state.dispatcher,
        claims.sub,
        receiver,
        req.text,
        image,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /api/messages/seen/{id}: the caller has seen everything `id` sent them.
pub async fn mark_seen(
    State(state): State<AppState>,
    Path(other): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkSeenResponse>, ApiError> {
    let other = parse_user_id(&other)?;
    chat::mark_seen(&state.db, &state.dispatcher, claims.sub, other).await?;
    Ok(Json(MarkSeenResponse { success: true }))
}
