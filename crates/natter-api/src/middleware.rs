use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use natter_gateway::connection::decode_claims;

use crate::auth::SESSION_COOKIE;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// Bearer token from the Authorization header, falling back to the session cookie.
pub fn extract_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .filter(|t| !t.is_empty())
}

/// Validate the caller's JWT and make sure the account still exists.
/// On success the `Claims` are available to handlers as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers(), &jar).ok_or(ApiError::Unauthorized)?;
    let claims = decode_claims(&token, &state.jwt_secret).map_err(|_| ApiError::Unauthorized)?;

    let uid = claims.sub.to_string();
    let exists = db_call(&state.db, move |db| Ok(db.get_user_by_id(&uid)?.is_some())).await?;
    if !exists {
        return Err(ApiError::Unauthorized);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
