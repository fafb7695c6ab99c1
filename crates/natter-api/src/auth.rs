use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use natter_db::format_timestamp;
use natter_db::models::UserRow;
use natter_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest, UpdateProfileRequest};
use natter_types::models::UserProfile;

use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// Name of the session cookie carrying the JWT.
pub const SESSION_COOKIE: &str = "jwt";

const TOKEN_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 6;

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let full_name = req.full_name.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if full_name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("All fields are required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    let lookup = email.clone();
    if db_call(&state.db, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("Email already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        full_name,
        email,
        password: password_hash,
        profile_pic: String::new(),
        created_at: format_timestamp(chrono::Utc::now()),
    };
    let user = row.clone().into_profile()?;
    db_call(&state.db, move |db| db.create_user(&row)).await?;
    info!("New user {} ({})", user.id, user.email);

    let token = create_token(&state.jwt_secret, &user)?;
    let jar = jar.add(session_cookie(token.clone(), state.secure_cookies));

    Ok((StatusCode::CREATED, jar, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let row = db_call(&state.db, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid credentials".into()))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| anyhow::anyhow!("corrupt password hash for {}: {}", row.id, e))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::BadRequest("Invalid credentials".into()))?;

    let user = row.into_profile()?;
    let token = create_token(&state.jwt_secret, &user)?;
    let jar = jar.add(session_cookie(token.clone(), state.secure_cookies));

    Ok((jar, Json(AuthResponse { user, token })))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(serde_json::json!({ "message": "Logged out successfully" })))
}

/// GET /api/auth/check: the caller's own profile.
pub async fn check(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(load_profile(&state, claims.sub).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    if req.profile_pic.is_empty() {
        return Err(ApiError::BadRequest("Profile pic is required".into()));
    }

    let url = state
        .images
        .upload(&req.profile_pic)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Could not store image: {}", e)))?;

    let uid = claims.sub.to_string();
    let updated = db_call(&state.db, move |db| db.update_profile_pic(&uid, &url)).await?;
    if !updated {
        return Err(ApiError::Unauthorized);
    }

    Ok(Json(load_profile(&state, claims.sub).await?))
}

async fn load_profile(state: &AppState, user_id: Uuid) -> Result<UserProfile, ApiError> {
    let uid = user_id.to_string();
    let row = db_call(&state.db, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(row.into_profile()?)
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .build()
}

pub fn create_token(secret: &str, user: &UserProfile) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
