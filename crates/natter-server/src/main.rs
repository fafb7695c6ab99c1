mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method, header},
    response::IntoResponse,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use natter_api::images::{CloudinaryHost, ImageHost, LocalImageHost};
use natter_api::middleware::extract_token;
use natter_api::routes;
use natter_api::state::{AppState, AppStateInner};
use natter_gateway::Dispatcher;
use natter_gateway::connection;

use crate::config::ServerConfig;

/// Matches the largest base64 image a client may post.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "natter=debug,natter_api=debug,natter_gateway=debug,natter_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(natter_db::Database::open(&config.db_path)?);

    let images: Arc<dyn ImageHost> = match &config.cloudinary {
        Some(c) => {
            info!("Images hosted on Cloudinary ({})", c.cloud_name);
            Arc::new(CloudinaryHost::new(
                c.cloud_name.clone(),
                c.api_key.clone(),
                c.api_secret.clone(),
            ))
        }
        None => {
            info!("Images stored locally in {}", config.upload_dir.display());
            Arc::new(LocalImageHost::new(config.upload_dir.clone(), config.public_url.clone()))
        }
    };

    // The presence registry lives as long as the server
    let dispatcher = Dispatcher::new();

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        images,
        secure_cookies: config.secure_cookies,
    });

    let gateway_state = GatewayState {
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let mut app = Router::new()
        .merge(routes::router(app_state))
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&config.upload_dir));

    if let Some(dir) = &config.client_dir {
        info!("Serving client from {}", dir.display());
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    let cors = CorsLayer::new()
        .allow_origin(config.client_origin.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = app
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Natter server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Authenticate at upgrade time when a token is present (query, bearer or
/// cookie); otherwise the client has to send `identify` first.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.or_else(|| extract_token(&headers, &jar));
    let user_id = token
        .as_deref()
        .and_then(|t| connection::verify_token(t, &state.jwt_secret));

    ws.on_upgrade(move |socket| async move {
        match user_id {
            Some(user_id) => {
                connection::handle_connection_authenticated(socket, state.dispatcher, user_id).await
            }
            None => connection::handle_connection(socket, state.dispatcher, state.jwt_secret).await,
        }
    })
}
