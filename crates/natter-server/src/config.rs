use std::env;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub client_origin: String,
    /// Built SPA to serve in production
    pub client_dir: Option<PathBuf>,
    pub upload_dir: PathBuf,
    /// Base URL used when handing out links to locally stored images
    pub public_url: String,
    pub secure_cookies: bool,
    pub cloudinary: Option<CloudinaryConfig>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = env::var("NATTER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env::var("NATTER_PORT")
            .unwrap_or_else(|_| "5001".into())
            .parse()
            .context("NATTER_PORT must be a port number")?;

        let jwt_secret = env::var("NATTER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("NATTER_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        let public_url =
            env::var("NATTER_PUBLIC_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));

        let cloudinary = match (
            env::var("CLOUDINARY_CLOUD_NAME"),
            env::var("CLOUDINARY_API_KEY"),
            env::var("CLOUDINARY_API_SECRET"),
        ) {
            (Ok(cloud_name), Ok(api_key), Ok(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Ok(Self {
            host,
            port,
            db_path: env::var("NATTER_DB_PATH")
                .unwrap_or_else(|_| "natter.db".into())
                .into(),
            jwt_secret,
            client_origin: env::var("NATTER_CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".into()),
            client_dir: env::var("NATTER_CLIENT_DIR").ok().map(PathBuf::from),
            upload_dir: env::var("NATTER_UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".into())
                .into(),
            public_url,
            secure_cookies: env::var("NATTER_SECURE_COOKIES")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            cloudinary,
        })
    }
}
