use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::info;
use uuid::Uuid;

/// 5 MB decoded image limit for the local host
const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Stores an uploaded image and hands back a URL clients can fetch it from.
/// Inputs are data URIs (`data:image/png;base64,...`) as produced by browsers.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, data_uri: &str) -> Result<String>;
}

/// Cloudinary signed upload.
pub struct CloudinaryHost {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
}

impl CloudinaryHost {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            cloud_name,
            api_key,
            api_secret,
        }
    }

    /// Parameters are signed as `k=v&k=v` sorted by key, followed by the secret.
    fn sign(&self, timestamp: i64) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("timestamp={}{}", timestamp, self.api_secret).as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ImageHost for CloudinaryHost {
    async fn upload(&self, data_uri: &str) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.sign(timestamp);
        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        );

        let timestamp = timestamp.to_string();
        let form = [
            ("file", data_uri),
            ("api_key", self.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature", signature.as_str()),
        ];

        let uploaded: CloudinaryUpload = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("cloudinary upload request failed")?
            .error_for_status()?
            .json()
            .await
            .context("cloudinary returned an unexpected body")?;

        info!("Uploaded image to {}", uploaded.secure_url);
        Ok(uploaded.secure_url)
    }
}

/// Writes images to a local directory that the server exposes at `/uploads`.
pub struct LocalImageHost {
    dir: PathBuf,
    public_base: String,
}

impl LocalImageHost {
    pub fn new(dir: PathBuf, public_base: impl Into<String>) -> Self {
        Self {
            dir,
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl ImageHost for LocalImageHost {
    async fn upload(&self, data_uri: &str) -> Result<String> {
        let (ext, bytes) = decode_data_uri(data_uri)?;
        if bytes.len() > MAX_IMAGE_SIZE {
            bail!("image too large: {} bytes", bytes.len());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!("Stored image {} ({} bytes)", name, bytes.len());
        Ok(format!("{}/uploads/{}", self.public_base.trim_end_matches('/'), name))
    }
}

/// Split a base64 image data URI into (file extension, decoded bytes).
pub fn decode_data_uri(data_uri: &str) -> Result<(&'static str, Vec<u8>)> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("data URI is not base64-encoded"))?;

    let ext = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => bail!("unsupported image type '{}'", other),
    };

    let bytes = B64.decode(payload.trim()).context("invalid base64 in data URI")?;
    if bytes.is_empty() {
        bail!("empty image");
    }
    Ok((ext, bytes))
}
