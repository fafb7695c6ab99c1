use std::sync::Arc;

use natter_db::Database;
use natter_gateway::Dispatcher;

use crate::error::ApiError;
use crate::images::ImageHost;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub images: Arc<dyn ImageHost>,
    /// Mark the session cookie `Secure` (production, behind TLS).
    pub secure_cookies: bool,
}

/// Run a blocking DB call off the async runtime.
pub async fn db_call<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || f(&db)).await?;
    Ok(result?)
}
