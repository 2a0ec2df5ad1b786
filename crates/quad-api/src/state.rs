use std::sync::Arc;

use quad_db::{ChatResult, Database};
use quad_gateway::Dispatcher;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, jwt_secret: impl Into<String>) -> AppState {
        Arc::new(Self {
            db,
            dispatcher,
            jwt_secret: jwt_secret.into(),
        })
    }

    /// Run blocking store work off the async runtime.
    pub async fn blocking<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    }

    /// [`Self::blocking`] for a single store call.
    pub async fn store<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> ChatResult<T> + Send + 'static,
    {
        self.blocking(move |db| f(db).map_err(ApiError::from)).await
    }
}
