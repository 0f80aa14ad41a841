use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::DeadlineNotifier;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub notifier: Arc<DeadlineNotifier>,
}
