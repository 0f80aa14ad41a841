use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::repository;
use crate::error::AppError;
use crate::models::{ClassRecord, UserRecord};

/// Read side of the document store used by the deadline scanner.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every class record. Fails only if the collection cannot be read at all.
    async fn list_classes(&self) -> Result<Vec<ClassRecord>, AppError>;
    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, AppError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn list_classes(&self) -> Result<Vec<ClassRecord>, AppError> {
        repository::fetch_all_classes(&self.db).await
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(repository::find_user_by_id(&self.db, uid).await?)
    }
}
