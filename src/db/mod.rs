pub mod repository;
pub mod store;

use sqlx::SqlitePool;

use crate::error::AppError;

pub use store::{DocumentStore, SqliteStore};

/// Applies the embedded schema migrations.
pub async fn migrate(db: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(db).await?;
    Ok(())
}
