use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classtodo::api::router;
use classtodo::config::AppConfig;
use classtodo::db::{self, DocumentStore, SqliteStore};
use classtodo::push::{FcmHttpClient, NoopPushClient, PushClient, PushConfig};
use classtodo::services::{DeadlineNotifier, NotificationScheduler};
use classtodo::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "classtodo=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    db::migrate(&pool).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool.clone()));

    let push: Arc<dyn PushClient> = match PushConfig::new_from_env() {
        Ok(push_config) => Arc::new(FcmHttpClient::new(push_config)?),
        Err(e) => {
            warn!("{}; push notifications are disabled", e);
            Arc::new(NoopPushClient)
        }
    };

    let notifier = Arc::new(DeadlineNotifier::new(store, push));

    let scheduler = NotificationScheduler::new(notifier.clone(), config.scan_interval);
    tokio::spawn(scheduler.start());

    let state = AppState { db: pool, notifier };

    let app = router(state);

    info!("listening on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
