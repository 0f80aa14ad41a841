use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::services::notifier::{DeadlineNotifier, ScanStats};

/// Runs the deadline scan on a fixed period (hourly in production).
///
/// Each scan finishes before the next wait starts, so scans never overlap.
pub struct NotificationScheduler {
    notifier: Arc<DeadlineNotifier>,
    interval: Duration,
}

impl NotificationScheduler {
    pub fn new(notifier: Arc<DeadlineNotifier>, interval: Duration) -> Self {
        Self { notifier, interval }
    }

    pub async fn start(self) {
        info!("Starting deadline notification scheduler (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            match self.notifier.run().await {
                Ok(ScanStats {
                    classes_scanned,
                    todos_in_window,
                    notifications_sent,
                    notifications_failed,
                    students_skipped,
                }) => {
                    info!(
                        "Deadline scan finished - classes: {}, due todos: {} | sent: {}, failed: {}, skipped: {}",
                        classes_scanned,
                        todos_in_window,
                        notifications_sent,
                        notifications_failed,
                        students_skipped
                    );
                }
                Err(e) => {
                    // next tick retries from scratch
                    warn!("Deadline scan failed: {:?}", e);
                }
            }
        }
    }
}
