use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::TodoEntry;
use crate::push::{PushClient, PushPayload};

pub const NOTIFY_WINDOW_HOURS: i64 = 24;
pub const NOTIFICATION_BODY: &str = "숙제 마감일이 24시간 남았습니다!";
pub const NOTIFICATION_ICON: &str = "/icons/logo.png";

/// Builds the message sent for a to-do that is about to be due.
pub fn deadline_payload(todo: &TodoEntry) -> PushPayload {
    PushPayload {
        title: format!("마감 임박: {}", todo.title),
        body: NOTIFICATION_BODY.to_string(),
        icon: NOTIFICATION_ICON.to_string(),
    }
}

/// Whether `deadline` falls in `(now, now + 24h]`.
pub fn in_notify_window(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline > now && deadline <= now + Duration::hours(NOTIFY_WINDOW_HOURS)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub classes_scanned: usize,
    pub todos_in_window: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub students_skipped: usize,
}

/// Scans every class for to-dos due within a day and pushes a reminder to
/// each enrolled student who has not completed them.
///
/// Read-only against the store and stateless across runs, so a to-do that
/// stays in the window is announced again on the next run.
pub struct DeadlineNotifier {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushClient>,
}

impl DeadlineNotifier {
    pub fn new(store: Arc<dyn DocumentStore>, push: Arc<dyn PushClient>) -> Self {
        Self { store, push }
    }

    pub async fn run(&self) -> Result<ScanStats, AppError> {
        self.run_at(Utc::now()).await
    }

    /// One scan as of `now`. Only a failure to enumerate classes is returned;
    /// everything per student or per to-do is logged and counted.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ScanStats, AppError> {
        info!("Starting deadline scan at {}", now.to_rfc3339());
        let mut stats = ScanStats::default();

        let classes = self.store.list_classes().await?;

        for class in &classes {
            stats.classes_scanned += 1;

            for todo in &class.todos {
                let Some(raw) = todo.deadline.as_deref().filter(|d| !d.trim().is_empty()) else {
                    continue;
                };
                let Some(deadline) = todo.deadline_at() else {
                    warn!(
                        "Unparseable deadline {:?} on todo {} in class {}",
                        raw, todo.id, class.id
                    );
                    continue;
                };
                if !in_notify_window(deadline, now) {
                    continue;
                }
                stats.todos_in_window += 1;

                let payload = deadline_payload(todo);
                for student_id in class.pending_students(todo) {
                    self.notify_student(student_id, todo, &payload, &mut stats)
                        .await;
                }
            }
        }

        info!("Deadline scan completed: {:?}", stats);
        Ok(stats)
    }

    async fn notify_student(
        &self,
        student_id: &str,
        todo: &TodoEntry,
        payload: &PushPayload,
        stats: &mut ScanStats,
    ) {
        let user = match self.store.get_user(student_id).await {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to load user {}: {}", student_id, e);
                stats.students_skipped += 1;
                return;
            }
        };

        let Some(token) = user.as_ref().and_then(|u| u.push_token()) else {
            debug!("No push token for user {}, skipping", student_id);
            stats.students_skipped += 1;
            return;
        };

        match self.push.send(token, payload).await {
            Ok(()) => {
                info!("Notification sent to user {} for todo {}", student_id, todo.title);
                stats.notifications_sent += 1;
            }
            Err(e) => {
                error!(
                    "Error sending notification to user {} for todo {}: {}",
                    student_id, todo.title, e
                );
                stats.notifications_failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let day = Duration::hours(24);

        assert!(!in_notify_window(now, now));
        assert!(!in_notify_window(now - Duration::seconds(1), now));
        assert!(in_notify_window(now + Duration::seconds(1), now));
        assert!(in_notify_window(now + day, now));
        assert!(!in_notify_window(now + day + Duration::seconds(1), now));
    }

    #[test]
    fn test_payload_shape() {
        let todo = TodoEntry::new("HW1".to_string(), None);
        let payload = deadline_payload(&todo);
        assert_eq!(payload.title, "마감 임박: HW1");
        assert!(payload.body.contains("24시간"));
        assert_eq!(payload.icon, "/icons/logo.png");
    }
}
