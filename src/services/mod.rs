pub mod calendar;
pub mod notifier;
pub mod scheduler;

pub use calendar::{CalendarEvent, calendar_events};
pub use notifier::{DeadlineNotifier, ScanStats};
pub use scheduler::NotificationScheduler;
