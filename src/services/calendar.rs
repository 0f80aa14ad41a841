use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ClassRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub class_id: String,
    pub classname: String,
    pub todo_id: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub completed: bool,
}

/// Deadlines from every class `uid` manages or attends, earliest first.
/// To-dos without a usable deadline are left off the calendar.
pub fn calendar_events(classes: &[ClassRecord], uid: &str) -> Vec<CalendarEvent> {
    let mut events: Vec<CalendarEvent> = classes
        .iter()
        .filter(|class| class.is_member(uid))
        .flat_map(|class| {
            class.todos.iter().filter_map(move |todo| {
                todo.deadline_at().map(|deadline| CalendarEvent {
                    class_id: class.id.clone(),
                    classname: class.classname.clone(),
                    todo_id: todo.id.clone(),
                    title: todo.title.clone(),
                    deadline,
                    completed: todo.is_completed_by(uid),
                })
            })
        })
        .collect();

    events.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.title.cmp(&b.title)));
    events
}
