use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;
use crate::models::TodoEntry;

/// Class document with its enrolled students and embedded to-dos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub classname: String,
    pub manager_id: String,
    pub invite_code: String,
    pub students: Vec<String>,
    pub todos: Vec<TodoEntry>,
    #[serde(skip)]
    pub version: i64,
    pub created_at: String,
}

/// Raw `classes` row; `students` and `todos` hold JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub struct ClassRow {
    pub id: String,
    pub classname: String,
    pub manager_id: String,
    pub invite_code: String,
    pub students: String,
    pub todos: String,
    pub version: i64,
    pub created_at: String,
}

impl TryFrom<ClassRow> for ClassRecord {
    type Error = AppError;

    fn try_from(row: ClassRow) -> Result<Self, Self::Error> {
        let raw_students: Vec<String> = serde_json::from_str(&row.students)?;
        let todos: Vec<TodoEntry> = serde_json::from_str(&row.todos)?;

        // enrollment is a set; keep first occurrence order
        let mut students: Vec<String> = Vec::with_capacity(raw_students.len());
        for uid in raw_students {
            if !uid.is_empty() && !students.contains(&uid) {
                students.push(uid);
            }
        }

        Ok(Self {
            id: row.id,
            classname: row.classname,
            manager_id: row.manager_id,
            invite_code: row.invite_code,
            students,
            todos,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

impl ClassRecord {
    pub fn is_manager(&self, uid: &str) -> bool {
        self.manager_id == uid
    }

    pub fn is_student(&self, uid: &str) -> bool {
        self.students.iter().any(|s| s == uid)
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.is_manager(uid) || self.is_student(uid)
    }

    pub fn find_todo(&self, todo_id: &str) -> Option<&TodoEntry> {
        self.todos.iter().find(|t| t.id == todo_id)
    }

    /// Enrolled students who have not completed `todo`, in enrollment order.
    pub fn pending_students<'a>(&'a self, todo: &TodoEntry) -> Vec<&'a str> {
        let completed = todo.completed_uids();
        self.students
            .iter()
            .map(String::as_str)
            .filter(|uid| !completed.contains(uid))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassRequest {
    pub classname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameClassRequest {
    pub classname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClassRequest {
    pub invite_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(students: &str, todos: &str) -> ClassRow {
        ClassRow {
            id: "c1".to_string(),
            classname: "수학".to_string(),
            manager_id: "teacher".to_string(),
            invite_code: "ABC123".to_string(),
            students: students.to_string(),
            todos: todos.to_string(),
            version: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_decode_dedupes_students() {
        let class = ClassRecord::try_from(row(r#"["b", "a", "b", ""]"#, "[]"))
            .expect("Failed to decode class");
        assert_eq!(class.students, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_decode_rejects_malformed_todos() {
        let result = ClassRecord::try_from(row("[]", "not json"));
        assert!(matches!(result, Err(AppError::Serialization(_))));
    }

    #[test]
    fn test_pending_students_keeps_enrollment_order() {
        let class = ClassRecord::try_from(row(
            r#"["c", "a", "b"]"#,
            r#"[{"id": "t1", "title": "HW1", "completedBy": ["a"]}]"#,
        ))
        .expect("Failed to decode class");

        let todo = class.find_todo("t1").expect("Todo not found");
        assert_eq!(class.pending_students(todo), vec!["c", "b"]);
        assert!(class.is_member("teacher"));
        assert!(class.is_student("a"));
        assert!(!class.is_student("teacher"));
    }
}
