#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use classtodo::db::DocumentStore;
use classtodo::error::AppError;
use classtodo::models::{AccountType, ClassRecord, CompletionMarker, TodoEntry, UserRecord};
use classtodo::push::{PushClient, PushPayload};

#[derive(Default)]
pub struct FakeStore {
    pub classes: Vec<ClassRecord>,
    pub users: HashMap<String, UserRecord>,
    pub fail_listing: bool,
    /// Uids whose lookup returns an error.
    pub failing_users: HashSet<String>,
    pub user_lookups: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_class(mut self, class: ClassRecord) -> Self {
        self.classes.push(class);
        self
    }

    pub fn failing_lookup_for(mut self, uid: &str) -> Self {
        self.failing_users.insert(uid.to_string());
        self
    }

    pub fn with_user(mut self, uid: &str, token: Option<&str>) -> Self {
        self.users.insert(uid.to_string(), user(uid, token));
        self
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn list_classes(&self) -> Result<Vec<ClassRecord>, AppError> {
        if self.fail_listing {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.classes.clone())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, AppError> {
        self.user_lookups.lock().unwrap().push(uid.to_string());
        if self.failing_users.contains(uid) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.users.get(uid).cloned())
    }
}

/// Records every dispatch attempt; tokens in `failing` are rejected.
#[derive(Default)]
pub struct RecordingPush {
    pub attempts: Mutex<Vec<(String, PushPayload)>>,
    pub failing: HashSet<String>,
}

impl RecordingPush {
    pub fn failing_on(tokens: &[&str]) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            failing: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn attempts(&self) -> Vec<(String, PushPayload)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(token, _)| token).collect()
    }
}

#[async_trait]
impl PushClient for RecordingPush {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), AppError> {
        self.attempts
            .lock()
            .unwrap()
            .push((token.to_string(), payload.clone()));
        if self.failing.contains(token) {
            return Err(AppError::Push("NotRegistered".to_string()));
        }
        Ok(())
    }
}

pub fn user(uid: &str, token: Option<&str>) -> UserRecord {
    UserRecord {
        id: uid.to_string(),
        email: Some(format!("{}@example.com", uid)),
        display_name: None,
        account_type: AccountType::Student,
        fcm_token: token.map(str::to_string),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

pub fn todo(id: &str, title: &str, deadline: Option<String>, completed_by: Vec<CompletionMarker>) -> TodoEntry {
    TodoEntry {
        id: id.to_string(),
        title: title.to_string(),
        deadline,
        completed_by,
    }
}

pub fn class(id: &str, students: &[&str], todos: Vec<TodoEntry>) -> ClassRecord {
    ClassRecord {
        id: id.to_string(),
        classname: format!("class {}", id),
        manager_id: "teacher".to_string(),
        invite_code: "ABC123".to_string(),
        students: students.iter().map(|s| s.to_string()).collect(),
        todos,
        version: 0,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}
