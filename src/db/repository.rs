use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    ClassRecord, ClassRow, CompletionMarker, TodoEntry, UpdateProfileRequest, UpdateTodoRequest,
    UserRecord,
};

const CLASS_COLUMNS: &str =
    "id, classname, manager_id, invite_code, students, todos, version, created_at";

const USER_COLUMNS: &str = "id, email, display_name, account_type, fcm_token, created_at";

/// Attempts for a read-modify-write of a class row before giving up.
const MAX_WRITE_ATTEMPTS: usize = 5;

const INVITE_CODE_LEN: usize = 6;

// ---- users ----

pub async fn find_user_by_id(db: &SqlitePool, id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Creates the user on first sight; afterwards only the provided fields change.
pub async fn upsert_user(
    db: &SqlitePool,
    id: &str,
    req: UpdateProfileRequest,
) -> Result<UserRecord, sqlx::Error> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, display_name, account_type, fcm_token, created_at)
        VALUES (?1, ?2, ?3, COALESCE(?4, 'student'), NULL, ?5)
        ON CONFLICT(id) DO UPDATE SET
            email = COALESCE(?2, users.email),
            display_name = COALESCE(?3, users.display_name),
            account_type = COALESCE(?4, users.account_type)
        "#,
    )
    .bind(id)
    .bind(&req.email)
    .bind(&req.display_name)
    .bind(req.account_type)
    .bind(&now)
    .execute(db)
    .await?;

    find_user_by_id(db, id)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound)
}

/// Registers (or with `None` clears) the user's push token.
pub async fn set_fcm_token(
    db: &SqlitePool,
    id: &str,
    token: Option<&str>,
) -> Result<UserRecord, sqlx::Error> {
    let token = token.map(str::trim).filter(|t| !t.is_empty());
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, display_name, account_type, fcm_token, created_at)
        VALUES (?1, NULL, NULL, 'student', ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET fcm_token = ?2
        "#,
    )
    .bind(id)
    .bind(token)
    .bind(&now)
    .execute(db)
    .await?;

    find_user_by_id(db, id)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound)
}

// ---- classes ----

fn decode_rows(rows: Vec<ClassRow>) -> Vec<ClassRecord> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match ClassRecord::try_from(row) {
                Ok(class) => Some(class),
                Err(e) => {
                    warn!("Skipping malformed class record {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

pub async fn fetch_all_classes(db: &SqlitePool) -> Result<Vec<ClassRecord>, AppError> {
    let rows = sqlx::query_as::<_, ClassRow>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes ORDER BY created_at, id"
    ))
    .fetch_all(db)
    .await?;

    Ok(decode_rows(rows))
}

/// Classes the user manages or is enrolled in.
pub async fn fetch_classes_for_user(
    db: &SqlitePool,
    uid: &str,
) -> Result<Vec<ClassRecord>, AppError> {
    let rows = sqlx::query_as::<_, ClassRow>(&format!(
        r#"
        SELECT {CLASS_COLUMNS} FROM classes
        WHERE manager_id = ?1
           OR EXISTS (
                SELECT 1
                FROM json_each(CASE WHEN json_valid(classes.students) THEN classes.students ELSE '[]' END)
                WHERE json_each.value = ?1
           )
        ORDER BY created_at, id
        "#
    ))
    .bind(uid)
    .fetch_all(db)
    .await?;

    Ok(decode_rows(rows))
}

pub async fn find_class_by_id(db: &SqlitePool, id: &str) -> Result<Option<ClassRecord>, AppError> {
    let row = sqlx::query_as::<_, ClassRow>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;

    row.map(ClassRecord::try_from).transpose()
}

pub async fn find_class_by_invite_code(
    db: &SqlitePool,
    code: &str,
) -> Result<Option<ClassRecord>, AppError> {
    let row = sqlx::query_as::<_, ClassRow>(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes WHERE invite_code = ?"
    ))
    .bind(normalize_invite_code(code))
    .fetch_optional(db)
    .await?;

    row.map(ClassRecord::try_from).transpose()
}

pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn generate_invite_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .to_ascii_uppercase()
        .chars()
        .take(INVITE_CODE_LEN)
        .collect()
}

pub async fn insert_class(
    db: &SqlitePool,
    manager_id: &str,
    classname: &str,
) -> Result<ClassRecord, AppError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    for _ in 0..MAX_WRITE_ATTEMPTS {
        let invite_code = generate_invite_code();

        let result = sqlx::query(
            r#"
            INSERT INTO classes
                (id, classname, manager_id, invite_code, students, todos, version, created_at)
            VALUES (?1, ?2, ?3, ?4, '[]', '[]', 0, ?5)
            "#,
        )
        .bind(&id)
        .bind(classname)
        .bind(manager_id)
        .bind(&invite_code)
        .bind(&now)
        .execute(db)
        .await;

        match result {
            Ok(_) => {
                return Ok(ClassRecord {
                    id,
                    classname: classname.to_string(),
                    manager_id: manager_id.to_string(),
                    invite_code,
                    students: Vec::new(),
                    todos: Vec::new(),
                    version: 0,
                    created_at: now,
                });
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!("Invite code collision for {}, retrying", invite_code);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict("Could not allocate a unique invite code".to_string()))
}

pub async fn rename_class(db: &SqlitePool, id: &str, classname: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE classes SET classname = ?1, version = version + 1 WHERE id = ?2")
        .bind(classname)
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn delete_class(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

/// Writes back the embedded arrays if nobody else wrote since `class` was read.
async fn write_class(db: &SqlitePool, class: &ClassRecord) -> Result<bool, AppError> {
    let students = serde_json::to_string(&class.students)?;
    let todos = serde_json::to_string(&class.todos)?;

    let result = sqlx::query(
        r#"
        UPDATE classes
        SET students = ?1,
            todos = ?2,
            version = version + 1
        WHERE id = ?3 AND version = ?4
        "#,
    )
    .bind(students)
    .bind(todos)
    .bind(&class.id)
    .bind(class.version)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

/// Optimistic read-modify-write of a class's `students`/`todos`.
async fn modify_class<T, F>(db: &SqlitePool, class_id: &str, mut apply: F) -> Result<T, AppError>
where
    F: FnMut(&mut ClassRecord) -> Result<T, AppError>,
{
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let mut class = find_class_by_id(db, class_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let output = apply(&mut class)?;

        if write_class(db, &class).await? {
            return Ok(output);
        }
        warn!("Concurrent update on class {} (attempt {}), retrying", class_id, attempt);
    }

    Err(AppError::Conflict(format!("Class {} is being modified concurrently", class_id)))
}

/// Enrolls `uid`. Joining twice is a no-op.
pub async fn add_student(db: &SqlitePool, class_id: &str, uid: &str) -> Result<ClassRecord, AppError> {
    modify_class(db, class_id, |class| {
        if !class.is_student(uid) {
            class.students.push(uid.to_string());
        }
        let mut updated = class.clone();
        updated.version += 1;
        Ok(updated)
    })
    .await
}

pub async fn append_todo(
    db: &SqlitePool,
    class_id: &str,
    title: &str,
    deadline: Option<String>,
) -> Result<TodoEntry, AppError> {
    let todo = TodoEntry::new(title.to_string(), deadline);

    modify_class(db, class_id, |class| {
        class.todos.push(todo.clone());
        Ok(todo.clone())
    })
    .await
}

pub async fn update_todo(
    db: &SqlitePool,
    class_id: &str,
    todo_id: &str,
    req: UpdateTodoRequest,
) -> Result<TodoEntry, AppError> {
    modify_class(db, class_id, |class| {
        let todo = class
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or(AppError::NotFound)?;

        if let Some(title) = &req.title {
            todo.title = title.clone();
        }
        if let Some(deadline) = &req.deadline {
            todo.deadline = if deadline.trim().is_empty() {
                None
            } else {
                Some(deadline.clone())
            };
        }
        Ok(todo.clone())
    })
    .await
}

pub async fn remove_todo(db: &SqlitePool, class_id: &str, todo_id: &str) -> Result<(), AppError> {
    modify_class(db, class_id, |class| {
        let before = class.todos.len();
        class.todos.retain(|t| t.id != todo_id);
        if class.todos.len() == before {
            return Err(AppError::NotFound);
        }
        Ok(())
    })
    .await
}

/// Flips `uid`'s completion of a to-do and returns the new state.
///
/// Unchecking drops every marker for `uid`, whichever form it was stored in.
pub async fn toggle_completion(
    db: &SqlitePool,
    class_id: &str,
    todo_id: &str,
    uid: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    modify_class(db, class_id, |class| {
        let todo = class
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or(AppError::NotFound)?;

        if todo.is_completed_by(uid) {
            todo.completed_by.retain(|m| m.uid() != uid);
            Ok(false)
        } else {
            todo.completed_by.push(CompletionMarker::Timed {
                uid: uid.to_string(),
                timestamp: Some(now),
            });
            Ok(true)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");

        crate::db::migrate(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    #[tokio::test]
    async fn test_upsert_user_defaults_and_preserves_fields() {
        let pool = setup_test_db().await;

        let user = upsert_user(
            &pool,
            "u1",
            UpdateProfileRequest {
                email: Some("kim@example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to upsert user");
        assert_eq!(user.account_type, AccountType::Student);
        assert!(user.fcm_token.is_none());

        let user = upsert_user(
            &pool,
            "u1",
            UpdateProfileRequest {
                account_type: Some(AccountType::Teacher),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to upsert user");
        assert_eq!(user.account_type, AccountType::Teacher);
        assert_eq!(user.email.as_deref(), Some("kim@example.com"));
    }

    #[tokio::test]
    async fn test_set_and_clear_fcm_token() {
        let pool = setup_test_db().await;

        let user = set_fcm_token(&pool, "u1", Some("token-1"))
            .await
            .expect("Failed to set token");
        assert_eq!(user.push_token(), Some("token-1"));

        let user = set_fcm_token(&pool, "u1", Some("  "))
            .await
            .expect("Failed to set token");
        assert!(user.fcm_token.is_none());
    }

    #[tokio::test]
    async fn test_insert_class_and_join_by_invite_code() {
        let pool = setup_test_db().await;

        let class = insert_class(&pool, "teacher", "수학")
            .await
            .expect("Failed to insert class");
        assert_eq!(class.invite_code.len(), INVITE_CODE_LEN);

        let found = find_class_by_invite_code(&pool, &class.invite_code.to_lowercase())
            .await
            .expect("Failed to query class")
            .expect("Class not found");
        assert_eq!(found.id, class.id);

        add_student(&pool, &class.id, "s1").await.expect("Failed to join");
        let joined = add_student(&pool, &class.id, "s1").await.expect("Failed to join");
        assert_eq!(joined.students, vec!["s1".to_string()]);

        let mine = fetch_classes_for_user(&pool, "s1").await.expect("Failed to fetch");
        assert_eq!(mine.len(), 1);
        let mine = fetch_classes_for_user(&pool, "teacher").await.expect("Failed to fetch");
        assert_eq!(mine.len(), 1);
        let mine = fetch_classes_for_user(&pool, "stranger").await.expect("Failed to fetch");
        assert!(mine.is_empty());
    }

    #[tokio::test]
    async fn test_todo_lifecycle() {
        let pool = setup_test_db().await;
        let class = insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");

        let todo = append_todo(&pool, &class.id, "숙제1", Some("2026-01-10T09:00:00Z".to_string()))
            .await
            .expect("Failed to append todo");

        let updated = update_todo(
            &pool,
            &class.id,
            &todo.id,
            UpdateTodoRequest {
                title: Some("숙제1 수정".to_string()),
                deadline: Some(String::new()),
            },
        )
        .await
        .expect("Failed to update todo");
        assert_eq!(updated.title, "숙제1 수정");
        assert!(updated.deadline.is_none());

        remove_todo(&pool, &class.id, &todo.id).await.expect("Failed to remove todo");
        let result = remove_todo(&pool, &class.id, &todo.id).await;
        assert!(matches!(result, Err(AppError::NotFound)));

        let class = find_class_by_id(&pool, &class.id)
            .await
            .expect("Failed to fetch class")
            .expect("Class not found");
        assert!(class.todos.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_completion_removes_legacy_marker() {
        let pool = setup_test_db().await;
        let class = insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");

        sqlx::query("UPDATE classes SET todos = ? WHERE id = ?")
            .bind(r#"[{"id": "t1", "title": "HW1", "completedBy": ["s1"]}]"#)
            .bind(&class.id)
            .execute(&pool)
            .await
            .expect("Failed to seed todos");

        let now = Utc::now();
        let completed = toggle_completion(&pool, &class.id, "t1", "s1", now)
            .await
            .expect("Failed to toggle");
        assert!(!completed);

        let completed = toggle_completion(&pool, &class.id, "t1", "s1", now)
            .await
            .expect("Failed to toggle");
        assert!(completed);

        let class = find_class_by_id(&pool, &class.id)
            .await
            .expect("Failed to fetch class")
            .expect("Class not found");
        let todo = class.find_todo("t1").expect("Todo not found");
        assert_eq!(todo.completed_by.len(), 1);
        assert!(matches!(&todo.completed_by[0], CompletionMarker::Timed { uid, .. } if uid == "s1"));

        let result = toggle_completion(&pool, &class.id, "missing", "s1", now).await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let pool = setup_test_db().await;
        let class = insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");

        let mut stale = find_class_by_id(&pool, &class.id)
            .await
            .expect("Failed to fetch class")
            .expect("Class not found");

        add_student(&pool, &class.id, "s1").await.expect("Failed to join");

        stale.students.push("s2".to_string());
        let written = write_class(&pool, &stale).await.expect("Failed to write");
        assert!(!written);

        let class = find_class_by_id(&pool, &class.id)
            .await
            .expect("Failed to fetch class")
            .expect("Class not found");
        assert_eq!(class.students, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_class_is_skipped_in_listing() {
        let pool = setup_test_db().await;
        insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");

        sqlx::query(
            "INSERT INTO classes (id, classname, manager_id, invite_code, students, todos, version, created_at) VALUES ('bad', 'x', 't', 'ZZZZZZ', '[]', 'garbage', 0, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("Failed to insert malformed class");

        let classes = fetch_all_classes(&pool).await.expect("Failed to fetch classes");
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].classname, "수학");
    }

    #[tokio::test]
    async fn test_malformed_students_do_not_break_member_listing() {
        let pool = setup_test_db().await;
        let class = insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");
        add_student(&pool, &class.id, "s1").await.expect("Failed to join");

        sqlx::query(
            "INSERT INTO classes (id, classname, manager_id, invite_code, students, todos, version, created_at) VALUES ('bad', 'x', 'teacher', 'ZZZZZZ', 'not json', '[]', 0, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("Failed to insert malformed class");

        let mine = fetch_classes_for_user(&pool, "s1").await.expect("Failed to fetch");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, class.id);

        // the malformed row matches on manager_id but is dropped while decoding
        let managed = fetch_classes_for_user(&pool, "teacher").await.expect("Failed to fetch");
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].id, class.id);
    }

    #[tokio::test]
    async fn test_timed_marker_without_usable_timestamp_keeps_class_readable() {
        let pool = setup_test_db().await;
        let class = insert_class(&pool, "teacher", "수학").await.expect("Failed to insert class");

        sqlx::query("UPDATE classes SET students = ?, todos = ? WHERE id = ?")
            .bind(r#"["s1", "s2"]"#)
            .bind(r#"[{"id": "t1", "title": "HW1", "completedBy": [{"uid": "s1", "timestamp": 1767225600000}, {"uid": "s2"}]}]"#)
            .bind(&class.id)
            .execute(&pool)
            .await
            .expect("Failed to seed todos");

        let classes = fetch_all_classes(&pool).await.expect("Failed to fetch classes");
        assert_eq!(classes.len(), 1);
        let todo = classes[0].find_todo("t1").expect("Todo not found");
        assert!(classes[0].pending_students(todo).is_empty());

        let completed = toggle_completion(&pool, &class.id, "t1", "s2", Utc::now())
            .await
            .expect("Failed to toggle");
        assert!(!completed);
    }
}
