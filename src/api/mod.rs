pub mod auth;

use axum::Json;
use axum::extract::Path;
use axum::routing::{patch, post, put};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use chrono::Utc;
use serde::Serialize;

use crate::db::repository;
use crate::error::AppError;
use crate::models::*;
use crate::services::{CalendarEvent, ScanStats, calendar_events};
use crate::state::AppState;

pub use auth::{AuthUser, USER_ID_HEADER};

#[derive(Debug, Serialize)]
struct StudentSummary {
    uid: String,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    completed: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/me", get(get_me).put(update_me))
        .route("/me/fcm-token", put(register_fcm_token).delete(clear_fcm_token))
        .route("/classes", get(list_classes).post(create_class))
        .route("/classes/join", post(join_class))
        .route(
            "/classes/{id}",
            get(get_class).patch(rename_class).delete(delete_class),
        )
        .route("/classes/{id}/students", get(list_students))
        .route("/classes/{id}/todos", post(create_todo))
        .route(
            "/classes/{id}/todos/{todo_id}",
            patch(update_todo).delete(delete_todo),
        )
        .route("/classes/{id}/todos/{todo_id}/toggle", post(toggle_todo))
        .route("/calendar", get(calendar))
        .route("/notifications/scan", post(scan_now))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

fn required_text(value: &str, field: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

/// Blank clears; anything else must parse as a deadline.
fn validated_deadline(raw: Option<String>) -> Result<Option<String>, AppError> {
    match raw.map(|d| d.trim().to_string()) {
        None => Ok(None),
        Some(d) if d.is_empty() => Ok(Some(d)),
        Some(d) => {
            if parse_deadline(&d).is_none() {
                return Err(AppError::BadRequest(format!("Invalid deadline: {}", d)));
            }
            Ok(Some(d))
        }
    }
}

async fn load_class(state: &AppState, id: &str) -> Result<ClassRecord, AppError> {
    repository::find_class_by_id(&state.db, id)
        .await?
        .ok_or(AppError::NotFound)
}

async fn load_managed_class(state: &AppState, id: &str, uid: &str) -> Result<ClassRecord, AppError> {
    let class = load_class(state, id).await?;
    if !class.is_manager(uid) {
        return Err(AppError::Forbidden(
            "Only the class manager can do this".to_string(),
        ));
    }
    Ok(class)
}

async fn get_me(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> Result<Json<UserRecord>, AppError> {
    let user = repository::find_user_by_id(&state.db, &uid)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(user))
}

async fn update_me(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserRecord>, AppError> {
    let user = repository::upsert_user(&state.db, &uid, req).await?;
    Ok(Json(user))
}

async fn register_fcm_token(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(req): Json<FcmTokenRequest>,
) -> Result<Json<UserRecord>, AppError> {
    let token = required_text(&req.token, "token")?;
    let user = repository::set_fcm_token(&state.db, &uid, Some(&token)).await?;
    Ok(Json(user))
}

async fn clear_fcm_token(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> Result<StatusCode, AppError> {
    repository::set_fcm_token(&state.db, &uid, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_classes(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> Result<Json<Vec<ClassRecord>>, AppError> {
    let classes = repository::fetch_classes_for_user(&state.db, &uid).await?;
    Ok(Json(classes))
}

async fn create_class(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(req): Json<NewClassRequest>,
) -> Result<(StatusCode, Json<ClassRecord>), AppError> {
    let classname = required_text(&req.classname, "classname")?;

    require_teacher(&state, &uid, "create classes").await?;

    let class = repository::insert_class(&state.db, &uid, &classname).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

async fn get_class(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ClassRecord>, AppError> {
    let class = load_class(&state, &id).await?;
    if !class.is_member(&uid) {
        return Err(AppError::Forbidden("Not a member of this class".to_string()));
    }
    Ok(Json(class))
}

async fn rename_class(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RenameClassRequest>,
) -> Result<StatusCode, AppError> {
    let classname = required_text(&req.classname, "classname")?;
    load_managed_class(&state, &id, &uid).await?;

    if repository::rename_class(&state.db, &id, &classname).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn delete_class(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    load_managed_class(&state, &id, &uid).await?;

    if repository::delete_class(&state.db, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn list_students(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<StudentSummary>>, AppError> {
    let class = load_managed_class(&state, &id, &uid).await?;

    let mut students = Vec::with_capacity(class.students.len());
    for student_id in class.students {
        let email = repository::find_user_by_id(&state.db, &student_id)
            .await?
            .and_then(|u| u.email);
        students.push(StudentSummary {
            uid: student_id,
            email,
        });
    }
    Ok(Json(students))
}

async fn join_class(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Json(req): Json<JoinClassRequest>,
) -> Result<Json<ClassRecord>, AppError> {
    let code = required_text(&req.invite_code, "inviteCode")?;

    let class = repository::find_class_by_invite_code(&state.db, &code)
        .await?
        .ok_or(AppError::NotFound)?;
    if class.is_manager(&uid) {
        return Err(AppError::BadRequest(
            "The class manager cannot join as a student".to_string(),
        ));
    }

    let class = repository::add_student(&state.db, &class.id, &uid).await?;
    Ok(Json(class))
}

async fn create_todo(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<NewTodoRequest>,
) -> Result<(StatusCode, Json<TodoEntry>), AppError> {
    let title = required_text(&req.title, "title")?;
    let deadline = validated_deadline(req.deadline)?.filter(|d| !d.is_empty());
    load_managed_class(&state, &id, &uid).await?;

    let todo = repository::append_todo(&state.db, &id, &title, deadline).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn update_todo(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path((id, todo_id)): Path<(String, String)>,
    Json(req): Json<UpdateTodoRequest>,
) -> Result<Json<TodoEntry>, AppError> {
    let title = req
        .title
        .as_deref()
        .map(|t| required_text(t, "title"))
        .transpose()?;
    let deadline = validated_deadline(req.deadline)?;
    load_managed_class(&state, &id, &uid).await?;

    let todo = repository::update_todo(
        &state.db,
        &id,
        &todo_id,
        UpdateTodoRequest { title, deadline },
    )
    .await?;
    Ok(Json(todo))
}

async fn delete_todo(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path((id, todo_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    load_managed_class(&state, &id, &uid).await?;
    repository::remove_todo(&state.db, &id, &todo_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_todo(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
    Path((id, todo_id)): Path<(String, String)>,
) -> Result<Json<ToggleResponse>, AppError> {
    let class = load_class(&state, &id).await?;
    if !class.is_student(&uid) {
        return Err(AppError::Forbidden(
            "Only enrolled students can check off to-dos".to_string(),
        ));
    }

    let completed =
        repository::toggle_completion(&state.db, &id, &todo_id, &uid, Utc::now()).await?;
    Ok(Json(ToggleResponse { completed }))
}

async fn calendar(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> Result<Json<Vec<CalendarEvent>>, AppError> {
    let classes = repository::fetch_classes_for_user(&state.db, &uid).await?;
    Ok(Json(calendar_events(&classes, &uid)))
}

async fn require_teacher(state: &AppState, uid: &str, action: &str) -> Result<(), AppError> {
    let is_teacher = repository::find_user_by_id(&state.db, uid)
        .await?
        .is_some_and(|u| u.account_type == AccountType::Teacher);
    if !is_teacher {
        return Err(AppError::Forbidden(format!("Only teachers can {}", action)));
    }
    Ok(())
}

async fn scan_now(
    State(state): State<AppState>,
    AuthUser(uid): AuthUser,
) -> Result<Json<ScanStats>, AppError> {
    require_teacher(&state, &uid, "trigger a deadline scan").await?;
    let stats = state.notifier.run().await?;
    Ok(Json(stats))
}
