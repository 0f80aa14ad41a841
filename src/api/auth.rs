use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

/// Header carrying the subject id issued by the external auth provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(|uid| AuthUser(uid.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}
