use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Student,
    Teacher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub account_type: AccountType,
    pub fcm_token: Option<String>,
    pub created_at: String,
}

impl UserRecord {
    /// Device token usable for push delivery, if any.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub account_type: Option<AccountType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmTokenRequest {
    pub token: String,
}
