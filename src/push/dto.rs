use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub notification: Notification<'a>,
}

#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub icon: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub results: Vec<SendResult>,
}

#[derive(Debug, Deserialize)]
pub struct SendResult {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
