use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A to-do embedded in a class record's `todos` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoEntry {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_deadline")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub completed_by: Vec<CompletionMarker>,
}

/// Completion marker stored in `completedBy`.
///
/// Older records hold a bare user id; current writes store the uid together
/// with the time the student checked the to-do off. Only the uid decides
/// membership, so an odd or missing timestamp never rejects the marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionMarker {
    Legacy(String),
    Timed {
        uid: String,
        #[serde(default, deserialize_with = "deserialize_marker_time")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl CompletionMarker {
    pub fn uid(&self) -> &str {
        match self {
            CompletionMarker::Legacy(uid) => uid,
            CompletionMarker::Timed { uid, .. } => uid,
        }
    }
}

impl TodoEntry {
    pub fn new(title: String, deadline: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            deadline,
            completed_by: Vec::new(),
        }
    }

    /// Absolute deadline, or `None` when absent or unparseable.
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline.as_deref().and_then(parse_deadline)
    }

    pub fn completed_uids(&self) -> HashSet<&str> {
        self.completed_by.iter().map(CompletionMarker::uid).collect()
    }

    pub fn is_completed_by(&self, uid: &str) -> bool {
        self.completed_by.iter().any(|m| m.uid() == uid)
    }
}

/// Parses a stored deadline into an instant.
///
/// Accepts RFC 3339, naive date-times (taken as UTC) and bare dates
/// (midnight UTC).
pub fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// Epoch milliseconds are normalised to RFC 3339. Any other shape is kept as
// raw text so that only this to-do, not the whole class, becomes ineligible.
fn deserialize_deadline<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(
            n.as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| n.to_string()),
        ),
        Some(other) => Some(other.to_string()),
    })
}

// RFC 3339 strings, epoch milliseconds and `{seconds, nanoseconds}` maps are
// understood; anything else decodes as an unknown completion time.
fn deserialize_marker_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(serde_json::Value::Number(n)) => {
            n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis)
        }
        Some(serde_json::Value::Object(map)) => map
            .get("seconds")
            .and_then(serde_json::Value::as_i64)
            .and_then(|secs| {
                let nanos = map
                    .get("nanoseconds")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0);
                DateTime::<Utc>::from_timestamp(secs, nanos)
            }),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTodoRequest {
    pub title: String,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// Partial update. An empty `deadline` clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    pub deadline: Option<String>,
}
