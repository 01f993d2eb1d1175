use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: TokenPair,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub token: Option<TokenPair>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// `{ "msg": ... }` acknowledgement returned by account endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub name: String,
    pub password: String,
    pub password2: String,
    pub tc: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Attachment {
    pub id: u64,
    pub file: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// File name without the storage directory
    pub fn file_name(&self) -> &str {
        self.file.rsplit('/').next().unwrap_or(&self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Note {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub slug: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Author email
    #[serde(default)]
    pub username: Option<String>,
    /// Author display name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avg_rating: Option<f64>,
    #[serde(default)]
    pub ratings_count: u32,
    #[serde(default)]
    pub user_rating: Option<u8>,
    #[serde(default)]
    pub is_bookmarked: bool,
}

impl Note {
    /// Display name when set, otherwise the username
    pub fn author(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.username.as_deref())
    }
}

/// Fields for creating or editing a note
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: Option<String>,
    pub body: Option<String>,
    pub category: Option<String>,
}

/// Row from the backend search endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body_snippet: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub notes_count: u32,
    #[serde(default)]
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminUser {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub notes_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminUserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// A timestamp that is missing, null or unparseable becomes `None` instead of
/// rejecting the whole record
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc)),
        _ => None,
    })
}
