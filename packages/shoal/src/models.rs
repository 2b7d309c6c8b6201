use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated user's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A chat room, as returned by the room list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_is_private")]
    pub is_private: bool,
    #[serde(default)]
    pub created_by_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub member_usernames: Vec<String>,
}

// The backend defaults rooms to private.
fn default_is_private() -> bool {
    true
}

/// Payload for creating a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub invited_usernames: Vec<String>,
    pub is_private: bool,
}

/// Room detail: the room plus its resolved member list.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomDetail {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_is_private")]
    pub is_private: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A chat message. `sender` is `None` when the sending account has been
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub plaintext: String,
    #[serde(default)]
    pub sender: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub file_url: String,
    pub file_size: u64,
    pub content_type: String,
}

impl Attachment {
    /// File name portion of the URL, for display.
    pub fn file_name(&self) -> &str {
        self.file_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.file_url)
    }
}
