use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityParseError {
    #[error("client identifier must not be empty")]
    Empty,
}

/// Stable identifier attributing messages and tasks to this installation.
///
/// Never empty: the only constructors either validate or generate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientIdentity {
    id: String,
}

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityParseError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        Ok(Self {
            id: trimmed.to_string(),
        })
    }

    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl TryFrom<String> for ClientIdentity {
    type Error = IdentityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientIdentity> for String {
    fn from(value: ClientIdentity) -> Self {
        value.id
    }
}

/// Chat room number. Absence of a room means the single global room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A single chat line. `time` is display text only; list order is arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub user_id: String,
    pub body: String,
    #[serde(default)]
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Author display name, when the backend embeds it in history entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Author profile joined in by the backend for room history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl ChatMessage {
    pub fn new_local(
        author: &ClientIdentity,
        room_id: Option<RoomId>,
        body: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: author.as_str().to_string(),
            body: body.into(),
            time: time.into(),
            room_id,
            name: None,
            user: None,
        }
    }

    pub fn is_from(&self, identity: &ClientIdentity) -> bool {
        self.user_id == identity.as_str()
    }
}

/// Roster entry as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(alias = "userId")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Participant {
    /// Name to render, falling back to the raw id when unnamed.
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "body")]
    pub value: String,
    #[serde(default)]
    pub completed: bool,
}

/// Body of a task create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub user_id: String,
    pub value: String,
}

/// Partial update applied to a stored task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            completed: None,
        }
    }

    pub fn complete() -> Self {
        Self {
            value: None,
            completed: Some(true),
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(value) = &self.value {
            task.value = value.clone();
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

// Backends hand out numeric ids for stored rows and string ids for client-made ones.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_blank_ids() {
        assert_eq!(ClientIdentity::new("   "), Err(IdentityParseError::Empty));
        let identity = ClientIdentity::new("  abc ").expect("valid id");
        assert_eq!(identity.as_str(), "abc");
    }

    #[test]
    fn identity_deserialization_validates() {
        let err = serde_json::from_str::<ClientIdentity>("\"\"");
        assert!(err.is_err());
        let ok: ClientIdentity = serde_json::from_str("\"user-1\"").expect("identity");
        assert_eq!(ok.to_string(), "user-1");
    }

    #[test]
    fn participant_accepts_user_id_alias_and_defaults_active() {
        let participant: Participant =
            serde_json::from_str(r#"{"userId":"u1","name":"Ada"}"#).expect("participant");
        assert_eq!(participant.id, "u1");
        assert!(participant.active);
        assert_eq!(participant.label(), "Ada");

        let unnamed: Participant =
            serde_json::from_str(r#"{"id":"u2","active":false}"#).expect("participant");
        assert!(!unnamed.active);
        assert_eq!(unnamed.label(), "u2");
    }

    #[test]
    fn history_messages_accept_numeric_ids() {
        let message: ChatMessage = serde_json::from_str(
            r#"{"id":42,"userId":"u1","body":"hi","time":"10:02","roomId":3}"#,
        )
        .expect("message");
        assert_eq!(message.id, "42");
        assert_eq!(message.room_id, Some(RoomId(3)));
    }

    #[test]
    fn room_history_messages_carry_author_profile() {
        let message: ChatMessage = serde_json::from_str(
            r#"{"id":3,"userId":"u9","body":"hi","roomId":2,"user":{"id":"u9","name":"Lin"}}"#,
        )
        .expect("message");
        assert_eq!(
            message.user,
            Some(UserProfile {
                id: "u9".into(),
                name: Some("Lin".into()),
            })
        );

        let bare: ChatMessage =
            serde_json::from_str(r#"{"id":"a","userId":"u9","body":"hi","user":null}"#)
                .expect("message");
        assert_eq!(bare.user, None);
    }

    #[test]
    fn task_patch_only_touches_present_fields() {
        let mut task = Task {
            id: "t1".into(),
            value: "buy milk".into(),
            completed: false,
        };
        TaskPatch::complete().apply_to(&mut task);
        assert!(task.completed);
        assert_eq!(task.value, "buy milk");

        let encoded = serde_json::to_value(TaskPatch::value("oat milk")).expect("patch");
        assert_eq!(encoded, serde_json::json!({ "value": "oat milk" }));
    }
}
