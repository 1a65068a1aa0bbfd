use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::TreeError;

macro_rules! uuid_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = TreeError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|_| TreeError::InvalidInput(format!("Invalid {}: {}", $label, value)))
            }
        }
    };
}

uuid_id!(ConversationId, "conversation id");
uuid_id!(MessageId, "message id");
uuid_id!(UserId, "user id");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(TreeError::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub model: String,
    pub language: String,
    pub started_at: DateTime<Utc>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_id: UserId,
    pub title: Option<String>,
    pub model: String,
    pub language: String,
}

/// A persisted node of the conversation tree. Immutable after creation apart
/// from `is_deleted`; edits become new children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub parent_id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Message {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Creation order: timestamp first, id as the tie-break.
    pub fn creation_order(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn as_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub parent_id: Option<MessageId>,
    pub role: Role,
    pub content: String,
}

impl NewMessage {
    pub fn user(
        conversation_id: ConversationId,
        parent_id: Option<MessageId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            parent_id,
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(
        conversation_id: ConversationId,
        parent_id: MessageId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            parent_id: Some(parent_id),
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Materializes the draft with a fresh id and timestamp.
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: self.conversation_id,
            parent_id: self.parent_id,
            role: self.role,
            content: self.content,
            created_at: Utc::now(),
            is_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureEdge {
    pub ancestor_id: MessageId,
    pub descendant_id: MessageId,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorLink {
    pub ancestor_id: MessageId,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescendantLink {
    pub descendant_id: MessageId,
    pub depth: u32,
}

/// Role/content pair handed to the assistant responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}
