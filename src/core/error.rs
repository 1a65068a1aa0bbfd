use thiserror::Error;

use super::model::{ConversationId, MessageId};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error("Parent {0} is not in the active path")]
    ParentNotInPath(MessageId),

    #[error("Parent {parent} does not belong to conversation {conversation}")]
    ParentMismatch {
        parent: MessageId,
        conversation: ConversationId,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Closure index inconsistency: {0}")]
    Consistency(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Assistant responder failed: {0}")]
    Responder(String),
}

impl TreeError {
    /// Transient failures may be retried as a fresh send.
    pub fn is_transient(&self) -> bool {
        matches!(self, TreeError::Storage(_) | TreeError::Responder(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TreeError::ConversationNotFound(_) | TreeError::MessageNotFound(_)
        )
    }
}

pub type TreeResult<T> = Result<T, TreeError>;
