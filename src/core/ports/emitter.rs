use serde::{Deserialize, Serialize};

use crate::core::model::{ConversationId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ConversationCreated {
        conversation_id: ConversationId,
    },
    ConversationUpdated {
        conversation_id: ConversationId,
    },
    BranchSwitched {
        conversation_id: ConversationId,
        leaf: Option<MessageId>,
    },
}

pub trait EmitterPort: Send + Sync {
    fn emit(&self, event: SessionEvent);
}
