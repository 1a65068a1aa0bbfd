//! In-memory [`ConversationStore`] for tests and throwaway sessions.
//!
//! A single mutex guards all tables, and closure rows are staged until the
//! whole insert has succeeded, which gives the same all-or-nothing behavior as
//! the SQLite transaction.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::closure::{self, ClosureIndex};
use crate::core::error::{TreeError, TreeResult};
use crate::core::model::{
    AncestorLink, ClosureEdge, Conversation, ConversationId, DescendantLink, Message, MessageId,
    NewConversation, NewMessage, UserId,
};
use crate::core::ports::store::ConversationStore;

#[derive(Debug, Default)]
struct MemoryTables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    closure: Vec<ClosureEdge>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

struct StagedClosure<'a> {
    committed: &'a [ClosureEdge],
    staged: Vec<ClosureEdge>,
}

impl ClosureIndex for StagedClosure<'_> {
    fn ancestors_of(&self, descendant: &MessageId) -> TreeResult<Vec<AncestorLink>> {
        Ok(self
            .committed
            .iter()
            .chain(self.staged.iter())
            .filter(|edge| edge.descendant_id == *descendant)
            .map(|edge| AncestorLink {
                ancestor_id: edge.ancestor_id,
                depth: edge.depth,
            })
            .collect())
    }

    fn insert_edge(&mut self, edge: ClosureEdge) -> TreeResult<()> {
        let duplicate = self
            .committed
            .iter()
            .chain(self.staged.iter())
            .any(|existing| {
                existing.ancestor_id == edge.ancestor_id
                    && existing.descendant_id == edge.descendant_id
            });
        if duplicate {
            return Err(TreeError::Consistency(format!(
                "row {} -> {} already exists",
                edge.ancestor_id, edge.descendant_id
            )));
        }
        self.staged.push(edge);
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TreeResult<MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| TreeError::Storage("memory store lock poisoned".to_string()))
    }

    /// Every closure row, for consistency checks.
    pub fn closure_edges(&self) -> TreeResult<Vec<ClosureEdge>> {
        Ok(self.lock()?.closure.clone())
    }

    /// Every message of a conversation, soft-deleted ones included.
    pub fn all_messages(&self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>> {
        let tables = self.lock()?;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|message| message.conversation_id == *conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.creation_order(b));
        Ok(messages)
    }
}

fn active_conversation<'a>(
    tables: &'a MemoryTables,
    conversation_id: &ConversationId,
) -> TreeResult<&'a Conversation> {
    tables
        .conversations
        .get(conversation_id)
        .filter(|conversation| !conversation.is_deleted)
        .ok_or(TreeError::ConversationNotFound(*conversation_id))
}

impl ConversationStore for MemoryStore {
    fn create_conversation(&self, draft: NewConversation) -> TreeResult<Conversation> {
        let conversation = Conversation {
            id: ConversationId::new(),
            user_id: draft.user_id,
            title: draft.title,
            model: draft.model,
            language: draft.language,
            started_at: Utc::now(),
            is_deleted: false,
        };
        self.lock()?
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    fn get_conversation(&self, conversation_id: &ConversationId) -> TreeResult<Conversation> {
        let tables = self.lock()?;
        active_conversation(&tables, conversation_id).cloned()
    }

    fn list_conversations(&self, user_id: &UserId) -> TreeResult<Vec<Conversation>> {
        let tables = self.lock()?;
        let mut conversations: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|conversation| conversation.user_id == *user_id && !conversation.is_deleted)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(conversations)
    }

    fn rename_conversation(&self, conversation_id: &ConversationId, title: &str) -> TreeResult<()> {
        let normalized = title.trim();
        if normalized.is_empty() {
            return Err(TreeError::InvalidInput(
                "Conversation title cannot be empty".to_string(),
            ));
        }
        let mut tables = self.lock()?;
        let conversation = tables
            .conversations
            .get_mut(conversation_id)
            .filter(|conversation| !conversation.is_deleted)
            .ok_or(TreeError::ConversationNotFound(*conversation_id))?;
        conversation.title = Some(normalized.to_string());
        Ok(())
    }

    fn soft_delete_conversation(&self, conversation_id: &ConversationId) -> TreeResult<()> {
        let mut tables = self.lock()?;
        let conversation = tables
            .conversations
            .get_mut(conversation_id)
            .filter(|conversation| !conversation.is_deleted)
            .ok_or(TreeError::ConversationNotFound(*conversation_id))?;
        conversation.is_deleted = true;
        Ok(())
    }

    fn create_message(&self, draft: NewMessage) -> TreeResult<Message> {
        let mut tables = self.lock()?;
        active_conversation(&tables, &draft.conversation_id)?;

        if let Some(parent_id) = draft.parent_id {
            let parent = tables
                .messages
                .get(&parent_id)
                .ok_or(TreeError::MessageNotFound(parent_id))?;
            if parent.conversation_id != draft.conversation_id {
                return Err(TreeError::ParentMismatch {
                    parent: parent_id,
                    conversation: draft.conversation_id,
                });
            }
        }

        let message = draft.into_message();
        let staged = {
            let mut index = StagedClosure {
                committed: &tables.closure,
                staged: Vec::new(),
            };
            closure::on_message_created(&mut index, message.id, message.parent_id)?;
            index.staged
        };

        tables.closure.extend(staged);
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn list_messages(&self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>> {
        let tables = self.lock()?;
        active_conversation(&tables, conversation_id)?;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|message| message.conversation_id == *conversation_id && !message.is_deleted)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.creation_order(b));
        Ok(messages)
    }

    fn soft_delete_message(&self, message_id: &MessageId) -> TreeResult<()> {
        let mut tables = self.lock()?;
        let message = tables
            .messages
            .get_mut(message_id)
            .filter(|message| !message.is_deleted)
            .ok_or(TreeError::MessageNotFound(*message_id))?;
        message.is_deleted = true;
        Ok(())
    }

    fn list_ancestor_closure(&self, descendant_id: &MessageId) -> TreeResult<Vec<AncestorLink>> {
        let tables = self.lock()?;
        let mut links: Vec<AncestorLink> = tables
            .closure
            .iter()
            .filter(|edge| edge.descendant_id == *descendant_id)
            .map(|edge| AncestorLink {
                ancestor_id: edge.ancestor_id,
                depth: edge.depth,
            })
            .collect();
        links.sort_by_key(|link| link.depth);
        Ok(links)
    }

    fn list_descendant_closure(&self, ancestor_id: &MessageId) -> TreeResult<Vec<DescendantLink>> {
        let tables = self.lock()?;
        let mut links: Vec<DescendantLink> = tables
            .closure
            .iter()
            .filter(|edge| edge.ancestor_id == *ancestor_id)
            .map(|edge| DescendantLink {
                descendant_id: edge.descendant_id,
                depth: edge.depth,
            })
            .collect();
        links.sort_by_key(|link| link.depth);
        Ok(links)
    }
}
