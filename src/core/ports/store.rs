use crate::core::error::TreeResult;
use crate::core::model::{
    AncestorLink, Conversation, ConversationId, DescendantLink, Message, MessageId,
    NewConversation, NewMessage, UserId,
};

/// Persistence contract for conversations, messages and the closure index.
///
/// `create_message` must insert the message and its closure rows atomically:
/// either both are visible afterwards or neither is.
pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, draft: NewConversation) -> TreeResult<Conversation>;

    /// Fails with `ConversationNotFound` for unknown or soft-deleted ids.
    fn get_conversation(&self, conversation_id: &ConversationId) -> TreeResult<Conversation>;

    /// Non-deleted conversations of `user_id`, newest first.
    fn list_conversations(&self, user_id: &UserId) -> TreeResult<Vec<Conversation>>;

    fn rename_conversation(&self, conversation_id: &ConversationId, title: &str) -> TreeResult<()>;

    fn soft_delete_conversation(&self, conversation_id: &ConversationId) -> TreeResult<()>;

    fn create_message(&self, draft: NewMessage) -> TreeResult<Message>;

    /// Non-deleted messages of a conversation in creation order.
    fn list_messages(&self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>>;

    fn soft_delete_message(&self, message_id: &MessageId) -> TreeResult<()>;

    fn list_ancestor_closure(&self, descendant_id: &MessageId) -> TreeResult<Vec<AncestorLink>>;

    fn list_descendant_closure(&self, ancestor_id: &MessageId) -> TreeResult<Vec<DescendantLink>>;
}
