use crate::core::model::{Conversation, NewConversation};
use crate::core::session::TurnOutcome;

use super::shared::{parse_conversation_id, parse_message_id, AppContext, PathView};

pub fn create_conversation(ctx: &AppContext, title: Option<String>) -> Result<Conversation, String> {
    let title = title
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    ctx.store
        .create_conversation(NewConversation {
            user_id: ctx.settings.user_id(),
            title,
            model: ctx.settings.model.clone(),
            language: ctx.settings.language.clone(),
        })
        .map_err(|e| e.to_string())
}

pub fn list_conversations(ctx: &AppContext) -> Result<Vec<Conversation>, String> {
    ctx.store
        .list_conversations(&ctx.settings.user_id())
        .map_err(|e| e.to_string())
}

pub fn rename_conversation(ctx: &AppContext, conversation_id: &str, title: &str) -> Result<(), String> {
    let parsed_id = parse_conversation_id(conversation_id)?;
    let normalized_title = title.trim();
    if normalized_title.is_empty() {
        return Err("title cannot be empty".to_string());
    }
    ctx.store
        .rename_conversation(&parsed_id, normalized_title)
        .map_err(|e| e.to_string())
}

pub fn delete_conversation(ctx: &AppContext, conversation_id: &str) -> Result<(), String> {
    let parsed_id = parse_conversation_id(conversation_id)?;
    ctx.store
        .soft_delete_conversation(&parsed_id)
        .map_err(|e| e.to_string())
}

pub fn delete_message(ctx: &AppContext, message_id: &str) -> Result<(), String> {
    let parsed_id = parse_message_id(message_id)?;
    ctx.store
        .soft_delete_message(&parsed_id)
        .map_err(|e| e.to_string())
}

/// Messages on the default path, or on the path ending at `leaf`.
pub fn get_conversation_messages(
    ctx: &AppContext,
    conversation_id: &str,
    leaf: Option<&str>,
) -> Result<PathView, String> {
    let session = ctx.open_session(conversation_id, leaf)?;
    PathView::from_session(&session)
}

/// Sends at the tail of the active path; without `conversation_id` a new
/// conversation is started.
pub async fn send_message(
    ctx: &AppContext,
    conversation_id: Option<&str>,
    leaf: Option<&str>,
    content: &str,
) -> Result<TurnOutcome, String> {
    let mut session = match conversation_id {
        Some(conversation_id) => ctx.open_session(conversation_id, leaf)?,
        None => ctx.session(),
    };
    session.send(content).await.map_err(|e| e.to_string())
}

/// Starts a sibling branch below `parent_id`. The parent must lie on the
/// active path, which is the default path unless `leaf` selects another.
pub async fn fork_message(
    ctx: &AppContext,
    conversation_id: &str,
    parent_id: &str,
    leaf: Option<&str>,
    content: &str,
) -> Result<TurnOutcome, String> {
    let parent_id = parse_message_id(parent_id)?;
    let mut session = ctx.open_session(conversation_id, leaf)?;
    session
        .fork_from(&parent_id, content)
        .await
        .map_err(|e| e.to_string())
}
