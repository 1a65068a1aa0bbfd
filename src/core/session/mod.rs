//! View state for one open conversation and the operations that move it.
//!
//! A [`ChatSession`] is owned by its caller and mutated only through `&mut
//! self`, so at most one send, fork or switch is in flight per session. Tree,
//! path and layout computations stay pure; this module is the only place that
//! writes to the store on behalf of the viewer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{TreeError, TreeResult};
use crate::core::layout::{DisplayMode, ExpansionSet, LayoutEngine, TreeLayout};
use crate::core::model::{
    Conversation, ConversationId, Message, MessageId, NewConversation, NewMessage, UserId,
};
use crate::core::path::{self, ActivePath, BranchMap, BranchOption};
use crate::core::ports::emitter::{EmitterPort, SessionEvent};
use crate::core::ports::responder::ResponderPort;
use crate::core::ports::store::ConversationStore;
use crate::core::tree::MessageTree;

pub const RESPONDER_FAILURE_NOTICE: &str = "An error occurred. Please try again.";
const DEFAULT_TITLE: &str = "New conversation";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: UserId,
    pub model: String,
    pub language: String,
    pub title_max_chars: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    pub conversation_id: Option<ConversationId>,
    pub tree: MessageTree,
    pub active_path: ActivePath,
    pub branches: BranchMap,
}

impl ConversationView {
    fn from_messages(conversation_id: ConversationId, messages: Vec<Message>) -> Self {
        let tree = MessageTree::build(messages);
        let active_path = path::default_path(&tree);
        let branches = path::branch_points(&tree);
        Self {
            conversation_id: Some(conversation_id),
            tree,
            active_path,
            branches,
        }
    }

    fn absorb(&mut self, message: Message) {
        let messages: Vec<Message> = self
            .tree
            .messages()
            .cloned()
            .chain(std::iter::once(message))
            .collect();
        self.tree = MessageTree::build(messages);
        self.branches = path::branch_points(&self.tree);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Persisted { message: Message },
    /// The responder failed; nothing was stored for the assistant turn.
    Failed { notice: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub created_conversation: bool,
    pub user_message: Message,
    pub reply: Reply,
    pub path: ActivePath,
}

pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    responder: Arc<dyn ResponderPort>,
    emitter: Arc<dyn EmitterPort>,
    options: SessionOptions,
    view: ConversationView,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        responder: Arc<dyn ResponderPort>,
        emitter: Arc<dyn EmitterPort>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            responder,
            emitter,
            options,
            view: ConversationView::default(),
        }
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.view.conversation_id
    }

    pub fn active_path(&self) -> &ActivePath {
        &self.view.active_path
    }

    pub fn branches(&self) -> &BranchMap {
        &self.view.branches
    }

    /// Drops the current view so the next send starts a new conversation.
    pub fn reset(&mut self) {
        self.view = ConversationView::default();
    }

    /// Fetches the conversation and selects its default path.
    pub fn load(&mut self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>> {
        self.store.get_conversation(conversation_id)?;
        let messages = self.store.list_messages(conversation_id)?;
        self.view = ConversationView::from_messages(*conversation_id, messages);
        Ok(self.messages_on_path())
    }

    pub fn messages_on_path(&self) -> Vec<Message> {
        path::path_messages(&self.view.tree, &self.view.active_path)
    }

    pub fn branch_options(&self, branch_point: &MessageId) -> TreeResult<Vec<BranchOption>> {
        path::branch_options(&self.view.tree, branch_point, &self.view.active_path)
    }

    pub fn layout(
        &self,
        engine: &LayoutEngine,
        mode: DisplayMode,
        expansion: &ExpansionSet,
    ) -> TreeLayout {
        let mut layout = engine.layout(&self.view.tree, mode, expansion);
        layout.highlight(&self.view.active_path);
        layout
    }

    /// Replaces the active path wholesale after re-reading the conversation.
    pub fn switch_to_branch(&mut self, new_path: &[MessageId]) -> TreeResult<Vec<Message>> {
        let conversation_id = self.require_conversation()?;
        self.refresh(&conversation_id)?;
        let validated = path::validate_path(&self.view.tree, new_path)?;
        self.commit_path(conversation_id, validated);
        Ok(self.messages_on_path())
    }

    /// Switches to the root path ending at `target`.
    pub fn switch_to_message(&mut self, target: &MessageId) -> TreeResult<Vec<Message>> {
        let conversation_id = self.require_conversation()?;
        self.refresh(&conversation_id)?;
        let selected = path::path_to(target, &self.view.tree)?;
        self.commit_path(conversation_id, selected);
        Ok(self.messages_on_path())
    }

    /// Picks `child` at `branch_point` and follows its newest descent.
    pub fn select_branch(
        &mut self,
        branch_point: &MessageId,
        child: &MessageId,
    ) -> TreeResult<Vec<Message>> {
        let selected =
            path::branch_path(&self.view.tree, &self.view.active_path, branch_point, child)?;
        self.switch_to_branch(selected.ids())
    }

    /// Appends a user turn at the tail of the active path, creating the
    /// conversation first when none is open.
    pub async fn send(&mut self, content: &str) -> TreeResult<TurnOutcome> {
        let content = normalize_content(content)?;

        let (conversation_id, created_conversation) = match self.view.conversation_id {
            Some(conversation_id) => (conversation_id, false),
            None => (self.start_conversation(&content)?.id, true),
        };

        let base = self.view.active_path.clone();
        let parent_id = base.leaf();
        let mut outcome = self.exchange(conversation_id, base, parent_id, content).await?;
        outcome.created_conversation = created_conversation;
        Ok(outcome)
    }

    /// Starts a new branch below `parent_id`, which must be on the active path.
    pub async fn fork_from(&mut self, parent_id: &MessageId, content: &str) -> TreeResult<TurnOutcome> {
        let content = normalize_content(content)?;
        let conversation_id = self.require_conversation()?;
        let index = self
            .view
            .active_path
            .position_of(parent_id)
            .ok_or(TreeError::ParentNotInPath(*parent_id))?;

        let mut base = self.view.active_path.clone();
        base.truncate_through(index);
        log::debug!(
            "forking conversation {} at depth {} below {}",
            conversation_id,
            index,
            parent_id
        );
        self.exchange(conversation_id, base, Some(*parent_id), content)
            .await
    }

    async fn exchange(
        &mut self,
        conversation_id: ConversationId,
        base: ActivePath,
        parent_id: Option<MessageId>,
        content: String,
    ) -> TreeResult<TurnOutcome> {
        let user_message = self
            .store
            .create_message(NewMessage::user(conversation_id, parent_id, content))?;

        let mut active_path = base;
        active_path.push(user_message.id);
        self.view.absorb(user_message.clone());
        self.view.active_path = active_path;

        let context: Vec<_> = self
            .messages_on_path()
            .iter()
            .map(Message::as_turn)
            .collect();

        let responder = Arc::clone(&self.responder);
        let response = responder.respond(&context).await;
        let reply = match response {
            Ok(text) if !text.trim().is_empty() => {
                let assistant = self.store.create_message(NewMessage::assistant(
                    conversation_id,
                    user_message.id,
                    text,
                ))?;
                self.view.absorb(assistant.clone());
                self.view.active_path.push(assistant.id);
                Reply::Persisted { message: assistant }
            }
            Ok(_) => {
                log::warn!("assistant returned an empty reply for {}", user_message.id);
                failed_reply("empty response".to_string())
            }
            Err(error) => {
                log::warn!("assistant response failed for {}: {}", user_message.id, error);
                failed_reply(error.to_string())
            }
        };

        self.emitter
            .emit(SessionEvent::ConversationUpdated { conversation_id });

        Ok(TurnOutcome {
            conversation_id,
            created_conversation: false,
            user_message,
            reply,
            path: self.view.active_path.clone(),
        })
    }

    fn start_conversation(&mut self, first_message: &str) -> TreeResult<Conversation> {
        let conversation = self.store.create_conversation(NewConversation {
            user_id: self.options.user_id,
            title: Some(title_from_first_user_message(
                first_message,
                self.options.title_max_chars,
            )),
            model: self.options.model.clone(),
            language: self.options.language.clone(),
        })?;
        log::info!("conversation {} created", conversation.id);

        self.view = ConversationView {
            conversation_id: Some(conversation.id),
            ..ConversationView::default()
        };
        self.emitter.emit(SessionEvent::ConversationCreated {
            conversation_id: conversation.id,
        });
        Ok(conversation)
    }

    fn refresh(&mut self, conversation_id: &ConversationId) -> TreeResult<()> {
        let messages = self.store.list_messages(conversation_id)?;
        self.view.tree = MessageTree::build(messages);
        self.view.branches = path::branch_points(&self.view.tree);
        Ok(())
    }

    fn commit_path(&mut self, conversation_id: ConversationId, selected: ActivePath) {
        let leaf = selected.leaf();
        self.view.active_path = selected;
        self.emitter.emit(SessionEvent::BranchSwitched {
            conversation_id,
            leaf,
        });
    }

    fn require_conversation(&self) -> TreeResult<ConversationId> {
        self.view
            .conversation_id
            .ok_or_else(|| TreeError::InvalidInput("No conversation is open".to_string()))
    }
}

fn failed_reply(reason: String) -> Reply {
    Reply::Failed {
        notice: RESPONDER_FAILURE_NOTICE.to_string(),
        reason,
    }
}

fn normalize_content(content: &str) -> TreeResult<String> {
    if content.trim().is_empty() {
        return Err(TreeError::InvalidInput(
            "Message content cannot be empty".to_string(),
        ));
    }
    Ok(content.to_string())
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= max_chars {
        return input.to_string();
    }
    if max_chars <= 3 {
        return "...".to_string();
    }

    let head: String = chars.into_iter().take(max_chars - 3).collect();
    format!("{}...", head)
}

pub fn title_from_first_user_message(message: &str, max_chars: usize) -> String {
    let normalized = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        truncate_chars(&normalized, max_chars)
    }
}

#[cfg(test)]
mod tests;
