use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::config::Settings;
use crate::adapters::responder::OpenRouterResponder;
use crate::adapters::sqlite::SqliteStore;
use crate::core::layout::LayoutEngine;
use crate::core::model::{ConversationId, Message, MessageId};
use crate::core::path::ActivePath;
use crate::core::ports::emitter::EmitterPort;
use crate::core::ports::responder::ResponderPort;
use crate::core::ports::store::ConversationStore;
use crate::core::session::{ChatSession, SessionOptions};

/// Collaborators shared by every command invocation.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn ConversationStore>,
    pub responder: Arc<dyn ResponderPort>,
    pub emitter: Arc<dyn EmitterPort>,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        store: Arc<dyn ConversationStore>,
        responder: Arc<dyn ResponderPort>,
        emitter: Arc<dyn EmitterPort>,
    ) -> Self {
        Self {
            settings,
            store,
            responder,
            emitter,
        }
    }

    /// Opens the SQLite database and the OpenRouter responder named by `settings`.
    pub fn from_settings(settings: Settings, emitter: Arc<dyn EmitterPort>) -> Result<Self, String> {
        let store = SqliteStore::open(&settings.db_path()).map_err(|e| e.to_string())?;
        let responder = OpenRouterResponder::new(
            settings.api_base_url.clone(),
            settings.api_key(),
            settings.model.clone(),
            settings.system_prompt.clone(),
        );
        Ok(Self::new(
            settings,
            Arc::new(store),
            Arc::new(responder),
            emitter,
        ))
    }

    pub fn session(&self) -> ChatSession {
        ChatSession::new(
            self.store.clone(),
            self.responder.clone(),
            self.emitter.clone(),
            SessionOptions {
                user_id: self.settings.user_id(),
                model: self.settings.model.clone(),
                language: self.settings.language.clone(),
                title_max_chars: self.settings.title_max_chars,
            },
        )
    }

    /// Loads `conversation_id` and, when `leaf` is given, moves the active path
    /// to end there instead of at the default leaf.
    pub fn open_session(&self, conversation_id: &str, leaf: Option<&str>) -> Result<ChatSession, String> {
        let conversation_id = parse_conversation_id(conversation_id)?;
        let mut session = self.session();
        session.load(&conversation_id).map_err(|e| e.to_string())?;
        if let Some(leaf) = leaf {
            let leaf = parse_message_id(leaf)?;
            session.switch_to_message(&leaf).map_err(|e| e.to_string())?;
        }
        Ok(session)
    }

    pub fn layout_engine(&self) -> LayoutEngine {
        LayoutEngine::new(self.settings.layout.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathView {
    pub conversation_id: ConversationId,
    pub path: ActivePath,
    pub messages: Vec<Message>,
    pub branch_points: Vec<MessageId>,
}

impl PathView {
    pub fn from_session(session: &ChatSession) -> Result<Self, String> {
        let conversation_id = session
            .conversation_id()
            .ok_or_else(|| "No conversation is open".to_string())?;
        Ok(Self {
            conversation_id,
            path: session.active_path().clone(),
            messages: session.messages_on_path(),
            branch_points: session
                .branches()
                .iter()
                .map(|point| point.message_id)
                .filter(|id| session.active_path().contains(id))
                .collect(),
        })
    }
}

pub fn parse_conversation_id(conversation_id: &str) -> Result<ConversationId, String> {
    conversation_id
        .trim()
        .parse::<ConversationId>()
        .map_err(|_| format!("Invalid conversation id: {conversation_id}"))
}

pub fn parse_message_id(message_id: &str) -> Result<MessageId, String> {
    message_id
        .trim()
        .parse::<MessageId>()
        .map_err(|_| format!("Invalid message id: {message_id}"))
}

pub fn parse_message_ids(message_ids: &[String]) -> Result<Vec<MessageId>, String> {
    message_ids.iter().map(|id| parse_message_id(id)).collect()
}
