use super::*;
use crate::adapters::memory::MemoryStore;
use crate::core::model::{ChatTurn, Role};
use crate::core::ports::responder::DynError;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replays queued outcomes, then echoes the last turn.
#[derive(Default)]
struct ScriptedResponder {
    script: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedResponder {
    fn with_script(outcomes: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn last_context(&self) -> Vec<ChatTurn> {
        self.seen
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl ResponderPort for ScriptedResponder {
    fn respond<'a>(&'a self, turns: &'a [ChatTurn]) -> BoxFuture<'a, Result<String, DynError>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(turns.to_vec());
            let scripted = self.script.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(text)) => Ok(text),
                Some(Err(reason)) => Err(reason.into()),
                None => {
                    let last = turns.last().map(|turn| turn.content.as_str()).unwrap_or("");
                    Ok(format!("reply to {}", last))
                }
            }
        })
    }
}

#[derive(Default)]
struct RecordingEmitter {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingEmitter {
    fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EmitterPort for RecordingEmitter {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    responder: Arc<ScriptedResponder>,
    emitter: Arc<RecordingEmitter>,
    session: ChatSession,
}

fn options() -> SessionOptions {
    SessionOptions {
        user_id: UserId::new(),
        model: "test-model".to_string(),
        language: "en".to_string(),
        title_max_chars: 20,
    }
}

fn harness_with(responder: ScriptedResponder) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let responder = Arc::new(responder);
    let emitter = Arc::new(RecordingEmitter::default());
    let session = ChatSession::new(store.clone(), responder.clone(), emitter.clone(), options());
    Harness {
        store,
        responder,
        emitter,
        session,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedResponder::default())
}

async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

/// Sends `count` turns and returns the resulting path.
async fn chat(harness: &mut Harness, count: usize) -> Vec<MessageId> {
    for turn in 0..count {
        harness
            .session
            .send(&format!("question {}", turn))
            .await
            .expect("send");
        tick().await;
    }
    harness.session.active_path().ids().to_vec()
}

fn assistant_of(outcome: &TurnOutcome) -> &Message {
    match &outcome.reply {
        Reply::Persisted { message } => message,
        Reply::Failed { reason, .. } => panic!("expected a persisted reply, got {}", reason),
    }
}

#[tokio::test]
async fn first_send_creates_conversation_and_titles_it() {
    let mut h = harness();

    let outcome = h
        .session
        .send("  What   is a closure table used for?  ")
        .await
        .expect("send");

    assert!(outcome.created_conversation);
    assert_eq!(outcome.path.len(), 2);
    assert!(outcome.user_message.is_root());
    let assistant = assistant_of(&outcome);
    assert_eq!(assistant.parent_id, Some(outcome.user_message.id));
    assert_eq!(assistant.role, Role::Assistant);

    let conversation = h
        .store
        .get_conversation(&outcome.conversation_id)
        .expect("conversation");
    assert_eq!(conversation.title.as_deref(), Some("What is a closure..."));
    assert_eq!(conversation.model, "test-model");

    assert_eq!(
        h.emitter.take(),
        vec![
            SessionEvent::ConversationCreated {
                conversation_id: outcome.conversation_id
            },
            SessionEvent::ConversationUpdated {
                conversation_id: outcome.conversation_id
            },
        ]
    );
}

#[tokio::test]
async fn follow_up_send_extends_the_active_path() {
    let mut h = harness();
    let first = h.session.send("first").await.expect("first");
    let second = h.session.send("second").await.expect("second");

    assert!(!second.created_conversation);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(second.path.len(), 4);
    assert_eq!(second.user_message.parent_id, Some(assistant_of(&first).id));

    let context = h.responder.last_context();
    let contents: Vec<&str> = context.iter().map(|turn| turn.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "reply to first", "second"]);
}

#[tokio::test]
async fn fork_keeps_prefix_and_appends_new_turn() {
    let mut h = harness();
    let original = chat(&mut h, 3).await;
    assert_eq!(original.len(), 6);

    let fork_index = 1;
    let outcome = h
        .session
        .fork_from(&original[fork_index], "try another angle")
        .await
        .expect("fork");

    assert_eq!(outcome.path.len(), fork_index + 3);
    assert_eq!(&outcome.path.ids()[..=fork_index], &original[..=fork_index]);
    assert_eq!(outcome.user_message.parent_id, Some(original[fork_index]));
    assert_eq!(h.session.branches().len(), 1);
    assert!(h.session.branches().contains(&original[fork_index]));

    let all = h.store.all_messages(&outcome.conversation_id).expect("all");
    let edges = h.store.closure_edges().expect("edges");
    crate::core::closure::verify_closure(&all, &edges).expect("consistent");
}

#[tokio::test]
async fn fork_with_failed_reply_ends_on_user_message() {
    let mut h = harness_with(ScriptedResponder::with_script(vec![
        Ok("one".to_string()),
        Err("upstream timeout".to_string()),
    ]));
    let original = chat(&mut h, 1).await;

    let outcome = h
        .session
        .fork_from(&original[0], "edited question")
        .await
        .expect("fork");

    assert_eq!(outcome.path.len(), 2);
    assert_eq!(outcome.path.leaf(), Some(outcome.user_message.id));
    match outcome.reply {
        Reply::Failed { notice, reason } => {
            assert_eq!(notice, RESPONDER_FAILURE_NOTICE);
            assert!(reason.contains("upstream timeout"));
        }
        Reply::Persisted { .. } => panic!("expected failure"),
    }

    let stored = h.store.list_messages(&outcome.conversation_id).expect("list");
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn empty_reply_is_reported_as_failure() {
    let mut h = harness_with(ScriptedResponder::with_script(vec![Ok("   ".to_string())]));
    let outcome = h.session.send("hello").await.expect("send");

    assert!(matches!(outcome.reply, Reply::Failed { .. }));
    assert_eq!(outcome.path.len(), 1);
    let stored = h.store.list_messages(&outcome.conversation_id).expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
}

#[tokio::test]
async fn fork_rejects_parent_outside_active_path() {
    let mut h = harness();
    let original = chat(&mut h, 2).await;
    let fork = h
        .session
        .fork_from(&original[1], "branch")
        .await
        .expect("fork");
    h.emitter.take();

    // original[3] now sits on the abandoned branch.
    let err = h
        .session
        .fork_from(&original[3], "from the other side")
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::ParentNotInPath(id) if id == original[3]));

    let err = h
        .session
        .fork_from(&MessageId::new(), "nowhere")
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::ParentNotInPath(_)));

    assert_eq!(h.session.active_path(), &fork.path);
    assert!(h.emitter.take().is_empty());
}

#[tokio::test]
async fn empty_content_is_rejected_without_side_effects() {
    let mut h = harness();
    let err = h.session.send(" \n\t ").await.unwrap_err();

    assert!(matches!(err, TreeError::InvalidInput(_)));
    assert!(h.session.conversation_id().is_none());
    assert!(h.emitter.take().is_empty());
    assert!(h.responder.last_context().is_empty());
}

#[tokio::test]
async fn switch_to_branch_restores_an_earlier_path() {
    let mut h = harness();
    let original = chat(&mut h, 2).await;
    let conversation_id = h.session.conversation_id().expect("open");
    h.session
        .fork_from(&original[1], "alternative")
        .await
        .expect("fork");
    h.emitter.take();

    let messages = h.session.switch_to_branch(&original).expect("switch");

    assert_eq!(h.session.active_path().ids(), original.as_slice());
    let ids: Vec<MessageId> = messages.iter().map(|message| message.id).collect();
    assert_eq!(ids, original);
    assert_eq!(
        h.emitter.take(),
        vec![SessionEvent::BranchSwitched {
            conversation_id,
            leaf: original.last().copied(),
        }]
    );
}

#[tokio::test]
async fn switch_to_branch_rejects_broken_chains() {
    let mut h = harness();
    let original = chat(&mut h, 2).await;
    let before = h.session.active_path().clone();

    let skipping = vec![original[0], original[2]];
    let err = h.session.switch_to_branch(&skipping).unwrap_err();
    assert!(matches!(err, TreeError::InvalidPath(_)));

    let headless = vec![original[1], original[2]];
    let err = h.session.switch_to_branch(&headless).unwrap_err();
    assert!(matches!(err, TreeError::InvalidPath(_)));

    assert_eq!(h.session.active_path(), &before);
}

#[tokio::test]
async fn switch_to_message_walks_up_to_the_root() {
    let mut h = harness();
    let original = chat(&mut h, 3).await;

    h.session.switch_to_message(&original[2]).expect("switch");
    assert_eq!(h.session.active_path().ids(), &original[..3]);

    let err = h.session.switch_to_message(&MessageId::new()).unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn select_branch_follows_the_newest_descent() {
    let mut h = harness();
    let original = chat(&mut h, 2).await;
    h.session
        .fork_from(&original[1], "alternative")
        .await
        .expect("fork");

    let options = h.session.branch_options(&original[1]).expect("options");
    assert_eq!(options.len(), 2);
    assert!(!options[0].in_current_path);
    assert!(options[1].in_current_path);

    h.session
        .select_branch(&original[1], &original[2])
        .expect("select");
    assert_eq!(h.session.active_path().ids(), original.as_slice());
}

#[tokio::test]
async fn load_picks_the_most_recent_branch() {
    let mut h = harness();
    let original = chat(&mut h, 2).await;
    tick().await;
    let fork = h
        .session
        .fork_from(&original[1], "alternative")
        .await
        .expect("fork");
    let conversation_id = fork.conversation_id;

    h.session.reset();
    assert!(h.session.conversation_id().is_none());

    let messages = h.session.load(&conversation_id).expect("load");
    assert_eq!(h.session.active_path(), &fork.path);
    assert_eq!(messages.len(), fork.path.len());

    let err = h.session.load(&ConversationId::new()).unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn switching_without_open_conversation_fails() {
    let mut h = harness();
    let err = h.session.switch_to_branch(&[]).unwrap_err();
    assert!(matches!(err, TreeError::InvalidInput(_)));
}

#[tokio::test]
async fn layout_highlights_active_path() {
    let mut h = harness();
    let original = chat(&mut h, 1).await;
    h.session
        .fork_from(&original[0], "second take")
        .await
        .expect("fork");

    let layout = h.session.layout(
        &LayoutEngine::default(),
        DisplayMode::Excerpt,
        &ExpansionSet::new(),
    );
    assert_eq!(layout.nodes.len(), 4);
    let highlighted = layout.nodes.iter().filter(|node| node.in_path).count();
    assert_eq!(highlighted, 3);
    let on_path = layout.edges.iter().filter(|edge| edge.on_active_path).count();
    assert_eq!(on_path, 2);
}

#[test]
fn title_collapses_whitespace_and_truncates_by_chars() {
    assert_eq!(title_from_first_user_message("   ", 10), DEFAULT_TITLE);
    assert_eq!(title_from_first_user_message("short", 10), "short");
    assert_eq!(
        title_from_first_user_message("こんにちは世界、元気ですか", 8),
        "こんにちは..."
    );
}
