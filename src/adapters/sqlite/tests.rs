use super::SqliteStore;
use crate::core::closure;
use crate::core::error::TreeError;
use crate::core::model::{ConversationId, MessageId, NewConversation, NewMessage, Role, UserId};
use crate::core::ports::store::ConversationStore;
use rusqlite::Connection;
use std::path::PathBuf;

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("forkchat-store-{}.db", uuid::Uuid::new_v4()))
}

fn draft(user_id: UserId) -> NewConversation {
    NewConversation {
        user_id,
        title: Some("Closure tables".to_string()),
        model: "openai/gpt-4o".to_string(),
        language: "ja".to_string(),
    }
}

fn store_with_conversation() -> (SqliteStore, ConversationId) {
    let store = SqliteStore::open_in_memory().expect("open in-memory store");
    let conversation = store
        .create_conversation(draft(UserId::new()))
        .expect("create conversation");
    (store, conversation.id)
}

#[test]
fn message_insert_writes_self_and_inherited_closure_rows() {
    let (store, conversation_id) = store_with_conversation();
    let root = store
        .create_message(NewMessage::user(conversation_id, None, "root"))
        .expect("root");
    let reply = store
        .create_message(NewMessage::assistant(conversation_id, root.id, "reply"))
        .expect("reply");
    let fork = store
        .create_message(NewMessage::user(conversation_id, Some(root.id), "fork"))
        .expect("fork");

    let ancestors = store.list_ancestor_closure(&reply.id).expect("ancestors");
    assert_eq!(ancestors.len(), 2);
    assert_eq!(ancestors[0].ancestor_id, reply.id);
    assert_eq!(ancestors[0].depth, 0);
    assert_eq!(ancestors[1].ancestor_id, root.id);
    assert_eq!(ancestors[1].depth, 1);

    let descendants = store.list_descendant_closure(&root.id).expect("descendants");
    let ids: Vec<MessageId> = descendants.iter().map(|link| link.descendant_id).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&fork.id));

    let messages = store.all_messages(&conversation_id).expect("messages");
    let edges = store.closure_edges(&conversation_id).expect("edges");
    closure::verify_closure(&messages, &edges).expect("closure consistent");
}

#[test]
fn messages_round_trip_in_creation_order() {
    let (store, conversation_id) = store_with_conversation();
    let root = store
        .create_message(NewMessage::user(conversation_id, None, "こんにちは"))
        .expect("root");
    let reply = store
        .create_message(NewMessage::assistant(conversation_id, root.id, "hello"))
        .expect("reply");

    let messages = store.list_messages(&conversation_id).expect("list");
    assert_eq!(messages, vec![root, reply]);
    assert_eq!(messages[1].role, Role::Assistant);
}

#[test]
fn failed_closure_write_rolls_back_the_message() {
    let (store, conversation_id) = store_with_conversation();
    let root = store
        .create_message(NewMessage::user(conversation_id, None, "root"))
        .expect("root");

    store
        .conn
        .lock()
        .expect("lock")
        .execute_batch(
            "
            CREATE TRIGGER refuse_inherited_rows
            BEFORE INSERT ON message_closure
            WHEN NEW.depth > 0
            BEGIN
                SELECT RAISE(ABORT, 'closure write refused');
            END;
            ",
        )
        .expect("install trigger");

    let err = store
        .create_message(NewMessage::assistant(conversation_id, root.id, "reply"))
        .unwrap_err();
    assert!(matches!(err, TreeError::Storage(_)));
    assert!(err.is_transient());

    let messages = store.all_messages(&conversation_id).expect("messages");
    assert_eq!(messages.len(), 1);
    let edges = store.closure_edges(&conversation_id).expect("edges");
    assert_eq!(edges.len(), 1);
}

#[test]
fn unknown_parent_and_foreign_parent_are_rejected() {
    let (store, conversation_id) = store_with_conversation();
    let other = store
        .create_conversation(draft(UserId::new()))
        .expect("other conversation");
    let foreign = store
        .create_message(NewMessage::user(other.id, None, "elsewhere"))
        .expect("foreign");

    let err = store
        .create_message(NewMessage::user(conversation_id, Some(MessageId::new()), "lost"))
        .unwrap_err();
    assert!(matches!(err, TreeError::MessageNotFound(_)));

    let err = store
        .create_message(NewMessage::user(conversation_id, Some(foreign.id), "crossed"))
        .unwrap_err();
    assert!(matches!(err, TreeError::ParentMismatch { .. }));

    assert!(store.list_messages(&conversation_id).expect("list").is_empty());
}

#[test]
fn conversations_list_rename_and_soft_delete() {
    let store = SqliteStore::open_in_memory().expect("open");
    let user_id = UserId::new();
    let first = store.create_conversation(draft(user_id)).expect("first");
    let second = store.create_conversation(draft(user_id)).expect("second");
    store
        .create_conversation(draft(UserId::new()))
        .expect("someone else's");

    let listed = store.list_conversations(&user_id).expect("list");
    assert_eq!(listed.len(), 2);
    assert!(listed[0].started_at >= listed[1].started_at);

    store
        .rename_conversation(&first.id, "  Renamed  ")
        .expect("rename");
    let renamed = store.get_conversation(&first.id).expect("get");
    assert_eq!(renamed.title.as_deref(), Some("Renamed"));
    assert!(matches!(
        store.rename_conversation(&first.id, "   "),
        Err(TreeError::InvalidInput(_))
    ));

    store.soft_delete_conversation(&second.id).expect("delete");
    let listed = store.list_conversations(&user_id).expect("list");
    assert_eq!(listed.len(), 1);
    assert!(store.get_conversation(&second.id).unwrap_err().is_not_found());
    assert!(store.soft_delete_conversation(&second.id).is_err());
}

#[test]
fn soft_deleted_messages_are_hidden_but_keep_closure_rows() {
    let (store, conversation_id) = store_with_conversation();
    let root = store
        .create_message(NewMessage::user(conversation_id, None, "root"))
        .expect("root");
    let reply = store
        .create_message(NewMessage::assistant(conversation_id, root.id, "reply"))
        .expect("reply");

    store.soft_delete_message(&reply.id).expect("delete");
    let visible = store.list_messages(&conversation_id).expect("list");
    assert_eq!(visible, vec![root.clone()]);
    assert_eq!(store.all_messages(&conversation_id).expect("all").len(), 2);
    assert_eq!(store.closure_edges(&conversation_id).expect("edges").len(), 3);
    assert!(matches!(
        store.soft_delete_message(&reply.id),
        Err(TreeError::MessageNotFound(_))
    ));
}

#[test]
fn open_persists_across_reopen() {
    let db_path = temp_db_path();
    let conversation_id = {
        let store = SqliteStore::open(&db_path).expect("open file store");
        let conversation = store
            .create_conversation(draft(UserId::new()))
            .expect("create");
        store
            .create_message(NewMessage::user(conversation.id, None, "persisted"))
            .expect("message");
        conversation.id
    };

    let reopened = SqliteStore::open(&db_path).expect("reopen");
    let messages = reopened.list_messages(&conversation_id).expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "persisted");

    drop(reopened);
    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn open_migrates_legacy_schema_without_soft_delete_columns() {
    let db_path = temp_db_path();

    // Legacy schema without model/language/is_deleted columns.
    let conn = Connection::open(&db_path).expect("open temp sqlite");
    conn.execute_batch(
        "
        CREATE TABLE conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT,
            started_at TEXT NOT NULL
        );
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            parent_id TEXT,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        INSERT INTO conversations (id, user_id, title, started_at)
        VALUES (
            '6f1c1f5e-3c53-4a8e-9d0b-2f7f0c1a9a01',
            '0b6b7f7e-5b1d-4c43-8c41-4f5e2a0d8c11',
            '',
            '2024-05-01T10:00:00.000000000Z'
        );
        ",
    )
    .expect("create legacy schema");
    drop(conn);

    let store = SqliteStore::open(&db_path).expect("migrate legacy schema");
    {
        let conn = store.conn.lock().expect("lock");
        for (table, column) in [
            ("conversations", "model"),
            ("conversations", "language"),
            ("conversations", "is_deleted"),
            ("messages", "is_deleted"),
        ] {
            assert!(
                super::table_has_column(&conn, table, column).expect("inspect"),
                "{}.{} missing after migration",
                table,
                column
            );
        }
    }

    let conversation_id: ConversationId = "6f1c1f5e-3c53-4a8e-9d0b-2f7f0c1a9a01"
        .parse()
        .expect("id");
    let conversation = store.get_conversation(&conversation_id).expect("legacy row");
    assert_eq!(conversation.title, None);
    assert_eq!(conversation.language, "ja");
    assert!(!conversation.is_deleted);

    drop(store);
    let _ = std::fs::remove_file(&db_path);
}
