use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::core::closure::{self, ClosureIndex};
use crate::core::error::{TreeError, TreeResult};
use crate::core::model::{
    AncestorLink, ClosureEdge, Conversation, ConversationId, DescendantLink, Message, MessageId,
    NewConversation, NewMessage, Role, UserId,
};
use crate::core::ports::store::ConversationStore;

impl From<rusqlite::Error> for TreeError {
    fn from(error: rusqlite::Error) -> Self {
        TreeError::Storage(error.to_string())
    }
}

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT,
        model TEXT NOT NULL DEFAULT '',
        language TEXT NOT NULL DEFAULT 'ja',
        started_at TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        parent_id TEXT,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id),
        FOREIGN KEY (parent_id) REFERENCES messages(id)
    );

    CREATE TABLE IF NOT EXISTS message_closure (
        ancestor_id TEXT NOT NULL,
        descendant_id TEXT NOT NULL,
        depth INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id),
        FOREIGN KEY (ancestor_id) REFERENCES messages(id),
        FOREIGN KEY (descendant_id) REFERENCES messages(id)
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);
    CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id);
    CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
    CREATE INDEX IF NOT EXISTS idx_closure_descendant ON message_closure(descendant_id);
";

/// SQLite-backed conversation store. One connection guarded by a mutex; every
/// message insert runs in its own transaction together with its closure rows.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> TreeResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TreeError::Storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        log::debug!("opened conversation database at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> TreeResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> TreeResult<Self> {
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> TreeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TreeError::Storage("database connection lock poisoned".to_string()))
    }

    /// Closure rows whose descendant belongs to `conversation_id`.
    pub fn closure_edges(&self, conversation_id: &ConversationId) -> TreeResult<Vec<ClosureEdge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.ancestor_id, c.descendant_id, c.depth
             FROM message_closure c
             JOIN messages m ON m.id = c.descendant_id
             WHERE m.conversation_id = ?1",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            Ok(ClosureEdge {
                ancestor_id: MessageId::from_uuid(uuid_column(row, 0)?),
                descendant_id: MessageId::from_uuid(uuid_column(row, 1)?),
                depth: row.get(2)?,
            })
        })?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    /// Every message of a conversation, soft-deleted ones included.
    pub fn all_messages(&self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>> {
        let conn = self.lock()?;
        select_messages(&conn, conversation_id, true)
    }
}

/// Closure writes scoped to an open transaction.
struct TransactionClosure<'a> {
    conn: &'a Connection,
}

impl ClosureIndex for TransactionClosure<'_> {
    fn ancestors_of(&self, descendant: &MessageId) -> TreeResult<Vec<AncestorLink>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ancestor_id, depth FROM message_closure WHERE descendant_id = ?1")?;
        let rows = stmt.query_map(params![descendant.to_string()], |row| {
            Ok(AncestorLink {
                ancestor_id: MessageId::from_uuid(uuid_column(row, 0)?),
                depth: row.get(1)?,
            })
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    fn insert_edge(&mut self, edge: ClosureEdge) -> TreeResult<()> {
        self.conn.execute(
            "INSERT INTO message_closure (ancestor_id, descendant_id, depth) VALUES (?1, ?2, ?3)",
            params![
                edge.ancestor_id.to_string(),
                edge.descendant_id.to_string(),
                edge.depth
            ],
        )?;
        Ok(())
    }
}

impl ConversationStore for SqliteStore {
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
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversations (id, user_id, title, model, language, started_at, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                conversation.id.to_string(),
                conversation.user_id.to_string(),
                conversation.title,
                conversation.model,
                conversation.language,
                format_timestamp(&conversation.started_at),
            ],
        )?;
        Ok(conversation)
    }

    fn get_conversation(&self, conversation_id: &ConversationId) -> TreeResult<Conversation> {
        let conn = self.lock()?;
        fetch_conversation(&conn, conversation_id)
    }

    fn list_conversations(&self, user_id: &UserId) -> TreeResult<Vec<Conversation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, model, language, started_at, is_deleted
             FROM conversations
             WHERE user_id = ?1 AND is_deleted = 0
             ORDER BY started_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], conversation_from_row)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    fn rename_conversation(&self, conversation_id: &ConversationId, title: &str) -> TreeResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TreeError::InvalidInput(
                "Conversation title cannot be empty".to_string(),
            ));
        }
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1 AND is_deleted = 0",
            params![conversation_id.to_string(), title],
        )?;
        if updated == 0 {
            return Err(TreeError::ConversationNotFound(*conversation_id));
        }
        Ok(())
    }

    fn soft_delete_conversation(&self, conversation_id: &ConversationId) -> TreeResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE conversations SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            params![conversation_id.to_string()],
        )?;
        if updated == 0 {
            return Err(TreeError::ConversationNotFound(*conversation_id));
        }
        Ok(())
    }

    fn create_message(&self, draft: NewMessage) -> TreeResult<Message> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        fetch_conversation(&tx, &draft.conversation_id)?;

        if let Some(parent_id) = draft.parent_id {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    params![parent_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match owner {
                None => return Err(TreeError::MessageNotFound(parent_id)),
                Some(owner) if owner != draft.conversation_id.to_string() => {
                    return Err(TreeError::ParentMismatch {
                        parent: parent_id,
                        conversation: draft.conversation_id,
                    });
                }
                Some(_) => {}
            }
        }

        let message = draft.into_message();
        tx.execute(
            "INSERT INTO messages (id, conversation_id, parent_id, role, content, created_at, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.parent_id.map(|id| id.to_string()),
                message.role.as_str(),
                message.content,
                format_timestamp(&message.created_at),
            ],
        )?;

        let mut index = TransactionClosure { conn: &tx };
        closure::on_message_created(&mut index, message.id, message.parent_id)?;
        tx.commit()?;
        Ok(message)
    }

    fn list_messages(&self, conversation_id: &ConversationId) -> TreeResult<Vec<Message>> {
        let conn = self.lock()?;
        fetch_conversation(&conn, conversation_id)?;
        select_messages(&conn, conversation_id, false)
    }

    fn soft_delete_message(&self, message_id: &MessageId) -> TreeResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE messages SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            params![message_id.to_string()],
        )?;
        if updated == 0 {
            return Err(TreeError::MessageNotFound(*message_id));
        }
        Ok(())
    }

    fn list_ancestor_closure(&self, descendant_id: &MessageId) -> TreeResult<Vec<AncestorLink>> {
        let conn = self.lock()?;
        let mut links = TransactionClosure { conn: &conn }.ancestors_of(descendant_id)?;
        links.sort_by_key(|link| link.depth);
        Ok(links)
    }

    fn list_descendant_closure(&self, ancestor_id: &MessageId) -> TreeResult<Vec<DescendantLink>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT descendant_id, depth FROM message_closure
             WHERE ancestor_id = ?1
             ORDER BY depth ASC",
        )?;
        let rows = stmt.query_map(params![ancestor_id.to_string()], |row| {
            Ok(DescendantLink {
                descendant_id: MessageId::from_uuid(uuid_column(row, 0)?),
                depth: row.get(1)?,
            })
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }
}

fn fetch_conversation(conn: &Connection, conversation_id: &ConversationId) -> TreeResult<Conversation> {
    conn.query_row(
        "SELECT id, user_id, title, model, language, started_at, is_deleted
         FROM conversations
         WHERE id = ?1 AND is_deleted = 0",
        params![conversation_id.to_string()],
        conversation_from_row,
    )
    .optional()?
    .ok_or(TreeError::ConversationNotFound(*conversation_id))
}

fn select_messages(
    conn: &Connection,
    conversation_id: &ConversationId,
    include_deleted: bool,
) -> TreeResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, parent_id, role, content, created_at, is_deleted
         FROM messages
         WHERE conversation_id = ?1 AND (?2 OR is_deleted = 0)
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(
        params![conversation_id.to_string(), include_deleted],
        message_from_row,
    )?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId::from_uuid(uuid_column(row, 0)?),
        user_id: UserId::from_uuid(uuid_column(row, 1)?),
        title: row.get(2)?,
        model: row.get(3)?,
        language: row.get(4)?,
        started_at: timestamp_column(row, 5)?,
        is_deleted: row.get::<_, i64>(6)? == 1,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let parent_id = match row.get::<_, Option<String>>(2)? {
        Some(raw) => Some(MessageId::from_uuid(parse_column(2, &raw, Uuid::parse_str)?)),
        None => None,
    };
    let role_raw: String = row.get(3)?;
    Ok(Message {
        id: MessageId::from_uuid(uuid_column(row, 0)?),
        conversation_id: ConversationId::from_uuid(uuid_column(row, 1)?),
        parent_id,
        role: parse_column(3, &role_raw, Role::from_str)?,
        content: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        is_deleted: row.get::<_, i64>(6)? == 1,
    })
}

fn parse_column<T, E>(
    index: usize,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn uuid_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(index)?;
    parse_column(index, &raw, Uuid::parse_str)
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_column(index, &raw, DateTime::parse_from_rfc3339).map(|ts| ts.with_timezone(&Utc))
}

/// Fixed-width UTC so lexical order matches creation order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Brings databases created before soft deletion and per-conversation model
/// settings up to the current schema.
fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    ignore_duplicate_column_error(conn.execute(
        "ALTER TABLE conversations ADD COLUMN model TEXT NOT NULL DEFAULT ''",
        [],
    ))?;
    ignore_duplicate_column_error(conn.execute(
        "ALTER TABLE conversations ADD COLUMN language TEXT NOT NULL DEFAULT 'ja'",
        [],
    ))?;
    ignore_duplicate_column_error(conn.execute(
        "ALTER TABLE conversations ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0",
        [],
    ))?;
    ignore_duplicate_column_error(conn.execute(
        "ALTER TABLE messages ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0",
        [],
    ))?;

    if table_has_column(conn, "conversations", "title")? {
        conn.execute(
            "UPDATE conversations SET title = NULL WHERE title = ''",
            [],
        )?;
    }
    Ok(())
}

fn ignore_duplicate_column_error(result: rusqlite::Result<usize>) -> rusqlite::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
            if msg.to_ascii_lowercase().contains("duplicate column name") =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1",
        table.replace('\'', "''")
    );
    let count: i64 = conn.query_row(&sql, params![column], |row| row.get(0))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests;
