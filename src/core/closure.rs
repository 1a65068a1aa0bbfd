//! Maintenance of the ancestor/descendant closure index.
//!
//! Every message owns one row per ancestor on its root path plus a self row at
//! depth 0. Rows are written by [`on_message_created`] inside the same
//! transaction that inserts the message, through whatever [`ClosureIndex`] the
//! store exposes for that transaction.

use std::collections::{HashMap, HashSet};

use super::error::{TreeError, TreeResult};
use super::model::{AncestorLink, ClosureEdge, Message, MessageId};

/// Transaction-scoped view of the closure table.
pub trait ClosureIndex {
    fn ancestors_of(&self, descendant: &MessageId) -> TreeResult<Vec<AncestorLink>>;
    fn insert_edge(&mut self, edge: ClosureEdge) -> TreeResult<()>;
}

/// Writes the closure rows for a freshly inserted message and returns how many
/// rows were written.
pub fn on_message_created(
    index: &mut dyn ClosureIndex,
    message_id: MessageId,
    parent_id: Option<MessageId>,
) -> TreeResult<usize> {
    let inherited = match parent_id {
        Some(parent_id) => {
            let ancestors = index.ancestors_of(&parent_id)?;
            let has_self_row = ancestors
                .iter()
                .any(|link| link.ancestor_id == parent_id && link.depth == 0);
            if !has_self_row {
                return Err(TreeError::Consistency(format!(
                    "parent {} has no self closure row",
                    parent_id
                )));
            }
            ancestors
        }
        None => Vec::new(),
    };

    index.insert_edge(ClosureEdge {
        ancestor_id: message_id,
        descendant_id: message_id,
        depth: 0,
    })?;
    for link in &inherited {
        index.insert_edge(ClosureEdge {
            ancestor_id: link.ancestor_id,
            descendant_id: message_id,
            depth: link.depth + 1,
        })?;
    }

    let written = inherited.len() + 1;
    log::debug!(
        "closure rows written for {}: {} (parent: {:?})",
        message_id,
        written,
        parent_id.map(|id| id.to_string())
    );
    Ok(written)
}

/// The rows a message should own, derived from the parent pointers alone.
pub fn expected_edges(message_id: &MessageId, messages: &[Message]) -> TreeResult<Vec<ClosureEdge>> {
    let by_id: HashMap<MessageId, &Message> = messages.iter().map(|m| (m.id, m)).collect();
    expected_edges_with(message_id, &by_id)
}

fn expected_edges_with(
    message_id: &MessageId,
    by_id: &HashMap<MessageId, &Message>,
) -> TreeResult<Vec<ClosureEdge>> {
    let mut edges = Vec::new();
    let mut current = Some(*message_id);
    let mut depth = 0_u32;

    while let Some(id) = current {
        let message = by_id
            .get(&id)
            .ok_or_else(|| TreeError::Consistency(format!("dangling parent reference {}", id)))?;
        edges.push(ClosureEdge {
            ancestor_id: id,
            descendant_id: *message_id,
            depth,
        });
        if edges.len() > by_id.len() {
            return Err(TreeError::Consistency(format!(
                "parent chain of {} contains a cycle",
                message_id
            )));
        }
        depth += 1;
        current = message.parent_id;
    }

    Ok(edges)
}

/// Checks that `edges` is exactly the closure of the parent relation over
/// `messages` (soft-deleted messages included).
pub fn verify_closure(messages: &[Message], edges: &[ClosureEdge]) -> TreeResult<()> {
    let by_id: HashMap<MessageId, &Message> = messages.iter().map(|m| (m.id, m)).collect();

    let mut expected: HashSet<ClosureEdge> = HashSet::new();
    for message in messages {
        expected.extend(expected_edges_with(&message.id, &by_id)?);
    }

    let mut actual: HashSet<ClosureEdge> = HashSet::with_capacity(edges.len());
    for edge in edges {
        if !actual.insert(*edge) {
            return Err(TreeError::Consistency(format!(
                "duplicate row {} -> {}",
                edge.ancestor_id, edge.descendant_id
            )));
        }
    }

    if let Some(missing) = expected.difference(&actual).next() {
        return Err(TreeError::Consistency(format!(
            "missing row {} -> {} at depth {}",
            missing.ancestor_id, missing.descendant_id, missing.depth
        )));
    }
    if let Some(extra) = actual.difference(&expected).next() {
        return Err(TreeError::Consistency(format!(
            "unexpected row {} -> {} at depth {}",
            extra.ancestor_id, extra.descendant_id, extra.depth
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ConversationId, NewMessage};

    #[derive(Default)]
    struct VecIndex {
        edges: Vec<ClosureEdge>,
    }

    impl ClosureIndex for VecIndex {
        fn ancestors_of(&self, descendant: &MessageId) -> TreeResult<Vec<AncestorLink>> {
            Ok(self
                .edges
                .iter()
                .filter(|edge| edge.descendant_id == *descendant)
                .map(|edge| AncestorLink {
                    ancestor_id: edge.ancestor_id,
                    depth: edge.depth,
                })
                .collect())
        }

        fn insert_edge(&mut self, edge: ClosureEdge) -> TreeResult<()> {
            self.edges.push(edge);
            Ok(())
        }
    }

    fn chain(len: usize) -> Vec<Message> {
        let conversation_id = ConversationId::new();
        let mut messages: Vec<Message> = Vec::new();
        for i in 0..len {
            let parent = messages.last().map(|m| m.id);
            messages.push(NewMessage::user(conversation_id, parent, format!("m{i}")).into_message());
        }
        messages
    }

    #[test]
    fn each_message_owns_depth_plus_one_rows() {
        let messages = chain(5);
        let mut index = VecIndex::default();
        for message in &messages {
            on_message_created(&mut index, message.id, message.parent_id).expect("closure");
        }

        for (depth, message) in messages.iter().enumerate() {
            let rows = index.ancestors_of(&message.id).expect("ancestors");
            assert_eq!(rows.len(), depth + 1);
        }
        verify_closure(&messages, &index.edges).expect("consistent");
    }

    #[test]
    fn root_gets_only_a_self_row() {
        let messages = chain(1);
        let mut index = VecIndex::default();
        let written = on_message_created(&mut index, messages[0].id, None).expect("closure");
        assert_eq!(written, 1);
        assert_eq!(index.edges[0].depth, 0);
    }

    #[test]
    fn parent_without_self_row_is_a_consistency_failure() {
        let messages = chain(2);
        let mut index = VecIndex::default();
        let err = on_message_created(&mut index, messages[1].id, messages[1].parent_id)
            .unwrap_err();
        assert!(matches!(err, TreeError::Consistency(_)));
        assert!(index.edges.is_empty());
    }

    #[test]
    fn verify_reports_missing_and_extra_rows() {
        let messages = chain(3);
        let mut index = VecIndex::default();
        for message in &messages {
            on_message_created(&mut index, message.id, message.parent_id).expect("closure");
        }

        let mut missing = index.edges.clone();
        missing.pop();
        assert!(verify_closure(&messages, &missing).is_err());

        let mut extra = index.edges.clone();
        extra.push(ClosureEdge {
            ancestor_id: messages[2].id,
            descendant_id: messages[0].id,
            depth: 2,
        });
        assert!(verify_closure(&messages, &extra).is_err());
    }

    #[test]
    fn expected_edges_follow_the_parent_chain() {
        let messages = chain(3);
        let edges = expected_edges(&messages[2].id, &messages).expect("edges");
        let depths: Vec<(MessageId, u32)> = edges.iter().map(|e| (e.ancestor_id, e.depth)).collect();
        assert_eq!(
            depths,
            vec![(messages[2].id, 0), (messages[1].id, 1), (messages[0].id, 2)]
        );
    }
}
