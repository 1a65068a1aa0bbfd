use std::collections::HashMap;

use super::model::{Message, MessageId};

pub(crate) type NodeIndex = usize;

/// In-memory adjacency view over a flat message list.
///
/// Nodes live in a flat arena sorted by creation order, so every children
/// list, the root list and any iteration over the arena follow the persisted
/// creation order regardless of the order the messages were fetched in.
#[derive(Debug, Clone, Default)]
pub struct MessageTree {
    nodes: Vec<Message>,
    index: HashMap<MessageId, NodeIndex>,
    children: Vec<Vec<NodeIndex>>,
    roots: Vec<NodeIndex>,
    orphans: Vec<NodeIndex>,
}

impl MessageTree {
    pub fn build(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut nodes: Vec<Message> = messages.into_iter().collect();
        nodes.sort_by(|a, b| a.creation_order(b));

        let mut index = HashMap::with_capacity(nodes.len());
        nodes.retain(|message| {
            if index.contains_key(&message.id) {
                log::warn!("duplicate message {} dropped from tree", message.id);
                return false;
            }
            index.insert(message.id, 0);
            true
        });
        for (position, message) in nodes.iter().enumerate() {
            index.insert(message.id, position);
        }

        let mut children = vec![Vec::new(); nodes.len()];
        let mut roots = Vec::new();
        let mut orphans = Vec::new();

        for (position, message) in nodes.iter().enumerate() {
            match message.parent_id {
                None => roots.push(position),
                Some(parent_id) => match index.get(&parent_id) {
                    Some(&parent) if parent != position => {
                        children[parent].push(position);
                    }
                    _ => orphans.push(position),
                },
            }
        }

        if !orphans.is_empty() {
            log::debug!("tree built with {} dangling parent references", orphans.len());
        }

        Self {
            nodes,
            index,
            children,
            roots,
            orphans,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&position| &self.nodes[position])
    }

    /// All messages in creation order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.nodes.iter()
    }

    /// Children of `id` in creation order; empty for leaves and unknown ids.
    pub fn children_of(&self, id: &MessageId) -> Vec<&Message> {
        self.index
            .get(id)
            .map(|&position| {
                self.children[position]
                    .iter()
                    .map(|&child| &self.nodes[child])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn child_count(&self, id: &MessageId) -> usize {
        self.index
            .get(id)
            .map(|&position| self.children[position].len())
            .unwrap_or(0)
    }

    pub fn is_leaf(&self, id: &MessageId) -> bool {
        self.child_count(id) == 0
    }

    /// Root candidates (null parent) in creation order.
    pub fn roots(&self) -> Vec<&Message> {
        self.roots.iter().map(|&root| &self.nodes[root]).collect()
    }

    /// Messages whose parent reference does not resolve inside this tree.
    pub fn orphans(&self) -> Vec<&Message> {
        self.orphans.iter().map(|&orphan| &self.nodes[orphan]).collect()
    }

    pub(crate) fn position(&self, id: &MessageId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn node(&self, position: NodeIndex) -> &Message {
        &self.nodes[position]
    }

    pub(crate) fn child_positions(&self, position: NodeIndex) -> &[NodeIndex] {
        &self.children[position]
    }

    pub(crate) fn root_positions(&self) -> &[NodeIndex] {
        &self.roots
    }
}
