//! Active-path selection and branch detection over a [`MessageTree`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::{TreeError, TreeResult};
use super::model::{Message, MessageId};
use super::tree::{MessageTree, NodeIndex};

/// Root-to-node chain of message ids, ordered root first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivePath(Vec<MessageId>);

impl ActivePath {
    pub fn new(ids: Vec<MessageId>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &[MessageId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.0.contains(id)
    }

    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.0.iter().position(|candidate| candidate == id)
    }

    pub fn leaf(&self) -> Option<MessageId> {
        self.0.last().copied()
    }

    pub fn push(&mut self, id: MessageId) {
        self.0.push(id);
    }

    /// Keeps ids up to and including `index`.
    pub fn truncate_through(&mut self, index: usize) {
        self.0.truncate(index + 1);
    }

    /// True when `child` directly follows `parent` on this path.
    pub fn is_step(&self, parent: &MessageId, child: &MessageId) -> bool {
        self.0
            .windows(2)
            .any(|pair| pair[0] == *parent && pair[1] == *child)
    }

    pub fn into_vec(self) -> Vec<MessageId> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPoint {
    pub message_id: MessageId,
    pub children: Vec<Message>,
}

/// Branch points keyed by message id, iterated in creation order.
#[derive(Debug, Clone, Default)]
pub struct BranchMap {
    entries: Vec<BranchPoint>,
    index: HashMap<MessageId, usize>,
}

impl BranchMap {
    pub fn get(&self, id: &MessageId) -> Option<&[Message]> {
        self.index
            .get(id)
            .map(|&position| self.entries[position].children.as_slice())
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchPoint> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<BranchPoint> {
        self.entries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOption {
    pub message: Message,
    pub in_current_path: bool,
}

/// Earliest-created root wins when more than one root exists.
fn select_root(tree: &MessageTree) -> Option<NodeIndex> {
    tree.root_positions().first().copied()
}

/// Follows the most recently created child until a leaf is reached.
fn descend_latest(tree: &MessageTree, from: NodeIndex) -> Vec<MessageId> {
    let mut ids = vec![tree.node(from).id];
    let mut current = from;
    while let Some(&latest) = tree.child_positions(current).last() {
        ids.push(tree.node(latest).id);
        current = latest;
    }
    ids
}

pub fn default_path(tree: &MessageTree) -> ActivePath {
    let Some(root) = select_root(tree) else {
        return ActivePath::default();
    };
    let path = ActivePath::new(descend_latest(tree, root));
    log::debug!("default path selected with {} messages", path.len());
    path
}

pub fn branch_points(tree: &MessageTree) -> BranchMap {
    let mut map = BranchMap::default();
    for message in tree.messages() {
        let children = tree.children_of(&message.id);
        if children.len() < 2 {
            continue;
        }
        map.index.insert(message.id, map.entries.len());
        map.entries.push(BranchPoint {
            message_id: message.id,
            children: children.into_iter().cloned().collect(),
        });
    }
    map
}

pub fn path_to(target: &MessageId, tree: &MessageTree) -> TreeResult<ActivePath> {
    let mut current = tree
        .get(target)
        .ok_or(TreeError::MessageNotFound(*target))?;
    let mut ids = vec![current.id];

    while let Some(parent_id) = current.parent_id {
        current = tree
            .get(&parent_id)
            .ok_or(TreeError::MessageNotFound(parent_id))?;
        ids.push(current.id);
        if ids.len() > tree.len() {
            return Err(TreeError::InvalidPath(format!(
                "parent chain of {} does not terminate",
                target
            )));
        }
    }

    ids.reverse();
    Ok(ActivePath::new(ids))
}

/// Accepts `ids` only when it is a contiguous chain starting at a root.
pub fn validate_path(tree: &MessageTree, ids: &[MessageId]) -> TreeResult<ActivePath> {
    let Some(first) = ids.first() else {
        if tree.is_empty() {
            return Ok(ActivePath::default());
        }
        return Err(TreeError::InvalidPath("path is empty".to_string()));
    };

    let root = tree.get(first).ok_or(TreeError::MessageNotFound(*first))?;
    if !root.is_root() {
        return Err(TreeError::InvalidPath(format!("{} is not a root", first)));
    }

    for pair in ids.windows(2) {
        let child = tree
            .get(&pair[1])
            .ok_or(TreeError::MessageNotFound(pair[1]))?;
        if child.parent_id != Some(pair[0]) {
            return Err(TreeError::InvalidPath(format!(
                "{} is not a child of {}",
                pair[1], pair[0]
            )));
        }
    }

    Ok(ActivePath::new(ids.to_vec()))
}

/// Path through `branch_point` into `child`, then down the most recently
/// extended descent below it.
pub fn branch_path(
    tree: &MessageTree,
    current: &ActivePath,
    branch_point: &MessageId,
    child: &MessageId,
) -> TreeResult<ActivePath> {
    let index = current
        .position_of(branch_point)
        .ok_or(TreeError::ParentNotInPath(*branch_point))?;
    let position = tree
        .position(child)
        .ok_or(TreeError::MessageNotFound(*child))?;
    if tree.node(position).parent_id != Some(*branch_point) {
        return Err(TreeError::InvalidPath(format!(
            "{} is not a child of {}",
            child, branch_point
        )));
    }

    let mut path = current.clone();
    path.truncate_through(index);
    for id in descend_latest(tree, position) {
        path.push(id);
    }
    Ok(path)
}

pub fn branch_options(
    tree: &MessageTree,
    branch_point: &MessageId,
    current: &ActivePath,
) -> TreeResult<Vec<BranchOption>> {
    if !tree.contains(branch_point) {
        return Err(TreeError::MessageNotFound(*branch_point));
    }
    Ok(tree
        .children_of(branch_point)
        .into_iter()
        .map(|message| BranchOption {
            in_current_path: current.contains(&message.id),
            message: message.clone(),
        })
        .collect())
}

/// Messages on `path`, ordered by timestamp.
pub fn path_messages(tree: &MessageTree, path: &ActivePath) -> Vec<Message> {
    let mut messages: Vec<Message> = path
        .ids()
        .iter()
        .filter_map(|id| tree.get(id).cloned())
        .collect();
    messages.sort_by(|a, b| a.creation_order(b));
    messages
}
