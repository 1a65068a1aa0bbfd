//! Horizontal tree placement for the conversation overview.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::model::{MessageId, Role};
use super::path::ActivePath;
use super::tree::{MessageTree, NodeIndex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Horizontal spacing between siblings directly below a root.
    pub level_width: f64,
    /// Factor applied to the spacing at every level below.
    pub level_shrink: f64,
    pub vertical_step: f64,
    /// Fixed horizontal offset between consecutive root subtrees.
    pub root_gap: f64,
    pub label_chars: usize,
    pub ellipsis: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            level_width: 300.0,
            level_shrink: 0.7,
            vertical_step: 150.0,
            root_gap: 500.0,
            label_chars: 100,
            ellipsis: "...".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Excerpt,
    Full,
}

/// Nodes the viewer expanded individually.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpansionSet(BTreeSet<MessageId>);

impl ExpansionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the node is expanded after the toggle.
    pub fn toggle(&mut self, id: MessageId) -> bool {
        if self.0.remove(&id) {
            false
        } else {
            self.0.insert(id);
            true
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.0.contains(id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<MessageId> for ExpansionSet {
    fn from_iter<T: IntoIterator<Item = MessageId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: MessageId,
    pub x: f64,
    pub y: f64,
    pub rendered_label: String,
    pub role: Role,
    pub can_expand: bool,
    pub expanded: bool,
    pub in_path: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEdge {
    pub source_id: MessageId,
    pub target_id: MessageId,
    pub on_active_path: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeLayout {
    pub nodes: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
}

impl TreeLayout {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Marks nodes on `path` and the edges joining consecutive path entries.
    pub fn highlight(&mut self, path: &ActivePath) {
        for node in &mut self.nodes {
            node.in_path = path.contains(&node.id);
        }
        for edge in &mut self.edges {
            edge.on_active_path = path.is_step(&edge.source_id, &edge.target_id);
        }
    }
}

struct Frame {
    position: NodeIndex,
    x: f64,
    y: f64,
    level_width: f64,
    parent: Option<MessageId>,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn layout(
        &self,
        tree: &MessageTree,
        mode: DisplayMode,
        expansion: &ExpansionSet,
    ) -> TreeLayout {
        let mut layout = TreeLayout::default();
        if tree.is_empty() {
            return layout;
        }

        let skipped = tree.orphans().len();
        if skipped > 0 {
            log::warn!("layout skipped {} messages with dangling parents", skipped);
        }

        let mut stack: Vec<Frame> = Vec::new();
        let mut cursor = 0.0_f64;
        for &root in tree.root_positions() {
            stack.push(Frame {
                position: root,
                x: cursor,
                y: 0.0,
                level_width: self.config.level_width,
                parent: None,
            });
            self.place_subtree(tree, mode, expansion, &mut stack, &mut layout);
            cursor += self.config.root_gap;
        }

        log::debug!(
            "layout produced {} nodes and {} edges",
            layout.nodes.len(),
            layout.edges.len()
        );
        layout
    }

    fn place_subtree(
        &self,
        tree: &MessageTree,
        mode: DisplayMode,
        expansion: &ExpansionSet,
        stack: &mut Vec<Frame>,
        layout: &mut TreeLayout,
    ) {
        while let Some(frame) = stack.pop() {
            let message = tree.node(frame.position);
            if let Some(parent) = frame.parent {
                layout.edges.push(LayoutEdge {
                    source_id: parent,
                    target_id: message.id,
                    on_active_path: false,
                });
            }

            let expanded = mode == DisplayMode::Full || expansion.contains(&message.id);
            let (rendered_label, can_expand) = self.render_label(&message.content, expanded);
            layout.nodes.push(LayoutNode {
                id: message.id,
                x: frame.x,
                y: frame.y,
                rendered_label,
                role: message.role,
                can_expand,
                expanded,
                in_path: false,
            });

            let children = tree.child_positions(frame.position);
            let count = children.len();
            if count == 0 {
                continue;
            }
            let start_x = frame.x - frame.level_width * (count - 1) as f64 / 2.0;
            // Reverse push keeps siblings in creation order when popped.
            for (offset, &child) in children.iter().enumerate().rev() {
                stack.push(Frame {
                    position: child,
                    x: start_x + frame.level_width * offset as f64,
                    y: frame.y + self.config.vertical_step,
                    level_width: frame.level_width * self.config.level_shrink,
                    parent: Some(message.id),
                });
            }
        }
    }

    fn render_label(&self, content: &str, expanded: bool) -> (String, bool) {
        let budget = self.config.label_chars;
        let can_expand = content.chars().count() > budget;
        if expanded || !can_expand {
            return (content.to_string(), can_expand);
        }
        let mut label: String = content.chars().take(budget).collect();
        label.push_str(&self.config.ellipsis);
        (label, can_expand)
    }
}
