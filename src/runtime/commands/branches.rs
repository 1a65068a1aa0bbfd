use serde::{Deserialize, Serialize};

use crate::core::layout::{DisplayMode, ExpansionSet, TreeLayout};
use crate::core::model::MessageId;
use crate::core::path::BranchOption;

use super::shared::{parse_message_id, parse_message_ids, AppContext, PathView};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSummary {
    pub branch_point: MessageId,
    pub on_active_path: bool,
    pub options: Vec<BranchOption>,
}

pub fn list_branches(
    ctx: &AppContext,
    conversation_id: &str,
    leaf: Option<&str>,
) -> Result<Vec<BranchSummary>, String> {
    let session = ctx.open_session(conversation_id, leaf)?;
    session
        .branches()
        .iter()
        .map(|point| {
            Ok(BranchSummary {
                branch_point: point.message_id,
                on_active_path: session.active_path().contains(&point.message_id),
                options: session
                    .branch_options(&point.message_id)
                    .map_err(|e| e.to_string())?,
            })
        })
        .collect()
}

pub fn switch_branch(ctx: &AppContext, conversation_id: &str, path: &[String]) -> Result<PathView, String> {
    let ids = parse_message_ids(path)?;
    let mut session = ctx.open_session(conversation_id, None)?;
    session.switch_to_branch(&ids).map_err(|e| e.to_string())?;
    PathView::from_session(&session)
}

pub fn select_branch(
    ctx: &AppContext,
    conversation_id: &str,
    leaf: Option<&str>,
    branch_point: &str,
    child: &str,
) -> Result<PathView, String> {
    let branch_point = parse_message_id(branch_point)?;
    let child = parse_message_id(child)?;
    let mut session = ctx.open_session(conversation_id, leaf)?;
    session
        .select_branch(&branch_point, &child)
        .map_err(|e| e.to_string())?;
    PathView::from_session(&session)
}

pub fn compute_layout(
    ctx: &AppContext,
    conversation_id: &str,
    leaf: Option<&str>,
    full: bool,
    expanded: &[String],
) -> Result<TreeLayout, String> {
    let session = ctx.open_session(conversation_id, leaf)?;
    let expansion: ExpansionSet = parse_message_ids(expanded)?.into_iter().collect();
    let mode = if full {
        DisplayMode::Full
    } else {
        DisplayMode::Excerpt
    };
    let layout = session.layout(&ctx.layout_engine(), mode, &expansion);
    log::debug!(
        "layout for {} has {} nodes and {} edges",
        conversation_id,
        layout.nodes.len(),
        layout.edges.len()
    );
    Ok(layout)
}
