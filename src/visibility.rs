//! Decides which messages and blocks a reader gets to see.

use crate::model::{ContentBlock, Message, Role};

/// Blocks a tool-role message may contribute to rendered output. Everything
/// else a tool emits is internal scaffolding.
fn is_visible_tool_block(block: &ContentBlock) -> bool {
    matches!(
        block,
        ContentBlock::ExecutionOutput { .. }
            | ContentBlock::TetherQuote { .. }
            | ContentBlock::TetherBrowsing { .. }
    )
}

/// Filter a transcript for display. Never mutates the input; messages whose
/// block list ends up empty are dropped and order is preserved.
pub fn visible_messages(messages: &[Message], include_thoughts: bool) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|msg| visible_message(msg, include_thoughts))
        .collect()
}

fn visible_message(msg: &Message, include_thoughts: bool) -> Option<Message> {
    let blocks: Vec<ContentBlock> = msg
        .blocks
        .iter()
        .filter(|b| msg.role != Role::Tool || is_visible_tool_block(b))
        .filter(|b| include_thoughts || !b.is_thought())
        .cloned()
        .collect();
    msg.with_blocks(blocks)
}
