//! Recovers the active transcript from a conversation's branching node graph.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::importer::{RawConversation, RawNode};
use crate::model::{Conversation, Message, PREVIEW_MAX_CHARS, Role, truncate_chars};
use crate::normalize::normalize;

/// Convert epoch seconds to a UTC timestamp. Out-of-range values are dropped.
pub fn timestamp(secs: Option<f64>) -> Option<DateTime<Utc>> {
    let secs = secs?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Walk from `leaf` up through `parent` links and return node ids in
/// root→leaf order.
///
/// Stops at an empty parent, at the first id missing from the mapping (which
/// is still included and later decodes to nothing), or when an id repeats.
/// Each id is visited at most once, so cyclic exports terminate.
pub fn active_path(mapping: &HashMap<String, RawNode>, leaf: &str) -> Vec<String> {
    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(leaf.to_string()).filter(|id| !id.is_empty());

    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            log::debug!("Cycle in parent chain at node {}", id);
            break;
        }
        next = mapping
            .get(&id)
            .and_then(|node| node.parent.clone())
            .filter(|p| !p.is_empty());
        path.push(id);
    }

    path.reverse();
    path
}

/// Decode one node into a [`Message`], or `None` when it carries nothing
/// worth keeping: no message, a pruned branch (weight 0.0), or no content
/// blocks after normalization.
pub fn decode_message(node_id: &str, node: &RawNode) -> Option<Message> {
    let raw = node.message.as_ref()?;
    let weight = raw.weight();
    if weight == 0.0 {
        return None;
    }

    let blocks = normalize(&raw.content);
    if blocks.is_empty() {
        return None;
    }

    let id = node
        .id
        .clone()
        .or_else(|| raw.id.clone())
        .unwrap_or_else(|| node_id.to_string());

    Some(Message {
        id,
        role: raw.author.role,
        content_type: raw.content.content_type().to_string(),
        blocks,
        create_time: timestamp(raw.create_time),
        model_slug: raw.metadata.model_slug.clone().unwrap_or_default(),
        weight,
    })
}

/// Parse one archive record into its active transcript.
pub fn parse_conversation(raw: &RawConversation) -> Conversation {
    let leaf = raw.current_node.as_deref().unwrap_or("");
    let path = active_path(&raw.mapping, leaf);

    let mut messages: Vec<Message> = Vec::with_capacity(path.len());
    let mut first_user_message = String::new();
    let mut preview_taken = false;

    for node_id in &path {
        let Some(node) = raw.mapping.get(node_id) else {
            continue;
        };
        let Some(msg) = decode_message(node_id, node) else {
            continue;
        };

        // Synthetic system prompts at the top of the thread carry nothing for a reader.
        if msg.role == Role::System && messages.is_empty() {
            continue;
        }

        if msg.role == Role::User
            && !preview_taken
            && let Some(text) = msg.first_text()
        {
            first_user_message = truncate_chars(text.trim(), PREVIEW_MAX_CHARS).to_string();
            preview_taken = true;
        }

        messages.push(msg);
    }

    Conversation {
        id: raw.conversation_id().to_string(),
        title: raw.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        create_time: timestamp(raw.create_time),
        update_time: timestamp(raw.update_time),
        model_slug: raw.default_model_slug.clone().unwrap_or_default(),
        messages,
        first_user_message,
    }
}
