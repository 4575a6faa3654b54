//! Normalized conversation model shared by the parser, the visibility filter,
//! the renderers and the categorizer.
//!
//! Everything here is built once per parse and never mutated afterwards, with
//! one exception: [`ImageRef::resolved_path`], a write-once cell filled by the
//! image resolver when a document is rendered.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Maximum length (in characters) of [`Conversation::first_user_message`].
pub const PREVIEW_MAX_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Author of a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// An image referenced from a message, identified by its asset pointer
/// (e.g. `sediment://file_0000…`).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub asset_pointer: String,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub size_bytes: Option<u64>,
    pub content_type: String,
    /// Local file backing this image. Unset until the resolver has looked the
    /// pointer up; `Some(None)` records a failed lookup.
    resolved_path: OnceLock<Option<PathBuf>>,
}

impl ImageRef {
    pub fn new(asset_pointer: impl Into<String>) -> Self {
        Self {
            asset_pointer: asset_pointer.into(),
            width: None,
            height: None,
            size_bytes: None,
            content_type: "image_asset_pointer".to_string(),
            resolved_path: OnceLock::new(),
        }
    }

    /// The resolved file, if resolution has happened and succeeded.
    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolved_path.get().and_then(|p| p.as_deref())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_path.get().is_some()
    }

    /// Record the outcome of resolution. The first call wins; later calls
    /// return whatever was stored first.
    pub(crate) fn resolve_with(&self, f: impl FnOnce() -> Option<PathBuf>) -> Option<&Path> {
        self.resolved_path.get_or_init(f).as_deref()
    }
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

/// One self-contained unit of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Code {
        text: String,
        /// Empty when the export did not know the language.
        language: String,
    },
    Image {
        refs: Vec<ImageRef>,
    },
    Thought {
        text: String,
        summary: Option<String>,
    },
    ReasoningRecap {
        text: String,
    },
    ExecutionOutput {
        text: String,
    },
    TetherQuote {
        text: String,
        url: Option<String>,
        domain: Option<String>,
    },
    TetherBrowsing {
        text: String,
    },
    ComputerOutput {
        text: String,
        refs: Vec<ImageRef>,
    },
    SystemError {
        text: String,
    },
    /// Content of a type this tool does not know about, kept as plain text.
    Other {
        kind: String,
        text: String,
    },
}

impl ContentBlock {
    /// Image references carried by this block, if any.
    pub fn image_refs(&self) -> &[ImageRef] {
        match self {
            ContentBlock::Image { refs } | ContentBlock::ComputerOutput { refs, .. } => refs,
            _ => &[],
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, ContentBlock::Thought { .. })
    }
}

// ---------------------------------------------------------------------------
// Messages and conversations
// ---------------------------------------------------------------------------

/// A message on the active branch. Always carries at least one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Raw `content_type` tag from the export, kept for diagnostics.
    pub content_type: String,
    pub blocks: Vec<ContentBlock>,
    pub create_time: Option<DateTime<Utc>>,
    pub model_slug: String,
    pub weight: f64,
}

impl Message {
    /// Copy of this message with a different block list, or `None` if the
    /// list is empty.
    pub fn with_blocks(&self, blocks: Vec<ContentBlock>) -> Option<Message> {
        if blocks.is_empty() {
            return None;
        }
        Some(Message {
            id: self.id.clone(),
            role: self.role,
            content_type: self.content_type.clone(),
            blocks,
            create_time: self.create_time,
            model_slug: self.model_slug.clone(),
            weight: self.weight,
        })
    }

    /// First non-blank text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.blocks.iter().find_map(|b| match b {
            ContentBlock::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }
}

/// The active transcript of one exported conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
    pub model_slug: String,
    pub messages: Vec<Message>,
    pub first_user_message: String,
}

impl Conversation {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// First eight characters of the id, used to disambiguate file names.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Truncate to at most `max` characters without splitting a code point.
/// First eight characters of a conversation id.
pub fn short_id(id: &str) -> &str {
    truncate_chars(id, 8)
}

pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
