//! Self-contained type definitions for the ChatGPT data export (`conversations.json`).
//!
//! The archive is a JSON array with one object per conversation:
//!
//! ```json
//! {
//!   "conversation_id": "6750…",
//!   "title": "Rust lifetimes",
//!   "create_time": 1733334180.52,
//!   "update_time": 1733334299.01,
//!   "default_model_slug": "gpt-4o",
//!   "current_node": "c3f0…",
//!   "mapping": {
//!     "c3f0…": {
//!       "id": "c3f0…",
//!       "parent": "a1b2…",
//!       "children": [],
//!       "message": {
//!         "author": { "role": "assistant" },
//!         "content": { "content_type": "text", "parts": ["…"] },
//!         "create_time": 1733334299.01,
//!         "weight": 1.0,
//!         "metadata": { "model_slug": "gpt-4o" }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! The schema is undocumented and drifts between export versions, so every
//! field below the conversation object is optional and a value of the wrong
//! JSON type is read as absent. Only a top level that is not an array of
//! objects is a hard error.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::model::Role;

pub const CONVERSATIONS_FILE: &str = "conversations.json";

// ---------------------------------------------------------------------------
// Lenient field helpers
// ---------------------------------------------------------------------------

/// Deserialize any JSON value, keeping it only if it has the expected shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], for collections that default to empty.
fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// A JSON array whose malformed elements are dropped individually.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items: Vec<serde_json::Value> = lenient_or_default(deserializer)?;
    Ok(items
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// A JSON object whose malformed values are dropped individually.
fn lenient_map<'de, D, T>(deserializer: D) -> Result<HashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items: HashMap<String, serde_json::Value> = lenient_or_default(deserializer)?;
    Ok(items
        .into_iter()
        .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|node| (k, node)))
        .collect())
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// One conversation record of the archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConversation {
    #[serde(default, deserialize_with = "lenient")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub create_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub update_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub default_model_slug: Option<String>,
    /// The leaf of the active branch.
    #[serde(default, deserialize_with = "lenient")]
    pub current_node: Option<String>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub mapping: HashMap<String, RawNode>,
}

impl RawConversation {
    /// `conversation_id`, falling back to `id`. Empty when neither is set.
    pub fn conversation_id(&self) -> &str {
        self.conversation_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.id.as_deref())
            .unwrap_or("")
    }
}

/// A node of the branching message graph.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Option<String>,
    /// Absent on the synthetic root node present in most exports.
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<RawMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub author: RawAuthor,
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub content: RawContent,
    #[serde(default, deserialize_with = "lenient")]
    pub create_time: Option<f64>,
    /// 0.0 marks a pruned message. Missing means 1.0.
    #[serde(default, deserialize_with = "lenient")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub metadata: RawMetadata,
}

impl RawMessage {
    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAuthor {
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub model_slug: Option<String>,
}

// ---------------------------------------------------------------------------
// Content payload
// ---------------------------------------------------------------------------

/// Union of every field any content type uses. Which ones are meaningful
/// depends on `content_type`; see [`crate::normalize`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContent {
    #[serde(default, deserialize_with = "lenient")]
    pub content_type: Option<String>,
    /// Strings for text parts, objects for image pointers and other
    /// structured parts.
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub parts: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub thoughts: Vec<RawThought>,
    /// Used by `reasoning_recap`.
    #[serde(default, deserialize_with = "lenient")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub result: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub screenshot: Option<RawImagePointer>,
    /// Used by `system_error`.
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}

impl RawContent {
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("text")
    }

    /// String parts joined with newlines. Non-string parts are ignored.
    pub fn joined_string_parts(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThought {
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub content: Option<String>,
}

/// An `image_asset_pointer` part or a `computer_output` screenshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImagePointer {
    #[serde(default, deserialize_with = "lenient")]
    pub content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub asset_pointer: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub width: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub height: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub size_bytes: Option<u64>,
}

// ---------------------------------------------------------------------------
// Archive loading
// ---------------------------------------------------------------------------

/// Locate `conversations.json` inside an export directory. Exports sometimes
/// nest everything inside a single hash-named subdirectory, so one level of
/// children is searched as well.
pub fn find_conversations_json(export_dir: &Path) -> Result<PathBuf> {
    let direct = export_dir.join(CONVERSATIONS_FILE);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut children: Vec<PathBuf> = fs::read_dir(export_dir)
        .wrap_err_with(|| format!("Failed to read export directory: {}", export_dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();

    children
        .into_iter()
        .map(|d| d.join(CONVERSATIONS_FILE))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            eyre!(
                "{} not found in {} or its subdirectories",
                CONVERSATIONS_FILE,
                export_dir.display()
            )
        })
}

/// Read and deserialize the whole archive.
pub fn load_conversations(path: &Path) -> Result<Vec<RawConversation>> {
    let bytes =
        fs::read(path).wrap_err_with(|| format!("Failed to read archive: {}", path.display()))?;
    parse_archive(&bytes).wrap_err_with(|| format!("Failed to parse archive: {}", path.display()))
}

pub fn parse_archive(bytes: &[u8]) -> Result<Vec<RawConversation>> {
    serde_json::from_slice::<Vec<RawConversation>>(bytes)
        .wrap_err("Archive must be a JSON array of conversation objects")
}
