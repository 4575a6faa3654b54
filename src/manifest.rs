//! The manifest: a YAML file listing every conversation of the export with
//! the user-editable fields that drive generation (`project`, `tags`,
//! `include`).
//!
//! `scan` rewrites the metadata on every run but keeps whatever the user (or
//! the categorizer) put into the editable fields.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{Conversation, truncate_chars};

pub const MANIFEST_VERSION: u32 = 1;
pub const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// `%Y-%m-%d %H:%M` in UTC, or `unknown`.
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub messages: usize,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "default_include")]
    pub include: bool,
}

fn default_include() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    #[serde(default)]
    pub conversations: Vec<ManifestEntry>,
}

fn default_version() -> u32 {
    MANIFEST_VERSION
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            projects: Vec::new(),
            conversations: Vec::new(),
        }
    }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ManifestEntry {
    /// A fresh entry: included, no project, no tags.
    pub fn from_conversation(conv: &Conversation) -> Self {
        Self {
            id: conv.id.clone(),
            title: conv.title.clone(),
            created: format_time(conv.create_time),
            updated: format_time(conv.update_time),
            messages: conv.message_count(),
            model: conv.model_slug.clone(),
            preview: truncate_chars(&conv.first_user_message, PREVIEW_CHARS).to_string(),
            project: String::new(),
            tags: Vec::new(),
            include: true,
        }
    }
}

impl Manifest {
    pub fn included(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.conversations.iter().filter(|e| e.include)
    }
}

/// Combine a fresh scan with a previous manifest. Metadata comes from the
/// scan; `project`, `tags` and `include` come from the previous entry with the
/// same id. Conversations that disappeared from the export are dropped.
pub fn merge_entries(existing: &[ManifestEntry], fresh: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    let by_id: HashMap<&str, &ManifestEntry> =
        existing.iter().map(|e| (e.id.as_str(), e)).collect();

    fresh
        .into_iter()
        .map(|mut entry| {
            if let Some(old) = by_id.get(entry.id.as_str()) {
                entry.project = old.project.clone();
                entry.tags = old.tags.clone();
                entry.include = old.include;
            }
            entry
        })
        .collect()
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read manifest: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Manifest::default());
    }
    serde_yaml::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse manifest: {}", path.display()))
}

/// Write the manifest, newest conversations first.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let mut sorted = manifest.clone();
    sorted
        .conversations
        .sort_by(|a, b| b.created.cmp(&a.created));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(&sorted).wrap_err("Failed to serialize manifest")?;
    fs::write(path, yaml).wrap_err_with(|| format!("Failed to write manifest: {}", path.display()))
}
