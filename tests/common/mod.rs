//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tempfile::TempDir;

/// Builder for one conversation record of `conversations.json`.
pub struct ConversationBuilder {
    id: String,
    title: String,
    create_time: f64,
    update_time: f64,
    model: Option<String>,
    nodes: Vec<(String, Option<String>, Option<Value>)>,
    current: Option<String>,
}

impl ConversationBuilder {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            create_time: 1_700_000_000.0,
            update_time: 1_700_000_100.0,
            model: None,
            nodes: vec![("root".to_string(), None, None)],
            current: None,
        }
    }

    pub fn times(mut self, create: f64, update: f64) -> Self {
        self.create_time = create;
        self.update_time = update;
        self
    }

    pub fn model(mut self, slug: &str) -> Self {
        self.model = Some(slug.to_string());
        self
    }

    /// Add a node with a `text` message under `parent`.
    pub fn text(self, node: &str, parent: &str, role: &str, text: &str) -> Self {
        self.node(
            node,
            parent,
            role,
            json!({"content_type": "text", "parts": [text]}),
        )
    }

    /// Add a node with arbitrary message content under `parent`.
    pub fn node(mut self, node: &str, parent: &str, role: &str, content: Value) -> Self {
        let message = json!({
            "id": format!("msg-{node}"),
            "author": {"role": role},
            "content": content,
            "create_time": self.create_time,
        });
        self.nodes
            .push((node.to_string(), Some(parent.to_string()), Some(message)));
        self.current = Some(node.to_string());
        self
    }

    /// Override the active leaf (defaults to the last node added).
    pub fn current(mut self, node: &str) -> Self {
        self.current = Some(node.to_string());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut mapping = serde_json::Map::new();
        for (id, parent, message) in &self.nodes {
            let children: Vec<&str> = self
                .nodes
                .iter()
                .filter(|(_, p, _)| p.as_deref() == Some(id.as_str()))
                .map(|(c, _, _)| c.as_str())
                .collect();
            mapping.insert(
                id.clone(),
                json!({"id": id, "parent": parent, "children": children, "message": message}),
            );
        }
        json!({
            "conversation_id": self.id,
            "title": self.title,
            "create_time": self.create_time,
            "update_time": self.update_time,
            "default_model_slug": self.model,
            "current_node": self.current,
            "mapping": mapping,
        })
    }
}

/// Builder for an unzipped export directory.
pub struct ExportBuilder {
    temp_dir: TempDir,
    conversations: Vec<Value>,
}

impl ExportBuilder {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            temp_dir,
            conversations: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn with_conversation(mut self, conv: ConversationBuilder) -> Self {
        self.conversations.push(conv.to_json());
        self
    }

    /// Write a file (e.g. an image) relative to the export root.
    pub fn with_file(self, relative: &str, data: &[u8]) -> Self {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, data).expect("Failed to write file");
        self
    }

    /// Write `conversations.json` and return the directory.
    pub fn build(self) -> TempDir {
        let body = serde_json::to_string_pretty(&self.conversations)
            .expect("Failed to encode conversations");
        fs::write(self.temp_dir.path().join("conversations.json"), body)
            .expect("Failed to write conversations.json");
        self.temp_dir
    }
}

/// A tiny but valid PNG header, enough for type sniffing.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";
