//! Turns one message's raw content payload into typed [`ContentBlock`]s.
//!
//! Every rule either produces blocks or produces nothing; producing nothing is
//! the normal outcome for blank or scaffolding content, not an error.

use url::Url;

use crate::images::ASSET_SCHEME;
use crate::importer::{RawContent, RawImagePointer};
use crate::model::{ContentBlock, ImageRef};

const SCREENSHOT_MAYBE: &str = "[Computer use screenshot, may not be available in export]";
const SCREENSHOT_MISSING: &str = "[Computer use screenshot, not available in export]";

/// Every content type the exporter emits that gets its own treatment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    MultimodalText,
    Code,
    Thoughts,
    ReasoningRecap,
    ExecutionOutput,
    TetherQuote,
    TetherBrowsingDisplay,
    ComputerOutput,
    SystemError,
    UserEditableContext,
    Unrecognized(String),
}

impl ContentKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => ContentKind::Text,
            "multimodal_text" => ContentKind::MultimodalText,
            "code" => ContentKind::Code,
            "thoughts" => ContentKind::Thoughts,
            "reasoning_recap" => ContentKind::ReasoningRecap,
            "execution_output" => ContentKind::ExecutionOutput,
            "tether_quote" => ContentKind::TetherQuote,
            "tether_browsing_display" => ContentKind::TetherBrowsingDisplay,
            "computer_output" => ContentKind::ComputerOutput,
            "system_error" => ContentKind::SystemError,
            "user_editable_context" => ContentKind::UserEditableContext,
            other => ContentKind::Unrecognized(other.to_string()),
        }
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.filter(|t| !is_blank(t)).map(str::to_string)
}

fn image_ref(pointer: &RawImagePointer) -> ImageRef {
    let mut img = ImageRef::new(pointer.asset_pointer.clone().unwrap_or_default());
    img.width = pointer.width;
    img.height = pointer.height;
    img.size_bytes = pointer.size_bytes;
    if let Some(ct) = &pointer.content_type {
        img.content_type = ct.clone();
    }
    img
}

/// Normalize one content payload. The result may be empty.
pub fn normalize(content: &RawContent) -> Vec<ContentBlock> {
    match ContentKind::from_tag(content.content_type()) {
        ContentKind::Text => {
            let text = content.joined_string_parts();
            if is_blank(&text) {
                return vec![];
            }
            vec![ContentBlock::Text { text }]
        }

        ContentKind::MultimodalText => content.parts.iter().filter_map(multimodal_part).collect(),

        ContentKind::Code => {
            let Some(text) = non_blank(content.text.as_deref()) else {
                return vec![];
            };
            let language = match content.language.as_deref() {
                None | Some("unknown") => String::new(),
                Some(lang) => lang.to_string(),
            };
            vec![ContentBlock::Code { text, language }]
        }

        ContentKind::Thoughts => content
            .thoughts
            .iter()
            .filter_map(|t| {
                let text = non_blank(t.content.as_deref())?;
                Some(ContentBlock::Thought {
                    text,
                    summary: non_blank(t.summary.as_deref()),
                })
            })
            .collect(),

        ContentKind::ReasoningRecap => non_blank(content.content.as_deref())
            .map(|text| ContentBlock::ReasoningRecap { text })
            .into_iter()
            .collect(),

        ContentKind::ExecutionOutput => non_blank(content.text.as_deref())
            .map(|text| ContentBlock::ExecutionOutput { text })
            .into_iter()
            .collect(),

        // Citation metadata is worth keeping even without quoted text.
        ContentKind::TetherQuote => {
            let url = content.url.clone().filter(|u| !u.is_empty());
            let domain = content
                .domain
                .clone()
                .filter(|d| !d.is_empty())
                .or_else(|| url.as_deref().and_then(host_of));
            vec![ContentBlock::TetherQuote {
                text: content.text.clone().unwrap_or_default(),
                url,
                domain,
            }]
        }

        ContentKind::TetherBrowsingDisplay => non_blank(content.summary.as_deref())
            .or_else(|| non_blank(content.result.as_deref()))
            .map(|text| ContentBlock::TetherBrowsing { text })
            .into_iter()
            .collect(),

        ContentKind::ComputerOutput => {
            let screenshot = content.screenshot.as_ref().filter(|s| {
                s.asset_pointer
                    .as_deref()
                    .is_some_and(|p| p.starts_with(ASSET_SCHEME))
            });
            let block = match screenshot {
                Some(s) => ContentBlock::ComputerOutput {
                    text: SCREENSHOT_MAYBE.to_string(),
                    refs: vec![image_ref(s)],
                },
                None => ContentBlock::ComputerOutput {
                    text: SCREENSHOT_MISSING.to_string(),
                    refs: vec![],
                },
            };
            vec![block]
        }

        ContentKind::SystemError => {
            let name = content.name.as_deref().unwrap_or("Error");
            let text = content.text.as_deref().unwrap_or("");
            vec![ContentBlock::SystemError {
                text: format!("{}: {}", name, text),
            }]
        }

        ContentKind::UserEditableContext => vec![],

        ContentKind::Unrecognized(kind) => {
            let text = if content.parts.is_empty() {
                content.text.clone().unwrap_or_default()
            } else {
                content.joined_string_parts()
            };
            if is_blank(&text) {
                return vec![];
            }
            log::debug!("Keeping unrecognized content type {:?} as plain text", kind);
            vec![ContentBlock::Other { kind, text }]
        }
    }
}

fn multimodal_part(part: &serde_json::Value) -> Option<ContentBlock> {
    match part {
        serde_json::Value::String(s) if !is_blank(s) => {
            Some(ContentBlock::Text { text: s.clone() })
        }
        serde_json::Value::Object(map) => {
            if map.get("content_type").and_then(|v| v.as_str()) != Some("image_asset_pointer") {
                return None;
            }
            let pointer: RawImagePointer = serde_json::from_value(part.clone()).ok()?;
            Some(ContentBlock::Image {
                refs: vec![image_ref(&pointer)],
            })
        }
        _ => None,
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}
