use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::images::ImageIndex;
use crate::model::{ContentBlock, Conversation, ImageRef, Message, Role};

pub const SLUG_MAX_CHARS: usize = 60;
pub const ASSETS_DIR: &str = "assets";

/// Filesystem-safe slug of a conversation title: ASCII, lowercase,
/// punctuation dropped, underscores kept, runs of spaces and hyphens collapsed
/// to one hyphen, at most 60 characters.
pub fn slugify_title(title: &str) -> String {
    let mut kept = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            kept.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_whitespace() {
            kept.push(' ');
        } else if !c.is_ascii() && c.is_alphanumeric() {
            // é -> e
            kept.push_str(&slug::slugify(c.to_string()).replace('-', ""));
        }
    }
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("-");
    // ASCII-only by now, so byte == char
    let slug = joined[..joined.len().min(SLUG_MAX_CHARS)].trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// `{slug}_{id8}{ext}`, e.g. `rust-lifetimes_6750a1b2.md`.
pub fn output_filename(conv: &Conversation, ext: &str) -> String {
    let id_prefix = if conv.id.is_empty() {
        "00000000"
    } else {
        conv.short_id()
    };
    format!("{}_{}{}", slugify_title(&conv.title), id_prefix, ext)
}

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "ChatGPT",
        Role::System => "System",
        Role::Tool => "Tool",
        Role::Unknown => "Unknown",
    }
}

pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// An image file to be written next to a rendered document.
pub struct Asset {
    pub name: String,
    pub data: Vec<u8>,
}

/// Content-addressed file name for an image: the first 16 hex digits of its
/// SHA-256 plus the source extension, or a sniffed one when the source has
/// none.
pub fn asset_name(source: &Path, data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .or_else(|| infer::get(data).map(|t| t.extension().to_string()))
        .unwrap_or_else(|| "bin".to_string());
    format!("{}.{}", hex, ext)
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    model: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    project: &'a str,
    include_thoughts: bool,
}

/// Options that change what a rendered document contains.
#[derive(Clone, Copy)]
pub struct RenderOptions<'a> {
    pub project: &'a str,
    pub include_thoughts: bool,
}

/// Write `conv` as Markdown. `messages` are the already filtered messages to
/// show. Returns the images the document links to under `assets/`; the caller
/// writes them.
pub fn write_conversation_markdown<W: Write>(
    writer: &mut W,
    conv: &Conversation,
    messages: &[Message],
    images: &ImageIndex,
    options: RenderOptions<'_>,
) -> std::io::Result<Vec<Asset>> {
    let fm = Frontmatter {
        title: &conv.title,
        id: &conv.id,
        created: conv.create_time,
        updated: conv.update_time,
        model: &conv.model_slug,
        project: options.project,
        include_thoughts: options.include_thoughts,
    };

    writeln!(writer, "---")?;
    let yaml = serde_yaml::to_string(&fm).map_err(std::io::Error::other)?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "---")?;
    writeln!(writer)?;
    writeln!(writer, "# {}", conv.title)?;
    writeln!(writer)?;

    let mut assets = Vec::new();
    for msg in messages {
        writeln!(writer, "## {}", role_label(msg.role))?;
        writeln!(writer)?;
        for block in &msg.blocks {
            write_block(writer, block, images, &mut assets)?;
            writeln!(writer)?;
        }
    }

    Ok(assets)
}

fn write_images<W: Write>(
    writer: &mut W,
    refs: &[ImageRef],
    images: &ImageIndex,
    assets: &mut Vec<Asset>,
    alt: &str,
) -> std::io::Result<()> {
    for img in refs {
        let data = images.resolve_ref(img).and_then(|p| {
            fs::read(p)
                .inspect_err(|e| log::warn!("Could not read image {}: {}", p.display(), e))
                .ok()
                .map(|data| (p, data))
        });
        match data {
            Some((path, data)) => {
                let name = asset_name(path, &data);
                writeln!(writer, "![{}]({}/{})", alt, ASSETS_DIR, name)?;
                if !assets.iter().any(|a: &Asset| a.name == name) {
                    assets.push(Asset { name, data });
                }
            }
            None => {
                log::debug!("Unresolved image pointer {}", img.asset_pointer);
                writeln!(writer, "*[Image not available in export]*")?;
            }
        }
    }
    Ok(())
}

fn write_quoted<W: Write>(writer: &mut W, text: &str) -> std::io::Result<()> {
    for line in text.lines() {
        if line.is_empty() {
            writeln!(writer, ">")?;
        } else {
            writeln!(writer, "> {}", line)?;
        }
    }
    Ok(())
}

/// Pick a fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn write_block<W: Write>(
    writer: &mut W,
    block: &ContentBlock,
    images: &ImageIndex,
    assets: &mut Vec<Asset>,
) -> std::io::Result<()> {
    match block {
        ContentBlock::Text { text } | ContentBlock::Other { text, .. } => {
            writeln!(writer, "{}", text.trim_end())?;
        }
        ContentBlock::Code { text, language } => {
            let fence = fence_for(text);
            writeln!(writer, "{}{}", fence, language)?;
            writeln!(writer, "{}", text.trim_end_matches('\n'))?;
            writeln!(writer, "{}", fence)?;
        }
        ContentBlock::Image { refs } => {
            write_images(writer, refs, images, assets, "image")?;
        }
        ContentBlock::Thought { text, summary } => {
            writeln!(writer, "<details>")?;
            writeln!(
                writer,
                "<summary>{}</summary>",
                summary.as_deref().unwrap_or("Thinking")
            )?;
            writeln!(writer)?;
            writeln!(writer, "{}", text.trim_end())?;
            writeln!(writer)?;
            writeln!(writer, "</details>")?;
        }
        ContentBlock::ReasoningRecap { text } | ContentBlock::TetherBrowsing { text } => {
            writeln!(writer, "*{}*", text.trim())?;
        }
        ContentBlock::ExecutionOutput { text } => {
            let fence = fence_for(text);
            writeln!(writer, "**Output:**")?;
            writeln!(writer)?;
            writeln!(writer, "{}", fence)?;
            writeln!(writer, "{}", text.trim_end_matches('\n'))?;
            writeln!(writer, "{}", fence)?;
        }
        ContentBlock::TetherQuote { text, url, domain } => {
            if !text.trim().is_empty() {
                write_quoted(writer, text.trim_end())?;
            }
            let source = domain.as_deref().or(url.as_deref());
            match (source, url) {
                (Some(label), Some(url)) => writeln!(writer, "> Source: [{}]({})", label, url)?,
                (Some(label), None) => writeln!(writer, "> Source: {}", label)?,
                _ => {}
            }
        }
        ContentBlock::ComputerOutput { text, refs } => {
            writeln!(writer, "*{}*", text)?;
            if !refs.is_empty() {
                writeln!(writer)?;
                write_images(writer, refs, images, assets, "screenshot")?;
            }
        }
        ContentBlock::SystemError { text } => {
            writeln!(writer, "> **{}**", text)?;
        }
    }
    Ok(())
}
