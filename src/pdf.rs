//! PDF output: each conversation becomes a self-contained HTML page (images
//! inlined as data URIs) which an external HTML-to-PDF converter turns into
//! the final document.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use eyre::{Context, Result, eyre};
use pulldown_cmark::{Options, Parser, html};

use crate::images::ImageIndex;
use crate::model::{ContentBlock, Conversation, ImageRef, Message};
use crate::renderer::{format_timestamp, role_label};

pub const DEFAULT_PDF_COMMAND: &str = "weasyprint";

const STYLESHEET: &str = r#"
body { font-family: sans-serif; font-size: 11pt; line-height: 1.45; margin: 0 1.5em; }
h1 { font-size: 18pt; margin-bottom: 0.2em; }
.meta { color: #666; font-size: 9pt; margin-bottom: 2em; }
.message { margin-bottom: 1.5em; }
.role { font-weight: bold; margin-bottom: 0.4em; }
.role-user { color: #1a5fb4; }
.role-assistant { color: #26a269; }
pre { background: #f6f8fa; padding: 0.6em; white-space: pre-wrap; word-wrap: break-word; font-size: 9pt; }
blockquote { border-left: 3px solid #ccc; margin-left: 0; padding-left: 1em; color: #444; }
.thoughts { border: 1px dashed #bbb; padding: 0.5em; color: #555; }
.thought-summary { font-weight: bold; }
.system-error { color: #c01c28; }
.image-unavailable { color: #999; font-style: italic; }
img { max-width: 100%; }
"#;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}

/// `data:` URI for a resolved image, or `None` if it cannot be read.
fn image_data_uri(img: &ImageRef, images: &ImageIndex) -> Option<String> {
    let path = images.resolve_ref(img)?;
    let data = fs::read(path)
        .inspect_err(|e| log::warn!("Could not read image {}: {}", path.display(), e))
        .ok()?;
    let mime = infer::get(&data)
        .map(|t| t.mime_type())
        .or_else(|| mime_from_extension(path))?;
    Some(format!("data:{};base64,{}", mime, STANDARD.encode(&data)))
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => return None,
    })
}

fn block_html(block: &ContentBlock, images: &ImageIndex) -> String {
    match block {
        ContentBlock::Text { text } => markdown_to_html(text),
        ContentBlock::Image { refs } => refs
            .iter()
            .map(|img| match image_data_uri(img, images) {
                Some(uri) => format!(r#"<img src="{}" alt="image">"#, uri),
                None => r#"<div class="image-unavailable">Image not available in export</div>"#
                    .to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ContentBlock::Code { text, language } => format!(
            r#"<pre><code class="language-{}">{}</code></pre>"#,
            escape_html(language),
            escape_html(text)
        ),
        ContentBlock::Thought { text, summary } => {
            let summary_html = summary
                .as_deref()
                .map(|s| format!(r#"<div class="thought-summary">{}</div>"#, escape_html(s)))
                .unwrap_or_default();
            format!(
                r#"<div class="thoughts">{}{}</div>"#,
                summary_html,
                markdown_to_html(text)
            )
        }
        ContentBlock::ReasoningRecap { text } | ContentBlock::TetherBrowsing { text } => {
            format!("<p><em>{}</em></p>", escape_html(text.trim()))
        }
        ContentBlock::ExecutionOutput { text } => format!("<pre>{}</pre>", escape_html(text)),
        ContentBlock::TetherQuote { text, domain, .. } => {
            let source = domain
                .as_deref()
                .map(|d| format!("<footer>{}</footer>", escape_html(d)))
                .unwrap_or_default();
            format!("<blockquote>{}{}</blockquote>", markdown_to_html(text), source)
        }
        ContentBlock::ComputerOutput { text, refs } => {
            let mut parts = vec![format!("<p><em>{}</em></p>", escape_html(text))];
            parts.extend(refs.iter().filter_map(|img| {
                image_data_uri(img, images).map(|uri| format!(r#"<img src="{}" alt="screenshot">"#, uri))
            }));
            parts.join("\n")
        }
        ContentBlock::SystemError { text } => {
            format!(r#"<p class="system-error">{}</p>"#, escape_html(text))
        }
        ContentBlock::Other { text, .. } => format!("<p>{}</p>", escape_html(text)),
    }
}

/// Build the full HTML document for a conversation.
pub fn conversation_html(conv: &Conversation, messages: &[Message], images: &ImageIndex) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", escape_html(&conv.title)));
    out.push_str(&format!("<style>{}</style>\n", STYLESHEET));
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(&conv.title)));

    let meta: Vec<String> = [format_timestamp(conv.create_time), conv.model_slug.clone()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| escape_html(&s))
        .collect();
    if !meta.is_empty() {
        out.push_str(&format!("<div class=\"meta\">{}</div>\n", meta.join(" · ")));
    }

    for msg in messages {
        out.push_str(&format!(
            "<div class=\"message role-{}\">\n<div class=\"role role-{}\">{}</div>\n",
            msg.role.as_str(),
            msg.role.as_str(),
            role_label(msg.role)
        ));
        for block in &msg.blocks {
            out.push_str(&block_html(block, images));
            out.push('\n');
        }
        out.push_str("</div>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Render `conv` to `pdf_path` by writing its HTML to a temporary file and
/// running `command <html> <pdf>`.
pub fn render_pdf(
    conv: &Conversation,
    messages: &[Message],
    images: &ImageIndex,
    command: &str,
    pdf_path: &Path,
) -> Result<()> {
    let html = conversation_html(conv, messages, images);

    let mut tmp = tempfile::Builder::new()
        .suffix(".html")
        .tempfile()
        .wrap_err("Failed to create temporary HTML file")?;
    tmp.write_all(html.as_bytes())
        .wrap_err("Failed to write temporary HTML file")?;
    tmp.flush()?;

    let output = Command::new(command)
        .arg(tmp.path())
        .arg(pdf_path)
        .output()
        .wrap_err_with(|| format!("Failed to run PDF converter '{}'", command))?;

    if !output.status.success() {
        return Err(eyre!(
            "PDF converter '{}' failed ({}): {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
