use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Output document format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Pdf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => ".md",
            OutputFormat::Pdf => ".pdf",
        }
    }
}

/// Configuration required to run the generate step.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone)]
pub struct GenerateConfig {
    pub export_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub include_thoughts: bool,
    pub pdf_command: String,
    pub force: bool,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Created,
    Updated,
    Skipped,
}

#[derive(Clone, Debug)]
pub struct FileFrontmatter {
    pub id: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub include_thoughts: bool,
}

/// Read the YAML frontmatter from an existing .md file and extract relevant fields.
pub fn parse_existing_frontmatter(path: &Path) -> Option<FileFrontmatter> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let first = lines.next()?.ok()?;
    if first.trim() != "---" {
        return None;
    }

    let mut id: Option<String> = None;
    let mut updated: Option<DateTime<Utc>> = None;
    let mut include_thoughts = false;
    let mut bytes_read = 0usize;

    for line in lines {
        let line = line.ok()?;
        bytes_read += line.len() + 1;
        if bytes_read > 4096 || line.trim() == "---" {
            break;
        }
        if let Some(rest) = line.strip_prefix("id:") {
            id = Some(unquote(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("updated:") {
            updated = DateTime::parse_from_rfc3339(unquote(rest))
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        } else if let Some(rest) = line.strip_prefix("include_thoughts:") {
            include_thoughts = rest.trim() == "true";
        }
    }
    Some(FileFrontmatter {
        id,
        updated,
        include_thoughts,
    })
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('\'').trim_matches('"')
}
