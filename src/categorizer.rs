//! Assigns manifest entries to projects by asking an external LLM.
//!
//! The actual decisions are made by the model behind an [`Oracle`]; this module
//! only batches conversations, retries failed calls, sanitizes what comes back
//! and runs a second pass over low-confidence assignments.

use std::collections::{HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use eyre::{Context, Result, eyre};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestEntry;
use crate::model::{ContentBlock, Conversation, Role, truncate_chars};

pub const SNIPPET_MAX_CHARS: usize = 500;
const DESCRIPTION_SAMPLES: usize = 8;
const DESCRIPTION_SNIPPET_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Something that answers a text prompt with text.
pub trait Oracle {
    fn ask(&self, prompt: &str) -> Result<String>;
}

/// The `claude` command-line client in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    pub path: PathBuf,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: String,
}

impl ClaudeCli {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Use `explicit` if given, otherwise search `PATH` for an executable
    /// `claude`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        Self::locate_in(explicit, env::var_os("PATH"))
    }

    fn locate_in(explicit: Option<&Path>, search_path: Option<OsString>) -> Result<Self> {
        let path = match explicit {
            Some(p) if p.is_file() => p.to_path_buf(),
            Some(p) => return Err(eyre!("claude CLI not found at {}", p.display())),
            None => {
                let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in("claude", search_path, cwd).map_err(|_| {
                    eyre!(
                        "The 'claude' CLI is required for categorization but was not found in PATH.\n\
                         Install it or set claude_path in config.toml."
                    )
                })?
            }
        };
        Ok(Self {
            path,
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }
}

impl Oracle for ClaudeCli {
    fn ask(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.path)
            .args(["-p", prompt, "--output-format", "json"])
            // Running inside a Claude session would otherwise make the CLI refuse.
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err_with(|| format!("Failed to start {}", self.path.display()))?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().wrap_err("Failed to poll claude CLI")? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(eyre!("claude CLI timed out after {:?}", self.timeout));
            }
            thread::sleep(Duration::from_millis(50));
        };

        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        if !status.success() {
            return Err(eyre!("claude CLI failed ({}): {}", status, stderr.trim()));
        }

        let envelope: Envelope =
            serde_json::from_str(&stdout).wrap_err("claude CLI returned malformed JSON")?;
        Ok(envelope.result)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = stream.read_to_string(&mut buf);
        buf
    })
}

// ---------------------------------------------------------------------------
// Prompt material
// ---------------------------------------------------------------------------

/// Text of the user turns on the active branch, joined and truncated. Used as
/// richer categorization input than the manifest preview.
pub fn conversation_snippet(conv: &Conversation, max_chars: usize) -> String {
    let mut texts: Vec<&str> = Vec::new();
    let mut total = 0usize;
    'outer: for msg in conv.messages.iter().filter(|m| m.role == Role::User) {
        for block in &msg.blocks {
            if let ContentBlock::Text { text } = block {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                texts.push(text);
                total += text.chars().count();
                if total >= max_chars {
                    break 'outer;
                }
            }
        }
    }
    truncate_chars(&texts.join("\n"), max_chars).to_string()
}

/// Remove an optional Markdown code fence (```` ``` ```` or ```` ```json ````)
/// around a model response.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

#[derive(Serialize)]
struct PromptItem<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<&'a str>,
}

pub fn build_prompt(
    projects: &[String],
    entries: &[&ManifestEntry],
    snippets: Option<&HashMap<String, String>>,
    descriptions: Option<&HashMap<String, String>>,
) -> String {
    let project_list = projects
        .iter()
        .map(|p| match descriptions.and_then(|d| d.get(p)) {
            Some(desc) => format!("- {}: {}", p, desc),
            None => format!("- {}", p),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let items: Vec<PromptItem> = entries
        .iter()
        .map(|e| {
            let content = snippets.and_then(|s| s.get(&e.id)).map(String::as_str);
            PromptItem {
                id: &e.id,
                title: &e.title,
                content,
                preview: content.is_none().then_some(e.preview.as_str()),
            }
        })
        .collect();
    let conversations = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".into());

    format!(
        "You are a strict conversation categorizer. Assign each conversation to a project \
only if it is specifically about that project's domain.\n\n\
Allowed project names:\n{project_list}\n\n\
For each conversation give exactly one primary \"project\" (or \"\" when nothing fits), \
optional secondary \"tags\" (other project names, only when clearly relevant), and a \
\"confidence\" from 0 to 100 for the primary assignment. Use 100 when leaving a conversation \
unassigned. Leave general knowledge, shopping, cooking, travel, entertainment and other casual \
conversations unassigned. Never invent project names.\n\n\
Respond with ONLY a JSON array of objects with keys \"id\", \"project\", \"tags\", \"confidence\".\n\n\
Conversations:\n\n{conversations}"
    )
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Sanitized verdict for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryResult {
    pub id: String,
    pub project: String,
    pub tags: Vec<String>,
    pub confidence: u8,
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(default)]
    id: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn ask_json<T: serde::de::DeserializeOwned>(oracle: &dyn Oracle, prompt: &str) -> Result<T> {
    let response = oracle.ask(prompt)?;
    serde_json::from_str(strip_code_fence(&response)).wrap_err("Response is not the expected JSON")
}

/// Categorize one batch with a single prompt, retrying up to `max_retries`
/// times. An exhausted batch yields no results rather than an error.
pub fn categorize_batch(
    oracle: &dyn Oracle,
    entries: &[&ManifestEntry],
    projects: &[String],
    snippets: Option<&HashMap<String, String>>,
    descriptions: Option<&HashMap<String, String>>,
    max_retries: usize,
) -> Vec<CategoryResult> {
    let prompt = build_prompt(projects, entries, snippets, descriptions);

    let mut verdicts: Option<Vec<RawVerdict>> = None;
    for attempt in 0..=max_retries {
        match ask_json::<Vec<RawVerdict>>(oracle, &prompt) {
            Ok(v) => {
                verdicts = Some(v);
                break;
            }
            Err(e) => log::warn!(
                "Categorization attempt {}/{} failed: {:#}",
                attempt + 1,
                max_retries + 1,
                e
            ),
        }
    }
    let Some(verdicts) = verdicts else {
        log::warn!("Skipping a batch of {} conversations", entries.len());
        return Vec::new();
    };

    let known: HashSet<&str> = projects.iter().map(String::as_str).collect();
    let batch_ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();

    verdicts
        .into_iter()
        .filter(|v| batch_ids.contains(v.id.as_str()))
        .map(|v| {
            let project = if known.contains(v.project.as_str()) {
                v.project
            } else {
                String::new()
            };
            let tags = v
                .tags
                .into_iter()
                .filter(|t| known.contains(t.as_str()) && *t != project)
                .collect();
            let confidence = v.confidence.unwrap_or(100.0).clamp(0.0, 100.0) as u8;
            CategoryResult {
                id: v.id,
                project,
                tags,
                confidence,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct DescriptionSample<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<&'a str>,
}

/// Ask the oracle to describe each project from a sample of the
/// conversations already assigned to it.
pub fn generate_project_descriptions(
    oracle: &dyn Oracle,
    projects: &[String],
    entries: &[ManifestEntry],
    snippets: Option<&HashMap<String, String>>,
) -> Result<HashMap<String, String>> {
    let mut samples: HashMap<&str, Vec<DescriptionSample>> =
        projects.iter().map(|p| (p.as_str(), Vec::new())).collect();

    for e in entries {
        let Some(bucket) = samples.get_mut(e.project.as_str()) else {
            continue;
        };
        if bucket.len() >= DESCRIPTION_SAMPLES {
            continue;
        }
        let content = snippets
            .and_then(|s| s.get(&e.id))
            .map(|s| truncate_chars(s, DESCRIPTION_SNIPPET_CHARS));
        let preview = (content.is_none() && !e.preview.is_empty()).then_some(e.preview.as_str());
        bucket.push(DescriptionSample {
            title: &e.title,
            content,
            preview,
        });
    }

    let payload = serde_json::to_string_pretty(&samples).wrap_err("Failed to encode samples")?;
    let prompt = format!(
        "Below are project names and sample conversations assigned to each project. \
Write a 1-2 sentence description of what each project is actually about, based on the \
conversation content.\n\n{payload}\n\n\
Respond with ONLY a JSON object mapping each project name to its description string."
    );
    ask_json(oracle, &prompt)
}

// ---------------------------------------------------------------------------
// Whole-manifest run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CategorizeOptions {
    pub force: bool,
    pub batch_size: usize,
    pub review_threshold: u8,
    pub max_retries: usize,
}

impl Default for CategorizeOptions {
    fn default() -> Self {
        Self {
            force: false,
            batch_size: 15,
            review_threshold: 80,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategorizeSummary {
    pub categorized: usize,
    /// Assignments still below the review threshold after the second pass,
    /// least confident first.
    pub needs_review: Vec<CategoryResult>,
}

/// Entries a run would send to the oracle.
pub fn pending_entries<'a>(entries: &'a [ManifestEntry], force: bool) -> Vec<&'a ManifestEntry> {
    entries
        .iter()
        .filter(|e| force || e.project.is_empty())
        .collect()
}

fn descriptions_or_none(
    oracle: &dyn Oracle,
    projects: &[String],
    entries: &[ManifestEntry],
    snippets: Option<&HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    if !entries.iter().any(|e| !e.project.is_empty()) {
        return None;
    }
    match generate_project_descriptions(oracle, projects, entries, snippets) {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("Could not generate project descriptions: {:#}", e);
            None
        }
    }
}

/// Run the batches over `ids`, apply the verdicts to `entries` and return
/// `(assigned, uncertain)`.
fn run_pass(
    oracle: &dyn Oracle,
    entries: &mut [ManifestEntry],
    ids: &[String],
    projects: &[String],
    snippets: Option<&HashMap<String, String>>,
    descriptions: Option<&HashMap<String, String>>,
    options: &CategorizeOptions,
    pb: &ProgressBar,
) -> (usize, Vec<CategoryResult>) {
    let mut assigned = 0usize;
    let mut uncertain = Vec::new();

    for chunk in ids.chunks(options.batch_size.max(1)) {
        let results = {
            let batch: Vec<&ManifestEntry> = entries
                .iter()
                .filter(|e| chunk.contains(&e.id))
                .collect();
            categorize_batch(oracle, &batch, projects, snippets, descriptions, options.max_retries)
        };

        for result in results {
            let Some(entry) = entries.iter_mut().find(|e| e.id == result.id) else {
                continue;
            };
            entry.project = result.project.clone();
            entry.tags = result.tags.clone();
            if !result.project.is_empty() {
                assigned += 1;
                if result.confidence < options.review_threshold {
                    uncertain.push(result);
                }
            }
        }
        pb.inc(1);
    }
    (assigned, uncertain)
}

/// Categorize the entries in place.
///
/// Existing assignments seed project descriptions for better context. Any
/// assignment below `review_threshold` is cleared and asked again with
/// descriptions rebuilt from the first pass; what is still uncertain after
/// that is reported for manual review.
pub fn categorize_entries(
    entries: &mut [ManifestEntry],
    projects: &[String],
    options: &CategorizeOptions,
    snippets: Option<&HashMap<String, String>>,
    oracle: &dyn Oracle,
    pb: &ProgressBar,
) -> CategorizeSummary {
    let ids: Vec<String> = pending_entries(entries, options.force)
        .into_iter()
        .map(|e| e.id.clone())
        .collect();
    if ids.is_empty() {
        return CategorizeSummary::default();
    }

    pb.set_message("Generating project descriptions...");
    let descriptions = descriptions_or_none(oracle, projects, entries, snippets);

    let batch_size = options.batch_size.max(1);
    pb.set_length(ids.len().div_ceil(batch_size) as u64);
    pb.set_position(0);
    pb.set_message("Categorizing...");
    let (mut categorized, low_confidence) = run_pass(
        oracle,
        entries,
        &ids,
        projects,
        snippets,
        descriptions.as_ref(),
        options,
        pb,
    );

    if low_confidence.is_empty() {
        return CategorizeSummary {
            categorized,
            needs_review: Vec::new(),
        };
    }

    pb.set_message("Re-evaluating low-confidence assignments...");
    let review_descriptions =
        descriptions_or_none(oracle, projects, entries, snippets).or(descriptions);

    let review_ids: Vec<String> = low_confidence.iter().map(|r| r.id.clone()).collect();
    for entry in entries.iter_mut().filter(|e| review_ids.contains(&e.id)) {
        entry.project.clear();
        entry.tags.clear();
    }
    categorized -= review_ids.len();

    pb.inc_length(review_ids.len().div_ceil(batch_size) as u64);
    let (reassigned, mut still_uncertain) = run_pass(
        oracle,
        entries,
        &review_ids,
        projects,
        snippets,
        review_descriptions.as_ref(),
        options,
        pb,
    );
    categorized += reassigned;
    still_uncertain.sort_by_key(|r| r.confidence);

    CategorizeSummary {
        categorized,
        needs_review: still_uncertain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[cfg(unix)]
    #[test]
    fn locate_skips_non_executable_candidates() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let first = tempfile::TempDir::new().unwrap();
        let second = tempfile::TempDir::new().unwrap();
        let plain = first.path().join("claude");
        fs::write(&plain, "not a program").unwrap();
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644)).unwrap();
        let runnable = second.path().join("claude");
        fs::write(&runnable, "#!/bin/sh\necho '{}'\n").unwrap();
        fs::set_permissions(&runnable, fs::Permissions::from_mode(0o755)).unwrap();

        let search = env::join_paths([first.path(), second.path()]).unwrap();
        let cli = ClaudeCli::locate_in(None, Some(search)).unwrap();
        assert_eq!(cli.path, runnable);
    }

    #[test]
    fn locate_reports_missing_cli() {
        let empty = tempfile::TempDir::new().unwrap();
        let search = env::join_paths([empty.path()]).unwrap();
        assert!(ClaudeCli::locate_in(None, Some(search)).is_err());
        assert!(ClaudeCli::locate_in(Some(&empty.path().join("nope")), None).is_err());
    }

    /// Replays canned responses in order; errors once they run out.
    struct Scripted {
        responses: RefCell<Vec<Result<String>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: RefCell::new(responses.into_iter().rev().collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Oracle for Scripted {
        fn ask(&self, prompt: &str) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.responses
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Err(eyre!("no more responses")))
        }
    }

    fn entry(id: &str, project: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.into(),
            title: format!("title {}", id),
            created: "2024-01-01 00:00".into(),
            updated: "2024-01-01 00:00".into(),
            messages: 1,
            model: String::new(),
            preview: format!("preview {}", id),
            project: project.into(),
            tags: vec![],
            include: true,
        }
    }

    fn projects() -> Vec<String> {
        vec!["Garden".into(), "Rust".into()]
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  [2] "), "[2]");
        assert_eq!(strip_code_fence("```unterminated"), "```unterminated");
    }

    #[test]
    fn batch_sanitizes_verdicts() {
        let oracle = Scripted::new(vec![Ok(r#"```json
[
  {"id": "a", "project": "Rust", "tags": ["Garden", "Rust", "Bogus"], "confidence": 140},
  {"id": "b", "project": "Invented", "tags": [], "confidence": -3},
  {"id": "zzz", "project": "Rust"},
  {"id": "c", "project": "Garden"}
]
```"#
            .into())]);
        let (a, b, c) = (entry("a", ""), entry("b", ""), entry("c", ""));
        let results = categorize_batch(&oracle, &[&a, &b, &c], &projects(), None, None, 0);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].project, "Rust");
        assert_eq!(results[0].tags, vec!["Garden".to_string()]);
        assert_eq!(results[0].confidence, 100);
        assert_eq!(results[1].project, "");
        assert_eq!(results[1].confidence, 0);
        assert_eq!(results[2].confidence, 100);
    }

    #[test]
    fn batch_retries_then_gives_up() {
        let oracle = Scripted::new(vec![Err(eyre!("boom")), Ok("not json".into()), Ok("[]".into())]);
        let a = entry("a", "");
        assert!(categorize_batch(&oracle, &[&a], &projects(), None, None, 2).is_empty());
        assert_eq!(oracle.prompts.borrow().len(), 3);

        let oracle = Scripted::new(vec![Err(eyre!("boom")), Err(eyre!("boom"))]);
        assert!(categorize_batch(&oracle, &[&a], &projects(), None, None, 1).is_empty());
        assert_eq!(oracle.prompts.borrow().len(), 2);
    }

    #[test]
    fn prompt_prefers_snippets_over_previews() {
        let a = entry("a", "");
        let b = entry("b", "");
        let snippets = HashMap::from([("a".to_string(), "full text of a".to_string())]);
        let descriptions = HashMap::from([("Rust".to_string(), "Programming in Rust".to_string())]);
        let prompt = build_prompt(&projects(), &[&a, &b], Some(&snippets), Some(&descriptions));
        assert!(prompt.contains("full text of a"));
        assert!(!prompt.contains("preview a"));
        assert!(prompt.contains("preview b"));
        assert!(prompt.contains("- Rust: Programming in Rust"));
        assert!(prompt.contains("- Garden\n"));
    }

    #[test]
    fn low_confidence_gets_a_second_pass() {
        let oracle = Scripted::new(vec![
            Ok(r#"[{"id": "a", "project": "Rust", "confidence": 95},
                   {"id": "b", "project": "Garden", "confidence": 40},
                   {"id": "c", "project": "", "confidence": 100}]"#
                .into()),
            Ok(r#"{"Rust": "Rust work", "Garden": "Plants"}"#.into()),
            Ok(r#"[{"id": "b", "project": "Garden", "confidence": 60}]"#.into()),
        ]);
        let mut entries = vec![entry("a", ""), entry("b", ""), entry("c", "")];
        let summary = categorize_entries(
            &mut entries,
            &projects(),
            &CategorizeOptions::default(),
            None,
            &oracle,
            &ProgressBar::hidden(),
        );

        assert_eq!(summary.categorized, 2);
        assert_eq!(summary.needs_review.len(), 1);
        assert_eq!(summary.needs_review[0].id, "b");
        assert_eq!(entries[0].project, "Rust");
        assert_eq!(entries[1].project, "Garden");
        assert_eq!(entries[2].project, "");
        // the re-ask carried the generated descriptions
        assert!(oracle.prompts.borrow()[2].contains("- Garden: Plants"));
    }

    #[test]
    fn already_categorized_entries_are_left_alone() {
        let oracle = Scripted::new(vec![]);
        let mut entries = vec![entry("a", "Rust")];
        let summary = categorize_entries(
            &mut entries,
            &projects(),
            &CategorizeOptions::default(),
            None,
            &oracle,
            &ProgressBar::hidden(),
        );
        assert_eq!(summary.categorized, 0);
        assert!(oracle.prompts.borrow().is_empty());
        assert_eq!(pending_entries(&entries, true).len(), 1);
    }

    #[test]
    fn snippets_come_from_user_text() {
        use crate::model::Message;
        let msg = |role, text: &str| Message {
            id: "m".into(),
            role,
            content_type: "text".into(),
            blocks: vec![ContentBlock::Text { text: text.into() }],
            create_time: None,
            model_slug: String::new(),
            weight: 1.0,
        };
        let conv = Conversation {
            id: "c".into(),
            title: "t".into(),
            create_time: None,
            update_time: None,
            model_slug: String::new(),
            messages: vec![
                msg(Role::User, " first "),
                msg(Role::Assistant, "ignored"),
                msg(Role::User, "second"),
            ],
            first_user_message: "first".into(),
        };
        assert_eq!(conversation_snippet(&conv, 500), "first\nsecond");
        assert_eq!(conversation_snippet(&conv, 3), "fir");
    }
}
