//! The `categorize` command: assign manifest conversations to projects
//! through an [`Oracle`], then walk the user through whatever the oracle was
//! unsure about.

use crate::categorizer::{
    CategorizeOptions, CategorizeSummary, CategoryResult, ClaudeCli, Oracle, SNIPPET_MAX_CHARS,
    categorize_entries, conversation_snippet, pending_entries,
};
use crate::importer::{find_conversations_json, load_conversations};
use crate::manifest::{Manifest, read_manifest, write_manifest};
use crate::model::{short_id, truncate_chars};
use crate::parser::parse_conversation;
use eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{InquireError, Select};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

const LEAVE_UNASSIGNED: &str = "(leave unassigned)";

pub struct CategorizeConfig {
    pub manifest_path: PathBuf,
    /// When set, conversation text from the archive is sent instead of the
    /// manifest preview.
    pub export_dir: Option<PathBuf>,
    pub projects: Option<Vec<String>>,
    pub claude_path: Option<PathBuf>,
    pub options: CategorizeOptions,
    pub dry_run: bool,
    pub quiet: bool,
}

/// Project list for a run: the command line wins over the manifest.
pub fn resolve_projects(cli: Option<&[String]>, manifest: &[String]) -> Result<Vec<String>> {
    let source = cli.unwrap_or(manifest);
    let mut projects: Vec<String> = Vec::new();
    for p in source.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if !projects.iter().any(|known| known == p) {
            projects.push(p.to_string());
        }
    }
    if projects.is_empty() {
        return Err(eyre!(
            "No projects defined.\nPass --projects or add a `projects:` list to the manifest."
        ));
    }
    Ok(projects)
}

/// Snippets keyed by conversation id, built from the raw archive.
pub fn load_snippets(export_dir: &Path) -> Result<HashMap<String, String>> {
    let path = find_conversations_json(export_dir)?;
    Ok(load_conversations(&path)?
        .iter()
        .map(parse_conversation)
        .filter(|c| !c.id.is_empty())
        .map(|c| {
            let snippet = conversation_snippet(&c, SNIPPET_MAX_CHARS);
            (c.id, snippet)
        })
        .filter(|(_, s)| !s.is_empty())
        .collect())
}

fn make_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} batches {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar
}

pub fn execute(config: &CategorizeConfig) -> Result<()> {
    let mut manifest = read_manifest(&config.manifest_path)?;
    let projects = resolve_projects(config.projects.as_deref(), &manifest.projects)?;

    let pending = pending_entries(&manifest.conversations, config.options.force);
    if pending.is_empty() {
        eprintln!("Nothing to categorize.");
        return Ok(());
    }

    if config.dry_run {
        println!("{} conversations would be categorized into {:?}:", pending.len(), projects);
        for entry in pending {
            println!(
                "  [{}] {}  {}",
                short_id(&entry.id),
                entry.title,
                truncate_chars(&entry.preview, 80)
            );
        }
        return Ok(());
    }

    let snippets = config.export_dir.as_deref().map(load_snippets).transpose()?;
    let oracle = ClaudeCli::locate(config.claude_path.as_deref())?;

    let summary = run(&mut manifest, &projects, config, snippets.as_ref(), &oracle)?;

    if !summary.needs_review.is_empty() && std::io::stdin().is_terminal() && !config.quiet {
        let changed = review(&mut manifest, &projects, &summary.needs_review)?;
        if changed > 0 {
            write_manifest(&config.manifest_path, &manifest)?;
            eprintln!("Saved {} manual assignments.", changed);
        }
    }
    Ok(())
}

/// Categorize and save. Split from [`execute`] so any [`Oracle`] can drive it.
pub fn run(
    manifest: &mut Manifest,
    projects: &[String],
    config: &CategorizeConfig,
    snippets: Option<&HashMap<String, String>>,
    oracle: &dyn Oracle,
) -> Result<CategorizeSummary> {
    let pb = make_spinner(config.quiet);
    let summary = categorize_entries(
        &mut manifest.conversations,
        projects,
        &config.options,
        snippets,
        oracle,
        &pb,
    );
    pb.finish_and_clear();

    manifest.projects = projects.to_vec();
    write_manifest(&config.manifest_path, manifest)?;

    if !config.quiet {
        eprintln!(
            "Categorized {} conversations. {} need review.",
            summary.categorized,
            summary.needs_review.len()
        );
    }
    Ok(summary)
}

/// Prompt for each uncertain assignment. Returns how many entries changed.
fn review(manifest: &mut Manifest, projects: &[String], uncertain: &[CategoryResult]) -> Result<usize> {
    let mut changed = 0usize;

    for result in uncertain {
        let Some(entry) = manifest.conversations.iter_mut().find(|e| e.id == result.id) else {
            continue;
        };

        println!("\n{}", entry.title);
        if !entry.preview.is_empty() {
            println!("  {}", entry.preview);
        }

        let mut options: Vec<String> = Vec::with_capacity(projects.len() + 1);
        options.push(result.project.clone());
        options.extend(projects.iter().filter(|p| **p != result.project).cloned());
        options.push(LEAVE_UNASSIGNED.to_string());

        let prompt = format!("Project ({}% confident in '{}'):", result.confidence, result.project);
        let choice = match Select::new(&prompt, options)
            .with_help_message("Enter accepts the suggestion, Esc stops reviewing")
            .prompt()
        {
            Ok(choice) => choice,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
            Err(e) => return Err(e.into()),
        };

        let project = if choice == LEAVE_UNASSIGNED {
            String::new()
        } else {
            choice
        };
        if project != entry.project {
            entry.project = project;
            if entry.project.is_empty() {
                entry.tags.clear();
            }
            changed += 1;
        }
    }
    Ok(changed)
}
