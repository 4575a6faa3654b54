use crate::importer::{find_conversations_json, load_conversations};
use crate::manifest::{Manifest, ManifestEntry, merge_entries, read_manifest, write_manifest};
use crate::parser::parse_conversation;
use eyre::Result;
use std::path::PathBuf;

pub struct ScanConfig {
    pub export_dir: PathBuf,
    pub manifest_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total: usize,
    pub included: usize,
    pub with_project: usize,
    /// Whether an earlier manifest was merged rather than created fresh.
    pub merged: bool,
}

/// Parse every conversation in the export and write the manifest, keeping
/// project, tag and include choices from an existing one.
pub fn execute(config: &ScanConfig) -> Result<ScanSummary> {
    let path = find_conversations_json(&config.export_dir)?;
    log::info!("Loading {}", path.display());

    let fresh: Vec<ManifestEntry> = load_conversations(&path)?
        .iter()
        .map(|raw| ManifestEntry::from_conversation(&parse_conversation(raw)))
        .collect();

    let (manifest, merged) = if config.manifest_path.exists() {
        let previous = read_manifest(&config.manifest_path)?;
        let conversations = merge_entries(&previous.conversations, fresh);
        (
            Manifest {
                version: previous.version,
                projects: previous.projects,
                conversations,
            },
            true,
        )
    } else {
        (
            Manifest {
                conversations: fresh,
                ..Manifest::default()
            },
            false,
        )
    };

    write_manifest(&config.manifest_path, &manifest)?;

    let summary = ScanSummary {
        total: manifest.conversations.len(),
        included: manifest.included().count(),
        with_project: manifest
            .conversations
            .iter()
            .filter(|e| !e.project.is_empty())
            .count(),
        merged,
    };
    log::info!(
        "Wrote {} ({} conversations, {} included, {} with a project)",
        config.manifest_path.display(),
        summary.total,
        summary.included,
        summary.with_project
    );
    Ok(summary)
}
