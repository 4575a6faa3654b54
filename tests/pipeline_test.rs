//! End-to-end tests for the scan, categorize and generate pipelines.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{ConversationBuilder, ExportBuilder, PNG_BYTES};
use eyre::Result;
use port_ai_history::categorizer::{CategorizeOptions, Oracle};
use port_ai_history::manifest::{Manifest, read_manifest, write_manifest};
use port_ai_history::parallel::{self, GenerateSummary};
use port_ai_history::review::{self, CategorizeConfig};
use port_ai_history::scan::{self, ScanConfig};
use port_ai_history::utils::{GenerateConfig, OutputFormat};
use serde_json::json;
use tempfile::TempDir;
use walkdir::WalkDir;

fn sample_export() -> TempDir {
    ExportBuilder::new()
        .with_conversation(
            ConversationBuilder::new("c1aaaaaa-1111", "Rust Lifetimes")
                .model("gpt-4o")
                .text("u1", "root", "user", "How do lifetimes work?")
                .text("a1", "u1", "assistant", "old answer")
                .text("a2", "u1", "assistant", "new answer")
                .current("a2"),
        )
        .with_conversation(
            ConversationBuilder::new("c2bbbbbb-2222", "Garden Plans")
                .times(1_700_100_000.0, 1_700_100_500.0)
                .text("u1", "root", "user", "Which tomatoes grow well in shade?")
                .text("a1", "u1", "assistant", "Cherry tomatoes tolerate some shade."),
        )
        .with_conversation(
            ConversationBuilder::new("c3cccccc-3333", "Secret")
                .text("u1", "root", "user", "do not export me"),
        )
        .build()
}

fn scan_into(export: &Path, manifest: &Path) -> scan::ScanSummary {
    scan::execute(&ScanConfig {
        export_dir: export.to_path_buf(),
        manifest_path: manifest.to_path_buf(),
    })
    .unwrap()
}

fn generate_config(export: &Path, manifest: &Path, out: &Path) -> GenerateConfig {
    GenerateConfig {
        export_dir: export.to_path_buf(),
        manifest_path: manifest.to_path_buf(),
        output_dir: out.to_path_buf(),
        format: OutputFormat::Markdown,
        include_thoughts: false,
        pdf_command: "weasyprint".to_string(),
        force: false,
        verbose: false,
        quiet: true,
    }
}

fn edit_manifest(path: &Path, f: impl FnOnce(&mut Manifest)) {
    let mut manifest = read_manifest(path).unwrap();
    f(&mut manifest);
    write_manifest(path, &manifest).unwrap();
}

fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|e| e == "md"))
        .collect();
    files.sort();
    files
}

#[test]
fn scan_creates_then_merges_manifest() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");

    let first = scan_into(export.path(), &manifest_path);
    assert_eq!(first.total, 3);
    assert_eq!(first.included, 3);
    assert!(!first.merged);

    let manifest = read_manifest(&manifest_path).unwrap();
    let garden = manifest
        .conversations
        .iter()
        .find(|e| e.id == "c2bbbbbb-2222")
        .unwrap();
    assert_eq!(garden.title, "Garden Plans");
    assert_eq!(garden.messages, 2);
    assert_eq!(garden.preview, "Which tomatoes grow well in shade?");
    // newest first
    assert_eq!(manifest.conversations[0].id, "c2bbbbbb-2222");

    edit_manifest(&manifest_path, |m| {
        m.projects = vec!["Work".into(), "Home".into()];
        for e in &mut m.conversations {
            match e.id.as_str() {
                "c1aaaaaa-1111" => {
                    e.project = "Work".into();
                    e.tags = vec!["Home".into()];
                }
                "c3cccccc-3333" => e.include = false,
                _ => {}
            }
        }
    });

    let second = scan_into(export.path(), &manifest_path);
    assert!(second.merged);
    assert_eq!(second.included, 2);
    assert_eq!(second.with_project, 1);

    let manifest = read_manifest(&manifest_path).unwrap();
    assert_eq!(manifest.projects, vec!["Work", "Home"]);
    let rust = manifest
        .conversations
        .iter()
        .find(|e| e.id == "c1aaaaaa-1111")
        .unwrap();
    assert_eq!(rust.project, "Work");
    assert_eq!(rust.tags, vec!["Home"]);
}

#[test]
fn generate_renders_included_conversations_into_project_folders() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");

    scan_into(export.path(), &manifest_path);
    edit_manifest(&manifest_path, |m| {
        for e in &mut m.conversations {
            match e.id.as_str() {
                "c1aaaaaa-1111" => e.project = "Work".into(),
                "c3cccccc-3333" => e.include = false,
                _ => {}
            }
        }
    });

    let summary = parallel::execute(generate_config(export.path(), &manifest_path, &out)).unwrap();
    assert_eq!(
        summary,
        GenerateSummary {
            created: 2,
            updated: 0,
            skipped: 0,
            errors: 0
        }
    );

    assert_eq!(
        markdown_files(&out),
        vec![
            out.join("Work").join("rust-lifetimes_c1aaaaaa.md"),
            out.join("_unsorted").join("garden-plans_c2bbbbbb.md"),
        ]
    );

    let rust = fs::read_to_string(out.join("Work/rust-lifetimes_c1aaaaaa.md")).unwrap();
    assert!(rust.starts_with("---\n"));
    assert!(rust.contains("id: c1aaaaaa-1111"));
    assert!(rust.contains("project: Work"));
    assert!(rust.contains("# Rust Lifetimes"));
    assert!(rust.contains("## You\n\nHow do lifetimes work?"));
    assert!(rust.contains("## ChatGPT\n\nnew answer"));
    assert!(!rust.contains("old answer"));
}

#[test]
fn generate_skips_up_to_date_files_until_forced() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");
    scan_into(export.path(), &manifest_path);

    let config = generate_config(export.path(), &manifest_path, &out);
    assert_eq!(parallel::execute(config.clone()).unwrap().created, 3);

    let again = parallel::execute(config.clone()).unwrap();
    assert_eq!((again.created, again.skipped), (0, 3));

    let thoughts = GenerateConfig {
        include_thoughts: true,
        ..config.clone()
    };
    assert_eq!(parallel::execute(thoughts).unwrap().updated, 3);

    let forced = GenerateConfig {
        force: true,
        ..config
    };
    assert_eq!(parallel::execute(forced).unwrap().updated, 3);
}

#[test]
fn generate_moves_files_when_title_changes() {
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");

    let before = ExportBuilder::new()
        .with_conversation(
            ConversationBuilder::new("d4dddddd-4444", "Draft Title")
                .text("u1", "root", "user", "hi"),
        )
        .build();
    scan_into(before.path(), &manifest_path);
    parallel::execute(generate_config(before.path(), &manifest_path, &out)).unwrap();

    let after = ExportBuilder::new()
        .with_conversation(
            ConversationBuilder::new("d4dddddd-4444", "Final Title")
                .times(1_700_000_000.0, 1_800_000_000.0)
                .text("u1", "root", "user", "hi"),
        )
        .build();
    let summary = parallel::execute(generate_config(after.path(), &manifest_path, &out)).unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(
        markdown_files(&out),
        vec![out.join("_unsorted").join("final-title_d4dddddd.md")]
    );
}

#[test]
fn generate_copies_resolved_images_into_assets() {
    let export = ExportBuilder::new()
        .with_conversation(
            ConversationBuilder::new("e5eeeeee-5555", "Photo").node(
                "u1",
                "root",
                "user",
                json!({
                    "content_type": "multimodal_text",
                    "parts": [
                        {"content_type": "image_asset_pointer", "asset_pointer": "sediment://file_0001abc"},
                        {"content_type": "image_asset_pointer", "asset_pointer": "sediment://file_missing"},
                        "what is this?"
                    ]
                }),
            ),
        )
        .with_file("file_0001abc-photo.png", PNG_BYTES)
        .build();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");

    scan_into(export.path(), &manifest_path);
    parallel::execute(generate_config(export.path(), &manifest_path, &out)).unwrap();

    let doc = fs::read_to_string(out.join("_unsorted/photo_e5eeeeee.md")).unwrap();
    assert!(doc.contains("![image](assets/"));
    assert!(doc.contains("*[Image not available in export]*"));
    assert!(doc.contains("what is this?"));

    let assets: Vec<_> = fs::read_dir(out.join("_unsorted/assets"))
        .unwrap()
        .flatten()
        .collect();
    assert_eq!(assets.len(), 1);
    assert_eq!(fs::read(assets[0].path()).unwrap(), PNG_BYTES);
}

#[test]
fn failed_conversations_are_counted_and_the_batch_continues() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");
    scan_into(export.path(), &manifest_path);

    let config = GenerateConfig {
        format: OutputFormat::Pdf,
        pdf_command: "definitely-not-a-pdf-tool".to_string(),
        ..generate_config(export.path(), &manifest_path, &out)
    };
    let summary = parallel::execute(config).unwrap();
    assert_eq!(
        summary,
        GenerateSummary {
            created: 0,
            updated: 0,
            skipped: 0,
            errors: 3
        }
    );
}

#[cfg(unix)]
#[test]
fn one_failing_conversation_does_not_stop_the_others() {
    use std::os::unix::fs::PermissionsExt;

    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    let out = work.path().join("out");
    scan_into(export.path(), &manifest_path);

    // Converter that refuses the garden conversation and "renders" the rest.
    let converter = work.path().join("fake-pdf");
    fs::write(
        &converter,
        "#!/bin/sh\ncase \"$2\" in\n  *garden*) echo boom >&2; exit 1 ;;\n  *) cp \"$1\" \"$2\" ;;\nesac\n",
    )
    .unwrap();
    fs::set_permissions(&converter, fs::Permissions::from_mode(0o755)).unwrap();

    let config = GenerateConfig {
        format: OutputFormat::Pdf,
        pdf_command: converter.to_string_lossy().into_owned(),
        ..generate_config(export.path(), &manifest_path, &out)
    };
    let summary = parallel::execute(config).unwrap();
    assert_eq!((summary.created, summary.errors), (2, 1));

    assert!(out.join("_unsorted/rust-lifetimes_c1aaaaaa.pdf").is_file());
    assert!(out.join("_unsorted/secret_c3cccccc.pdf").is_file());
    assert!(!out.join("_unsorted/garden-plans_c2bbbbbb.pdf").exists());
}

#[test]
fn generate_fails_when_nothing_is_included() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    scan_into(export.path(), &manifest_path);
    edit_manifest(&manifest_path, |m| {
        m.conversations.iter_mut().for_each(|e| e.include = false);
    });

    let err = parallel::execute(generate_config(
        export.path(),
        &manifest_path,
        &work.path().join("out"),
    ))
    .unwrap_err();
    assert!(err.to_string().contains("include: true"));
}

#[test]
fn generate_finds_archive_one_level_down() {
    let outer = TempDir::new().unwrap();
    let export = sample_export();
    let nested = outer.path().join("chatgpt-export");
    fs::create_dir_all(&nested).unwrap();
    fs::copy(
        export.path().join("conversations.json"),
        nested.join("conversations.json"),
    )
    .unwrap();

    let manifest_path = outer.path().join("manifest.yaml");
    let summary = scan_into(outer.path(), &manifest_path);
    assert_eq!(summary.total, 3);
}

/// Assigns every conversation in the prompt to a fixed project.
struct FixedOracle {
    project: &'static str,
    confidence: u8,
}

impl Oracle for FixedOracle {
    fn ask(&self, prompt: &str) -> Result<String> {
        let ids = ["c1aaaaaa-1111", "c2bbbbbb-2222", "c3cccccc-3333"];
        let verdicts: Vec<_> = ids
            .iter()
            .filter(|id| prompt.contains(*id))
            .map(|id| {
                json!({"id": id, "project": self.project, "tags": [], "confidence": self.confidence})
            })
            .collect();
        Ok(format!("```json\n{}\n```", serde_json::Value::Array(verdicts)))
    }
}

#[test]
fn categorize_assigns_projects_and_saves_manifest() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    scan_into(export.path(), &manifest_path);

    let config = CategorizeConfig {
        manifest_path: manifest_path.clone(),
        export_dir: None,
        projects: Some(vec!["Work".into(), "Home".into()]),
        claude_path: None,
        options: CategorizeOptions::default(),
        dry_run: false,
        quiet: true,
    };
    let mut manifest = read_manifest(&manifest_path).unwrap();
    let projects = review::resolve_projects(config.projects.as_deref(), &manifest.projects).unwrap();
    let oracle = FixedOracle {
        project: "Home",
        confidence: 95,
    };

    let summary = review::run(&mut manifest, &projects, &config, None, &oracle).unwrap();
    assert_eq!(summary.categorized, 3);
    assert!(summary.needs_review.is_empty());

    let saved = read_manifest(&manifest_path).unwrap();
    assert_eq!(saved.projects, vec!["Work", "Home"]);
    assert!(saved.conversations.iter().all(|e| e.project == "Home"));
}

#[test]
fn categorize_reports_low_confidence_after_second_pass() {
    let export = sample_export();
    let work = TempDir::new().unwrap();
    let manifest_path = work.path().join("manifest.yaml");
    scan_into(export.path(), &manifest_path);
    let snippets = review::load_snippets(export.path()).unwrap();
    assert!(snippets["c2bbbbbb-2222"].contains("tomatoes"));

    let config = CategorizeConfig {
        manifest_path: manifest_path.clone(),
        export_dir: Some(export.path().to_path_buf()),
        projects: Some(vec!["Work".into()]),
        claude_path: None,
        options: CategorizeOptions::default(),
        dry_run: false,
        quiet: true,
    };
    let mut manifest = read_manifest(&manifest_path).unwrap();
    let oracle = FixedOracle {
        project: "Work",
        confidence: 40,
    };

    let summary = review::run(
        &mut manifest,
        &["Work".to_string()],
        &config,
        Some(&snippets),
        &oracle,
    )
    .unwrap();
    assert_eq!(summary.needs_review.len(), 3);
    assert!(summary.needs_review.iter().all(|r| r.confidence == 40));
}
