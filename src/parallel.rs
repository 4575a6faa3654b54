use crate::images::ImageIndex;
use crate::importer::{RawConversation, find_conversations_json, load_conversations};
use crate::manifest::read_manifest;
use crate::model::short_id;
use crate::parser::parse_conversation;
use crate::pdf::render_pdf;
use crate::renderer::{ASSETS_DIR, RenderOptions, output_filename, write_conversation_markdown};
use crate::utils::{GenerateConfig, OutputFormat, ProcessResult, parse_existing_frontmatter};
use crate::visibility::visible_messages;
use crossbeam_channel::bounded;
use eyre::{Context, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const UNSORTED_DIR: &str = "_unsorted";

/// One conversation to render and the manifest project it belongs to.
struct Job {
    raw: RawConversation,
    project: String,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    updated: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

/// Final tally of a generate run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

fn make_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    bar
}

/// Folder name for a project. Path separators would escape the output
/// directory, so they are replaced.
pub fn project_folder(project: &str) -> String {
    let cleaned: String = project
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        UNSORTED_DIR.to_string()
    } else {
        cleaned
    }
}

/// Render every conversation the manifest includes into
/// `<output>/<project>/<slug>_<id8>.<ext>`.
pub fn execute(config: GenerateConfig) -> Result<GenerateSummary> {
    let conversations_json = find_conversations_json(&config.export_dir)?;
    let export_root = conversations_json
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.export_dir.clone());

    let manifest = read_manifest(&config.manifest_path)?;
    let projects: HashMap<String, String> = manifest
        .included()
        .map(|e| (e.id.clone(), e.project.clone()))
        .collect();
    if projects.is_empty() {
        return Err(eyre!("No conversations marked include: true in manifest"));
    }

    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    log::info!("Loading {}", conversations_json.display());
    let jobs: Vec<Job> = load_conversations(&conversations_json)?
        .into_iter()
        .filter_map(|raw| {
            let project = projects.get(raw.conversation_id())?.clone();
            Some(Job { raw, project })
        })
        .collect();

    let images = ImageIndex::build(&export_root);
    log::info!("Indexed {} image files", images.len());

    let pb = make_bar(jobs.len() as u64, config.quiet);
    pb.set_message(match config.format {
        OutputFormat::Markdown => "Generating markdown",
        OutputFormat::Pdf => "Generating PDF",
    });

    let counters = Counters::default();
    let n_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8);
    let (tx, rx) = bounded::<Job>(64);

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let rx = rx.clone();
            let (config, counters, images, pb) = (&config, &counters, &images, &pb);

            s.spawn(move || {
                while let Ok(job) = rx.recv() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        export_conversation(&job, images, config, pb)
                    }))
                    .unwrap_or_else(|_| Err(eyre!("renderer panicked")));

                    match outcome {
                        Ok(ProcessResult::Created) => {
                            counters.created.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ProcessResult::Updated) => {
                            counters.updated.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(ProcessResult::Skipped) => {
                            counters.skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                            let title = job.raw.title.as_deref().unwrap_or("Untitled");
                            pb.suspend(|| {
                                log::error!(
                                    "[{}] {}: {:#}",
                                    short_id(job.raw.conversation_id()),
                                    title,
                                    e
                                )
                            });
                        }
                    }
                    pb.inc(1);
                }
            });
        }

        drop(rx);

        for job in jobs {
            if tx.send(job).is_err() {
                break;
            }
        }

        drop(tx);
    });

    pb.finish_and_clear();

    let summary = GenerateSummary {
        created: counters.created.load(Ordering::Relaxed),
        updated: counters.updated.load(Ordering::Relaxed),
        skipped: counters.skipped.load(Ordering::Relaxed),
        errors: counters.errors.load(Ordering::Relaxed),
    };
    if !config.quiet {
        eprintln!(
            "Done. {} created, {} updated, {} skipped. Errors: {}",
            summary.created, summary.updated, summary.skipped, summary.errors,
        );
    }
    Ok(summary)
}

// ── Shared processing ─────────────────────────────────────────────────────────

// Find an earlier export of this conversation in `dir`: same `_<id8>` suffix,
// and for Markdown the `id:` frontmatter must match. Catches renames after the
// title (and therefore the slug) changed.
fn find_existing_file(dir: &Path, id: &str, ext: &str) -> Option<PathBuf> {
    let suffix = format!("_{}{}", short_id(id), ext);
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(&suffix))
        .find_map(|e| {
            let path = e.path();
            if ext != OutputFormat::Markdown.extension() {
                return Some(path);
            }
            let fm = parse_existing_frontmatter(&path)?;
            (fm.id.as_deref() == Some(id)).then_some(path)
        })
}

fn export_conversation(
    job: &Job,
    images: &ImageIndex,
    config: &GenerateConfig,
    pb: &ProgressBar,
) -> Result<ProcessResult> {
    let conv = parse_conversation(&job.raw);
    let ext = config.format.extension();
    let dir = config.output_dir.join(project_folder(&job.project));
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("Failed to create directory: {}", dir.display()))?;

    let desired_path = dir.join(output_filename(&conv, ext));
    let existing_path = if conv.id.is_empty() {
        desired_path.exists().then(|| desired_path.clone())
    } else {
        find_existing_file(&dir, &conv.id, ext)
    };

    if !config.force
        && config.format == OutputFormat::Markdown
        && let Some(ref existing) = existing_path
        && let Some(fm) = parse_existing_frontmatter(existing)
        && let (Some(file_ts), Some(conv_ts)) = (fm.updated, conv.update_time)
        && file_ts >= conv_ts
        && fm.include_thoughts == config.include_thoughts
        && existing == &desired_path
    {
        if config.verbose {
            pb.println(format!("Skipped: {}", desired_path.display()));
        }
        return Ok(ProcessResult::Skipped);
    }

    let result_variant = if existing_path.is_none() {
        ProcessResult::Created
    } else {
        ProcessResult::Updated
    };

    if let Some(ref old_path) = existing_path
        && old_path != &desired_path
        && let Err(e) = fs::remove_file(old_path)
    {
        log::warn!("Could not remove stale {}: {}", old_path.display(), e);
    }

    let messages = visible_messages(&conv.messages, config.include_thoughts);

    match config.format {
        OutputFormat::Markdown => {
            let md_file = File::create(&desired_path)
                .wrap_err_with(|| format!("Failed to create: {}", desired_path.display()))?;
            let mut writer = BufWriter::new(md_file);
            let assets = write_conversation_markdown(
                &mut writer,
                &conv,
                &messages,
                images,
                RenderOptions {
                    project: &job.project,
                    include_thoughts: config.include_thoughts,
                },
            )
            .wrap_err("Failed to write markdown")?;
            writer.flush().wrap_err("Failed to flush markdown file")?;
            drop(writer);

            if !assets.is_empty() {
                let assets_dir = dir.join(ASSETS_DIR);
                fs::create_dir_all(&assets_dir).wrap_err("Failed to create assets directory")?;
                for asset in assets {
                    fs::write(assets_dir.join(&asset.name), &asset.data)
                        .wrap_err_with(|| format!("Failed to write asset: {}", asset.name))?;
                }
            }
        }
        OutputFormat::Pdf => {
            render_pdf(&conv, &messages, images, &config.pdf_command, &desired_path)?;
        }
    }

    if config.verbose {
        match result_variant {
            ProcessResult::Created => pb.println(format!("Created: {}", desired_path.display())),
            ProcessResult::Updated => pb.println(format!("Updated: {}", desired_path.display())),
            ProcessResult::Skipped => {}
        }
    }

    Ok(result_variant)
}
