use clap::{Parser, Subcommand};
use eyre::{Context, Result, eyre};
use port_ai_history::categorizer::CategorizeOptions;
use port_ai_history::pdf::DEFAULT_PDF_COMMAND;
use port_ai_history::utils::{GenerateConfig, OutputFormat};
use port_ai_history::{logger, parallel, review, scan};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_MANIFEST: &str = "manifest.yaml";
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Convert a ChatGPT data export into Markdown or PDF, grouped into projects.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/port-ai-history/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Print each file written or skipped, and debug logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress bars and summaries.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse the export and write (or merge into) the manifest.
    Scan {
        /// Unzipped export directory containing conversations.json.
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,

        /// Manifest to write.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Assign manifest conversations to projects with the `claude` CLI.
    Categorize {
        /// Manifest to update.
        #[arg(short, long, value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Export directory; when given, conversation text is used instead of previews.
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,

        /// Comma-separated project names. Defaults to the manifest's list.
        #[arg(long, value_name = "NAMES", value_delimiter = ',')]
        projects: Option<Vec<String>>,

        /// Re-categorize conversations that already have a project.
        #[arg(short, long)]
        force: bool,

        /// Conversations per request.
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,

        /// List what would be categorized without calling the CLI.
        #[arg(long)]
        dry_run: bool,

        /// Path to the claude binary. Searched in PATH if omitted.
        #[arg(long, value_name = "PATH")]
        claude_path: Option<PathBuf>,
    },

    /// Render included conversations into `<output>/<project>/`.
    Generate {
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,

        #[arg(short, long, value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Directory to write documents into.
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Keep the model's reasoning blocks in the output.
        #[arg(long)]
        include_thoughts: bool,

        /// Overwrite existing files even if they are up to date.
        #[arg(short, long)]
        force: bool,

        /// HTML-to-PDF converter, invoked as `<command> <in.html> <out.pdf>`.
        #[arg(long, value_name = "CMD")]
        pdf_command: Option<String>,
    },
}

#[derive(Deserialize, Default)]
struct FileConfig {
    export_dir: Option<PathBuf>,
    manifest: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    format: Option<OutputFormat>,
    include_thoughts: Option<bool>,
    pdf_command: Option<String>,
    claude_path: Option<PathBuf>,
    batch_size: Option<usize>,
    projects: Option<Vec<String>>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("port-ai-history/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose, cli.quiet);

    // CLI > config file > default
    let file_cfg = load_file_config(cli.config.as_deref())?;
    let default_manifest = || {
        file_cfg
            .manifest
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST))
    };
    let default_export_dir = || {
        file_cfg
            .export_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    };

    match cli.command {
        Command::Scan { export_dir, output } => {
            let config = scan::ScanConfig {
                export_dir: export_dir.unwrap_or_else(default_export_dir),
                manifest_path: output.unwrap_or_else(default_manifest),
            };
            let summary = scan::execute(&config)?;
            if !cli.quiet {
                eprintln!(
                    "{} {} with {} conversations ({} included, {} with a project).",
                    if summary.merged { "Updated" } else { "Created" },
                    config.manifest_path.display(),
                    summary.total,
                    summary.included,
                    summary.with_project,
                );
            }
            Ok(())
        }

        Command::Categorize {
            manifest,
            export_dir,
            projects,
            force,
            batch_size,
            dry_run,
            claude_path,
        } => {
            let options = CategorizeOptions {
                force,
                batch_size: batch_size
                    .or(file_cfg.batch_size)
                    .unwrap_or(CategorizeOptions::default().batch_size),
                ..CategorizeOptions::default()
            };
            let config = review::CategorizeConfig {
                manifest_path: manifest.unwrap_or_else(default_manifest),
                export_dir: export_dir.or_else(|| file_cfg.export_dir.clone()),
                projects: projects.or_else(|| file_cfg.projects.clone()),
                claude_path: claude_path.or_else(|| file_cfg.claude_path.clone()),
                options,
                dry_run,
                quiet: cli.quiet,
            };
            review::execute(&config)
        }

        Command::Generate {
            export_dir,
            manifest,
            output_dir,
            format,
            include_thoughts,
            force,
            pdf_command,
        } => {
            let config = GenerateConfig {
                export_dir: export_dir.unwrap_or_else(default_export_dir),
                manifest_path: manifest.unwrap_or_else(default_manifest),
                output_dir: output_dir
                    .or_else(|| file_cfg.output_dir.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                format: format.or(file_cfg.format).unwrap_or(OutputFormat::Markdown),
                include_thoughts: include_thoughts || file_cfg.include_thoughts.unwrap_or(false),
                pdf_command: pdf_command
                    .or_else(|| file_cfg.pdf_command.clone())
                    .unwrap_or_else(|| DEFAULT_PDF_COMMAND.to_string()),
                force,
                verbose: cli.verbose,
                quiet: cli.quiet,
            };
            parallel::execute(config).map(|_| ())
        }
    }
}
