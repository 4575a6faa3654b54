//! # port-ai-history
//!
//! Converts a ChatGPT data export into portable Markdown or PDF documents,
//! grouped into projects.
//!
//! ## What it does
//!
//! A ChatGPT export stores every conversation in `conversations.json` as a
//! tree of message nodes, where edits and regenerations create sibling
//! branches. This crate follows the branch the user last saw, turns each
//! message's content into typed blocks, hides tool scaffolding, resolves
//! image pointers to the files shipped alongside the archive, and renders one
//! document per conversation.
//!
//! ## Workflow
//!
//! ```sh
//! # 1. Build a manifest of every conversation
//! port-ai-history scan --export-dir ~/Downloads/chatgpt-export -o manifest.yaml
//!
//! # 2. Optionally let the `claude` CLI sort them into projects
//! port-ai-history categorize -m manifest.yaml --projects Work,Home,Learning
//!
//! # 3. Render what the manifest includes
//! port-ai-history generate --export-dir ~/Downloads/chatgpt-export -m manifest.yaml -o out
//! ```
//!
//! The manifest is plain YAML: flip `include`, edit `project` or `tags` by
//! hand and re-run `scan` without losing those choices.
//!
//! ## Incremental generation
//!
//! Markdown files carry the conversation's `updated` time in their
//! frontmatter. Unchanged conversations are skipped on later runs unless
//! `--force` is given.
//!
//! Preferences can be persisted in `~/.config/port-ai-history/config.toml`.

pub mod categorizer;
pub mod images;
pub mod importer;
pub mod logger;
pub mod manifest;
pub mod model;
pub mod normalize;
pub mod parallel;
pub mod parser;
pub mod pdf;
pub mod renderer;
pub mod review;
pub mod scan;
pub mod utils;
pub mod visibility;
