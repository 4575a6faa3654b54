//! Maps `sediment://` asset pointers to image files shipped in the export.
//!
//! Exported images are named after the file id the pointers refer to, in one
//! of these shapes:
//!
//! - `file_0000000026d871fda71ef4241895df64-sanitized.png`
//! - `file_000000000ab46230972f3aabf082ff8d-6acab26c-….png`
//! - `file-YUUze1wx5ct3UsboScyA2E-dedc62b2-….png`
//!
//! Pointers come as `sediment://file_<id>` or
//! `sediment://<hash>#file_<id>#<page>.<ext>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::model::ImageRef;

pub const ASSET_SCHEME: &str = "sediment://";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "svg"];

/// File id → path index over an export directory.
#[derive(Debug, Default, Clone)]
pub struct ImageIndex {
    files: HashMap<String, PathBuf>,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| ext.eq_ignore_ascii_case(i)))
}

/// Derive the lookup key for an exported file name, or `None` if the name
/// follows neither convention.
pub fn file_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let prefix = ["file_", "file-"].into_iter().find(|p| name.starts_with(p))?;
    let rest = &name[prefix.len()..];
    match rest.find('-') {
        Some(dash) if dash > 0 => Some(format!("{}{}", prefix, &rest[..dash])),
        _ => path.file_stem()?.to_str().map(str::to_string),
    }
}

impl ImageIndex {
    /// Recursively index image files under `root`. Unreadable entries are
    /// skipped.
    ///
    /// When two files map to the same key the later one wins. Exports are not
    /// expected to contain such duplicates, so no attempt is made to pick.
    pub fn build(root: &Path) -> Self {
        let mut files = HashMap::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !has_image_extension(path) {
                continue;
            }
            let Some(key) = file_key(path) else {
                continue;
            };
            if let Some(previous) = files.insert(key.clone(), path.to_path_buf()) {
                log::debug!(
                    "Image id {} indexed twice: {} replaces {}",
                    key,
                    path.display(),
                    previous.display()
                );
            }
        }
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up the file behind an asset pointer. Pointers of other schemes
    /// and unknown ids resolve to `None`.
    pub fn resolve(&self, pointer: &str) -> Option<&Path> {
        let rest = pointer.strip_prefix(ASSET_SCHEME)?;
        let key = if rest.contains('#') {
            rest.split('#')
                .find(|seg| seg.starts_with("file_") || seg.starts_with("file-"))?
        } else {
            rest
        };
        self.files.get(key).map(PathBuf::as_path)
    }

    /// Resolve an image reference, recording the outcome on the reference
    /// itself. A reference that was already resolved keeps its first result.
    pub fn resolve_ref<'a>(&self, img: &'a ImageRef) -> Option<&'a Path> {
        img.resolve_with(|| self.resolve(&img.asset_pointer).map(Path::to_path_buf))
    }
}
