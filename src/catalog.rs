//! Library enumeration.

use crate::error::{Error, Result};
use crate::model::WorkItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Video extensions picked up by [`DirectoryCatalog`].
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "mov", "avi", "wmv", "webm", "ts", "m2ts", "mpg", "mpeg", "flv", "ogv",
];

/// Extensions of placeholder entries that point at media stored elsewhere.
const VIRTUAL_EXTENSIONS: &[&str] = &["strm"];

/// Source of the items a run works through.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All eligible items, in a stable order. Errors are fatal to the run.
    async fn list_eligible(&self) -> Result<Vec<WorkItem>>;
}

/// Walks a library directory recursively for video files.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Catalog for DirectoryCatalog {
    async fn list_eligible(&self) -> Result<Vec<WorkItem>> {
        let root = self.root.clone();
        let items = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| Error::Catalog(format!("library walk panicked: {e}")))??;
        debug!(root = %self.root.display(), count = items.len(), "library enumerated");
        Ok(items)
    }
}

fn walk(root: &Path) -> Result<Vec<WorkItem>> {
    if !root.is_dir() {
        return Err(Error::Catalog(format!(
            "library root {} is not a directory",
            root.display()
        )));
    }

    let mut items = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(Error::Catalog(format!("cannot read {}: {e}", root.display())));
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable library entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_video(entry.path()) {
            items.push(WorkItem::from_path(entry.into_path()));
        }
    }

    Ok(items)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Real video files only; virtual stubs are excluded.
pub fn is_video(path: &Path) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) else {
        return false;
    };
    !VIRTUAL_EXTENSIONS.contains(&ext.as_str()) && VIDEO_EXTENSIONS.contains(&ext.as_str())
}
