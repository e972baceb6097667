//! Markdown document loading.
//!
//! Inputs may be files or directories; directories are walked for Markdown
//! files. The resulting set is ordered by id so every run sees documents in the
//! same order.
use crate::util::display_path;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// A loaded Markdown document. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Load every Markdown document reachable from `paths`, sorted by id.
///
/// Explicit file arguments are loaded regardless of extension; directory
/// arguments contribute only `*.md` / `*.markdown` files.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let base = std::env::current_dir().ok();
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_markdown_files(path, &mut files)
                .with_context(|| format!("walk {}", path.display()))?;
        } else {
            files.push(path.clone());
        }
    }

    let mut documents = BTreeMap::new();
    for file in files {
        let id = display_path(&file, base.as_deref());
        if documents.contains_key(&id) {
            continue;
        }
        let text =
            fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
        documents.insert(id.clone(), Document::new(id, text));
    }
    tracing::debug!(count = documents.len(), "documents loaded");
    Ok(documents.into_values().collect())
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("list {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_markdown_files(&path, out)?;
        } else if is_markdown(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MARKDOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
