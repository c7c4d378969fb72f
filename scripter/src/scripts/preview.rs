// Script preview
// Content for a journaled script, by row id or by file name with an on-disk fallback.

use anyhow::Result;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::database::journal::JournalStore;
use crate::scripts::discovery::read_script_text;

pub const DEFAULT_PREVIEW_LEN: usize = 1000;

const ELLIPSIS: &str = " …";

pub struct PreviewService {
    journal: Arc<dyn JournalStore>,
    root: PathBuf,
}

impl PreviewService {
    pub fn new(journal: Arc<dyn JournalStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            journal,
            root: root.into(),
        }
    }

    /// Stored content of one journal row. Unknown ids preview as empty.
    pub async fn preview_by_id(&self, id: i32, max_len: usize) -> Result<String> {
        let content = self.journal.content_by_id(id).await?;
        Ok(normalize_preview(&content, max_len))
    }

    /// Newest journaled content for `file_name` under the root, else the file on disk.
    pub async fn preview_by_file_name(&self, file_name: &str, max_len: usize) -> Result<String> {
        let scope = dunce::canonicalize(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .to_string_lossy()
            .to_string();

        match self.journal.latest_content(file_name, &scope).await {
            Ok(Some(content)) => return Ok(normalize_preview(&content, max_len)),
            Ok(None) => debug!(
                "[PHASE: preview] [STEP: journal] No journaled content for {}",
                file_name
            ),
            Err(e) => warn!(
                "[PHASE: preview] [STEP: journal] Journal lookup failed for {}: {:#}; trying disk",
                file_name, e
            ),
        }

        let text = self.find_on_disk(file_name).unwrap_or_default();
        Ok(normalize_preview(&text, max_len))
    }

    fn find_on_disk(&self, file_name: &str) -> Option<String> {
        let wanted = file_name.to_lowercase();
        let path = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .find(|e| e.file_name().to_string_lossy().to_lowercase() == wanted)?
            .into_path();

        match read_script_text(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("[PHASE: preview] [STEP: disk] {}", e);
                None
            }
        }
    }
}

/// Truncate to `max_len` characters, marking the cut, and trim surrounding whitespace.
pub fn normalize_preview(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let head: String = text.chars().take(max_len).collect();
        format!("{}{}", head, ELLIPSIS).trim().to_string()
    } else {
        text.trim().to_string()
    }
}
