// Test doubles for the journal and the execution engine.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::database::engine::{ExecutionEngine, UpgradeFailure, UpgradeLog, UpgradeResult};
use crate::database::journal::{current_script_content, sort_history, HistoryRow, JournalStore};
use crate::scripts::discovery::ScriptCandidate;
use crate::scripts::key::ScriptIdentity;
use crate::utils::path_resolver::{is_within_folder, normalize_folder};

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub row: HistoryRow,
    pub content: String,
}

/// Journal kept in memory. Mirrors the SQL Server journal's contract.
#[derive(Default)]
pub struct InMemoryJournal {
    rows: Mutex<Vec<StoredRow>>,
    pub ensure_calls: AtomicU32,
    pub fail_reads: AtomicBool,
    /// Journal table not created yet; reads fail until `ensure_schema` runs.
    table_missing: AtomicBool,
}

impl InMemoryJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A database where the journal table does not exist yet.
    pub fn fresh() -> Arc<Self> {
        let journal = Self::default();
        journal.table_missing.store(true, Ordering::SeqCst);
        Arc::new(journal)
    }

    /// Seed a row as if an earlier run had journaled it.
    pub fn seed(&self, folder: &str, file_name: &str, content: &str) {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i32 + 1;
        let applied = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(id as i64);
        rows.push(StoredRow {
            row: HistoryRow {
                id,
                script_name: file_name.to_string(),
                applied_utc: Some(applied),
                executed_by: Some("seed".to_string()),
                machine_name: Some("seed".to_string()),
                path: Some(folder.to_string()),
            },
            content: content.to_string(),
        });
    }

    pub fn rows(&self) -> Vec<StoredRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn journaled_names(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .map(|r| r.row.script_name)
            .collect()
    }

    fn check_reads(&self) -> Result<()> {
        if self.table_missing.load(Ordering::SeqCst) {
            anyhow::bail!("Invalid object name 'scripts.DbMigrationHistory'.");
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("journal unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl JournalStore for InMemoryJournal {
    async fn ensure_schema(&self) -> Result<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.table_missing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn applied_identities(&self) -> Result<Vec<ScriptIdentity>> {
        self.check_reads()?;
        Ok(self
            .rows()
            .into_iter()
            .map(|r| {
                ScriptIdentity::new(
                    normalize_folder(r.row.path.as_deref().unwrap_or_default()),
                    r.row.script_name,
                )
            })
            .collect())
    }

    async fn record_applied(
        &self,
        identity: &ScriptIdentity,
        fallback_content: &str,
    ) -> Result<()> {
        if self.table_missing.load(Ordering::SeqCst) {
            anyhow::bail!("Invalid object name 'scripts.DbMigrationHistory'.");
        }
        let content = current_script_content(identity, fallback_content);
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i32 + 1;
        rows.push(StoredRow {
            row: HistoryRow {
                id,
                script_name: identity.file_name.clone(),
                applied_utc: Some(Utc::now()),
                executed_by: Some("tester".to_string()),
                machine_name: Some("localhost".to_string()),
                path: Some(normalize_folder(&identity.folder)),
            },
            content,
        });
        Ok(())
    }

    async fn history(&self) -> Result<Vec<HistoryRow>> {
        self.check_reads()?;
        let mut rows: Vec<HistoryRow> = self.rows().into_iter().map(|r| r.row).collect();
        sort_history(&mut rows);
        Ok(rows)
    }

    async fn content_by_id(&self, id: i32) -> Result<String> {
        self.check_reads()?;
        Ok(self
            .rows()
            .into_iter()
            .find(|r| r.row.id == id)
            .map(|r| r.content)
            .unwrap_or_default())
    }

    async fn latest_content(
        &self,
        file_name: &str,
        folder_scope: &str,
    ) -> Result<Option<String>> {
        self.check_reads()?;
        let mut rows = self.rows();
        rows.sort_by(|a, b| b.row.applied_utc.cmp(&a.row.applied_utc));
        Ok(rows
            .into_iter()
            .filter(|r| r.row.script_name == file_name)
            .filter(|r| is_within_folder(r.row.path.as_deref().unwrap_or_default(), folder_scope))
            .map(|r| r.content)
            .find(|c| !c.is_empty()))
    }
}

/// Engine that "executes" by journaling, failing on configured file names.
pub struct FakeEngine {
    journal: Arc<InMemoryJournal>,
    fail_on: HashSet<String>,
    /// File names passed to each perform_upgrade call.
    pub invocations: Mutex<Vec<Vec<String>>>,
}

impl FakeEngine {
    pub fn new(journal: Arc<InMemoryJournal>) -> Self {
        Self {
            journal,
            fail_on: HashSet::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.fail_on.insert(file_name.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn perform_upgrade(
        &self,
        scripts: &[ScriptCandidate],
        log: &dyn UpgradeLog,
    ) -> UpgradeResult {
        self.invocations.lock().unwrap().push(
            scripts
                .iter()
                .map(|s| s.identity.file_name.clone())
                .collect(),
        );

        let mut result = UpgradeResult::default();
        for script in scripts {
            if self.fail_on.contains(&script.identity.file_name) {
                log.write_error(&format!("{} failed", script.identity.file_name));
                result.failure = Some(UpgradeFailure {
                    script_key: Some(script.identity.key()),
                    error: anyhow::anyhow!("Invalid object name 'dbo.Missing'."),
                });
                return result;
            }
            if let Err(e) = self
                .journal
                .record_applied(&script.identity, &script.contents)
                .await
            {
                result.failure = Some(UpgradeFailure {
                    script_key: Some(script.identity.key()),
                    error: e,
                });
                return result;
            }
            log.write_information(&format!("{} applied", script.identity.file_name));
            result.applied.push(script.identity.clone());
        }
        result
    }
}

/// Write a script and pin its modification time to `2024-01-01 + minutes`.
///
/// Pending order uses creation time, which tests cannot set; it only falls back to the
/// pinned mtime where the filesystem reports no birth time. Callers write files in the
/// order they expect them to run.
pub fn write_script(root: &Path, relative: &str, contents: &str, minutes: u64) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    let base = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_704_067_200);
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(base + std::time::Duration::from_secs(minutes * 60))
        .unwrap();
}
