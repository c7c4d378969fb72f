// Script service
// Load report (executed vs pending) and selective execution of pending scripts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::engine::{ExecutionEngine, UpgradeLog};
use crate::database::journal::JournalStore;
use crate::error::ConfigError;
use crate::scripts::discovery::{FileSystemScriptProvider, ScriptCandidate};
use crate::scripts::key::ScriptIdentity;
use crate::scripts::reconcile::{compute_pending, executed_in, ExecutedRow};
use crate::utils::path_resolver::release_of;

/// A script on disk with no journal row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingScript {
    pub identity: ScriptIdentity,
    pub release: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadResult {
    pub executed: Vec<ExecutedRow>,
    pub pending: Vec<PendingScript>,
}

/// Which pending scripts to run.
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Identities(Vec<ScriptIdentity>),
    /// Every pending script with one of these file names, in any folder.
    FileNames(Vec<String>),
}

impl Selection {
    fn filter(&self, pending: Vec<ScriptCandidate>) -> Vec<ScriptCandidate> {
        match self {
            Selection::All => pending,
            Selection::Identities(ids) => {
                let wanted: HashSet<String> = ids.iter().map(ScriptIdentity::match_key).collect();
                pending
                    .into_iter()
                    .filter(|c| wanted.contains(&c.identity.match_key()))
                    .collect()
            }
            Selection::FileNames(names) => {
                let wanted: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
                pending
                    .into_iter()
                    .filter(|c| wanted.contains(&c.identity.file_name.to_lowercase()))
                    .collect()
            }
        }
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Succeeded {
        applied: Vec<ScriptIdentity>,
    },
    Failed {
        applied: Vec<ScriptIdentity>,
        failed: ScriptIdentity,
        error: anyhow::Error,
    },
}

impl ExecutionOutcome {
    pub fn applied(&self) -> &[ScriptIdentity] {
        match self {
            ExecutionOutcome::Succeeded { applied } | ExecutionOutcome::Failed { applied, .. } => {
                applied
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }
}

pub struct ScriptService {
    journal: Arc<dyn JournalStore>,
    engine: Arc<dyn ExecutionEngine>,
    provider: FileSystemScriptProvider,
}

impl ScriptService {
    pub fn new(
        journal: Arc<dyn JournalStore>,
        engine: Arc<dyn ExecutionEngine>,
        provider: FileSystemScriptProvider,
    ) -> Self {
        Self {
            journal,
            engine,
            provider,
        }
    }

    /// Canonical scripts root as a folder string, the scope for journal rows.
    fn folder_scope(&self) -> Result<String> {
        let root: PathBuf = dunce::canonicalize(self.provider.root())
            .map_err(|_| ConfigError::FolderNotFound(self.provider.root().to_path_buf()))?;
        Ok(root.to_string_lossy().to_string())
    }

    async fn discover(&self) -> Result<Vec<ScriptCandidate>> {
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.get_scripts())
            .await
            .context("Script discovery task panicked")?
    }

    /// Journaled scripts under the root and scripts still pending, both ordered.
    pub async fn load_scripts(&self) -> Result<LoadResult> {
        let scope = self.folder_scope()?;
        info!("[PHASE: load] [STEP: start] Loading scripts for {}", scope);

        self.journal
            .ensure_schema()
            .await
            .context("Failed to ensure journal schema")?;

        let history = self.journal.history().await?;
        let executed = executed_in(&history, &scope);

        let candidates = self.discover().await?;
        let applied = self.journal.applied_identities().await?;
        let pending: Vec<PendingScript> = compute_pending(candidates, &applied, &scope)
            .into_iter()
            .map(|c| PendingScript {
                release: release_of(&c.identity.folder, &scope),
                created_utc: c.created_utc,
                identity: c.identity,
            })
            .collect();

        info!(
            "[PHASE: load] [STEP: complete] {} executed, {} pending",
            executed.len(),
            pending.len()
        );
        Ok(LoadResult { executed, pending })
    }

    /// Run the selected pending scripts one at a time, stopping at the first failure.
    ///
    /// The pending set is recomputed first, so a script journaled since the last
    /// load is skipped. `Err` means the probe itself failed and nothing ran.
    pub async fn execute_pending(
        &self,
        selection: &Selection,
        log: &dyn UpgradeLog,
    ) -> Result<ExecutionOutcome> {
        let scope = self.folder_scope()?;

        self.journal
            .ensure_schema()
            .await
            .context("Failed to ensure journal schema")?;

        let candidates = self.discover().await?;
        let applied = self.journal.applied_identities().await?;
        let pending = compute_pending(candidates, &applied, &scope);
        let to_run = selection.filter(pending);

        if to_run.is_empty() {
            info!("[PHASE: execute] [STEP: filter] Nothing selected is pending");
            return Ok(ExecutionOutcome::Succeeded {
                applied: Vec::new(),
            });
        }

        info!(
            "[PHASE: execute] [STEP: filter] Running {} script(s)",
            to_run.len()
        );

        let mut applied_now: Vec<ScriptIdentity> = Vec::new();
        for script in to_run {
            let result = self
                .engine
                .perform_upgrade(std::slice::from_ref(&script), log)
                .await;

            if let Some(failure) = result.failure {
                let failed = failure
                    .script_key
                    .as_deref()
                    .map(ScriptIdentity::from_key)
                    .filter(|id| !id.folder.is_empty())
                    .unwrap_or_else(|| script.identity.clone());
                error!(
                    "[PHASE: execute] [STEP: run] {} failed after {} applied: {:#}",
                    failed,
                    applied_now.len(),
                    failure.error
                );
                return Ok(ExecutionOutcome::Failed {
                    applied: applied_now,
                    failed,
                    error: failure.error,
                });
            }

            if result.applied.is_empty() {
                warn!(
                    "[PHASE: execute] [STEP: run] Engine reported no script for {}; treating as applied",
                    script.identity
                );
            }
            applied_now.push(script.identity);
        }

        info!(
            "[PHASE: execute] [STEP: complete] Applied {} script(s)",
            applied_now.len()
        );
        Ok(ExecutionOutcome::Succeeded {
            applied: applied_now,
        })
    }
}
