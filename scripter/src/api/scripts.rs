// Script commands
// Wire configuration to the journal, engine and services for each CLI action.

use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::connection::{self, DbTestResult, RealDbConnector};
use crate::database::engine::{SqlServerEngine, UpgradeLog};
use crate::database::journal::{JournalStore, SqlServerJournal};
use crate::models::responses::{HistoryResponse, LoadResponse, PreviewResponse, RunResponse};
use crate::scripts::preview::PreviewService;
use crate::scripts::service::{ScriptService, Selection};
use crate::utils::logging::mask_connection_string;

/// What to preview.
#[derive(Debug, Clone)]
pub enum PreviewTarget {
    Id(i32),
    FileName(String),
}

fn journal(cfg: &AppConfig) -> Result<SqlServerJournal> {
    Ok(SqlServerJournal::new(
        cfg.connection_string()?,
        cfg.journal_table()?,
    ))
}

fn script_service(cfg: &AppConfig) -> Result<ScriptService> {
    cfg.validate()?;
    let journal = journal(cfg)?;
    let engine = SqlServerEngine::new(journal.clone());
    Ok(ScriptService::new(
        Arc::new(journal),
        Arc::new(engine),
        cfg.provider()?,
    ))
}

pub async fn load(cfg: &AppConfig) -> Result<LoadResponse> {
    info!(
        "[PHASE: load] [STEP: request] load requested for {}",
        mask_connection_string(&cfg.connection_string)
    );
    let service = script_service(cfg)?;
    let result = service.load_scripts().await?;
    let root = cfg.scripts_root()?;
    Ok(LoadResponse::new(root.to_string_lossy().to_string(), result))
}

pub async fn run(cfg: &AppConfig, selection: &Selection, log: &dyn UpgradeLog) -> Result<RunResponse> {
    info!("[PHASE: execute] [STEP: request] run requested ({:?})", selection);
    let service = script_service(cfg)?;
    let outcome = service.execute_pending(selection, log).await?;
    Ok(RunResponse::from(outcome))
}

pub async fn history(cfg: &AppConfig) -> Result<HistoryResponse> {
    let journal = journal(cfg)?;
    journal.ensure_schema().await?;
    let rows = journal.history().await?;
    Ok(HistoryResponse { rows })
}

pub async fn preview(cfg: &AppConfig, target: &PreviewTarget, max_len: usize) -> Result<PreviewResponse> {
    let journal: Arc<dyn JournalStore> = Arc::new(journal(cfg)?);
    match target {
        PreviewTarget::Id(id) => {
            // Lookup by id never touches the scripts folder.
            let root = cfg.scripts_folder.clone().unwrap_or_default();
            let text = PreviewService::new(journal, root)
                .preview_by_id(*id, max_len)
                .await?;
            Ok(PreviewResponse {
                target: format!("#{}", id),
                text,
            })
        }
        PreviewTarget::FileName(name) => {
            let text = PreviewService::new(journal, cfg.scripts_root()?)
                .preview_by_file_name(name, max_len)
                .await?;
            Ok(PreviewResponse {
                target: name.clone(),
                text,
            })
        }
    }
}

pub async fn test_connection(cfg: &AppConfig) -> DbTestResult {
    connection::test_connection(&RealDbConnector, &cfg.connection_string).await
}

pub async fn ensure_schema(cfg: &AppConfig) -> Result<()> {
    journal(cfg)?.ensure_schema().await
}
