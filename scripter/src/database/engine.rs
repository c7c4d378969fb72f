// Script execution engine
// Runs an ordered list of scripts against SQL Server and journals each one.
// Each script and its journal row share one transaction, so the journal never
// claims a script that was rolled back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use log::{error, info, warn};

use crate::database::connection::{self, SqlClient};
use crate::database::journal::SqlServerJournal;
use crate::scripts::discovery::ScriptCandidate;
use crate::scripts::key::ScriptIdentity;

/// Sink for progress messages produced while scripts run.
pub trait UpgradeLog: Send + Sync {
    fn write_information(&self, message: &str);
    fn write_warning(&self, message: &str);
    fn write_error(&self, message: &str);
}

/// Forwards execution messages to the `log` facade.
pub struct LogUpgradeLog;

impl UpgradeLog for LogUpgradeLog {
    fn write_information(&self, message: &str) {
        info!("[PHASE: execute] {}", message);
    }

    fn write_warning(&self, message: &str) {
        warn!("[PHASE: execute] {}", message);
    }

    fn write_error(&self, message: &str) {
        error!("[PHASE: execute] {}", message);
    }
}

/// Discards everything.
pub struct NullUpgradeLog;

impl UpgradeLog for NullUpgradeLog {
    fn write_information(&self, _message: &str) {}
    fn write_warning(&self, _message: &str) {}
    fn write_error(&self, _message: &str) {}
}

/// The script the engine stopped on, and why.
#[derive(Debug)]
pub struct UpgradeFailure {
    /// Script key (`folder||file`) as reported by the engine; may be a bare file name.
    pub script_key: Option<String>,
    pub error: anyhow::Error,
}

/// Outcome of one engine run.
#[derive(Debug, Default)]
pub struct UpgradeResult {
    pub applied: Vec<ScriptIdentity>,
    pub failure: Option<UpgradeFailure>,
}

impl UpgradeResult {
    pub fn successful(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs scripts in the given order, journaling each success, stopping at the first failure.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn perform_upgrade(
        &self,
        scripts: &[ScriptCandidate],
        log: &dyn UpgradeLog,
    ) -> UpgradeResult;
}

/// SQL Server engine over tiberius.
pub struct SqlServerEngine {
    journal: SqlServerJournal,
}

impl SqlServerEngine {
    /// The engine connects with the journal's connection string.
    pub fn new(journal: SqlServerJournal) -> Self {
        Self { journal }
    }

    async fn apply_script(&self, script: &ScriptCandidate, log: &dyn UpgradeLog) -> Result<()> {
        let start_time = Utc::now();
        let name = &script.identity.file_name;
        log.write_information(&format!("Executing Database Server script '{}'", name));

        let mut client = connection::connect(self.journal.connection_string()).await?;

        // `GO` is a client-side batch separator, not T-SQL.
        let batches = split_sql_server_batches(&script.contents);

        {
            let mut stream = client
                .simple_query("BEGIN TRANSACTION")
                .await
                .with_context(|| "Failed to begin SQL Server transaction")?;
            while stream.try_next().await?.is_some() {}
        }

        let exec_result: Result<()> = async {
            run_batches(&mut client, &batches, name).await?;
            self.journal
                .store_executed_script(&mut client, &script.identity, &script.contents)
                .await
        }
        .await;

        match exec_result {
            Ok(()) => {
                let mut stream = client
                    .simple_query("COMMIT TRANSACTION")
                    .await
                    .with_context(|| "Failed to commit SQL Server transaction")?;
                while stream.try_next().await?.is_some() {}

                let elapsed_ms = (Utc::now() - start_time).num_milliseconds();
                info!(
                    "[PHASE: execute] [STEP: apply_script] Applied {} ({}ms)",
                    script.identity, elapsed_ms
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = rollback(&mut client).await {
                    warn!(
                        "[PHASE: execute] [STEP: rollback] Rollback failed for {}: {:#}",
                        name, rollback_err
                    );
                }
                Err(e).with_context(|| format!("Script failed, transaction rolled back: {}", name))
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for SqlServerEngine {
    async fn perform_upgrade(
        &self,
        scripts: &[ScriptCandidate],
        log: &dyn UpgradeLog,
    ) -> UpgradeResult {
        let mut result = UpgradeResult::default();
        log.write_information("Beginning database upgrade");

        for script in scripts {
            match self.apply_script(script, log).await {
                Ok(()) => result.applied.push(script.identity.clone()),
                Err(e) => {
                    log.write_error(&format!(
                        "Script '{}' failed: {:#}",
                        script.identity.file_name, e
                    ));
                    log.write_error("Upgrade stopped; later scripts were not run");
                    result.failure = Some(UpgradeFailure {
                        script_key: Some(script.identity.key()),
                        error: e,
                    });
                    return result;
                }
            }
        }

        log.write_information("Upgrade successful");
        result
    }
}

async fn run_batches(client: &mut SqlClient, batches: &[String], name: &str) -> Result<()> {
    for (idx, batch) in batches.iter().enumerate() {
        let sql = batch.trim();
        if sql.is_empty() {
            continue;
        }

        let mut stream = client.simple_query(sql).await.with_context(|| {
            format!("Failed to execute batch {} of {}", idx + 1, name)
        })?;

        // Drain all result sets.
        while stream
            .try_next()
            .await
            .with_context(|| format!("Failed reading results for {} batch {}", name, idx + 1))?
            .is_some()
        {}
    }
    Ok(())
}

async fn rollback(client: &mut SqlClient) -> Result<()> {
    let stream = client
        .simple_query("ROLLBACK TRANSACTION")
        .await
        .with_context(|| "Failed to send ROLLBACK TRANSACTION")?;
    drain_results(stream)
        .await
        .with_context(|| "Failed reading ROLLBACK TRANSACTION results")
}

/// Read a result stream to the end, surfacing the first error.
async fn drain_results<S, T, E>(mut stream: S) -> Result<(), E>
where
    S: futures::Stream<Item = Result<T, E>> + Unpin,
{
    while stream.try_next().await?.is_some() {}
    Ok(())
}

/// Split a SQL Server script into batches separated by `GO` lines.
///
/// `GO` is not valid T-SQL; it's a client-side batch separator used by tools like SSMS/sqlcmd.
/// `GO n` (repeat count) runs the preceding batch n times.
pub fn split_sql_server_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        if let Some(repeat) = go_separator(line) {
            if !current.trim().is_empty() {
                for _ in 0..repeat {
                    batches.push(current.clone());
                }
            }
            current = String::new();
            continue;
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current);
    }

    batches
}

fn go_separator(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let mut parts = trimmed.split_whitespace();
    let head = parts.next()?;
    if !head.eq_ignore_ascii_case("GO") {
        return None;
    }
    match (parts.next(), parts.next()) {
        (None, _) => Some(1),
        (Some(n), None) => n.parse::<usize>().ok().filter(|n| *n > 0),
        _ => None,
    }
}
