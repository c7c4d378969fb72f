// Execution journal
// Append-only record of every script applied through this tool, stored in
// [scripts].[DbMigrationHistory] by default. The table manages its own shape:
// ensure_schema() creates it or upgrades older layouts in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use log::{info, warn};
use serde::Serialize;
use tiberius::{Query, Row};

use crate::database::connection::{self, SqlClient};
use crate::error::ConfigError;
use crate::scripts::discovery::read_script_text;
use crate::scripts::key::ScriptIdentity;
use crate::utils::path_resolver::{is_within_folder, normalize_folder};
use crate::utils::validation::validate_sql_identifier;

pub const DEFAULT_JOURNAL_SCHEMA: &str = "scripts";
pub const DEFAULT_JOURNAL_TABLE: &str = "DbMigrationHistory";

/// One journal row as listed in the history view (content omitted).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub id: i32,
    pub script_name: String,
    pub applied_utc: Option<DateTime<Utc>>,
    pub executed_by: Option<String>,
    pub machine_name: Option<String>,
    pub path: Option<String>,
}

/// Persistence for executed scripts.
///
/// Applied time, executing login and machine are filled by the database session,
/// never passed in by the caller.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Create or upgrade the journal table. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<()>;

    /// Every (folder, file) pair recorded so far, read fresh from storage.
    async fn applied_identities(&self) -> Result<Vec<ScriptIdentity>>;

    /// Append one row for a script that has just been executed.
    ///
    /// The stored content is re-read from disk; `fallback_content` is used only when the
    /// file can no longer be read.
    async fn record_applied(&self, identity: &ScriptIdentity, fallback_content: &str)
        -> Result<()>;

    /// All rows, newest first.
    async fn history(&self) -> Result<Vec<HistoryRow>>;

    /// Stored content for a row id; empty when the id is unknown.
    async fn content_by_id(&self, id: i32) -> Result<String>;

    /// Most recent stored content for a file name recorded under `folder_scope`.
    async fn latest_content(&self, file_name: &str, folder_scope: &str)
        -> Result<Option<String>>;
}

/// Validated, bracket-quoted schema + table names.
#[derive(Debug, Clone)]
pub struct JournalTable {
    schema: String,
    table: String,
}

impl JournalTable {
    pub fn new(schema: &str, table: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            schema: validate_sql_identifier(schema)?,
            table: validate_sql_identifier(table)?,
        })
    }

    /// `[schema].[table]`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn bare_schema(&self) -> &str {
        self.schema.trim_matches(['[', ']'])
    }

    fn bare_table(&self) -> &str {
        self.table.trim_matches(['[', ']'])
    }

    /// Idempotent DDL: create schema and table, or bring an older table up to date.
    pub fn ensure_schema_sql(&self) -> String {
        let schema = self.schema.as_str();
        let qualified = self.qualified();
        let bare_schema = self.bare_schema();
        let bare_table = self.bare_table();

        format!(
            r#"
            IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = N'{bare_schema}')
                EXEC(N'CREATE SCHEMA {schema} AUTHORIZATION [dbo]');

            IF NOT EXISTS (SELECT * FROM sys.objects
                           WHERE object_id = OBJECT_ID(N'{qualified}') AND type = N'U')
            BEGIN
                CREATE TABLE {qualified}(
                    [Id]          INT IDENTITY(1,1) NOT NULL PRIMARY KEY,
                    [ScriptName]  NVARCHAR(255) NOT NULL,
                    [Applied]     DATETIME2 NOT NULL CONSTRAINT [DF_{bare_table}_Applied] DEFAULT (SYSUTCDATETIME()),
                    [Path]        NVARCHAR(2048) NULL,
                    [ExecutedBy]  NVARCHAR(128) NULL CONSTRAINT [DF_{bare_table}_ExecutedBy] DEFAULT (SUSER_SNAME()),
                    [MachineName] NVARCHAR(128) NULL CONSTRAINT [DF_{bare_table}_Machine] DEFAULT (HOST_NAME()),
                    [Content]     NVARCHAR(MAX) NULL
                );
            END
            ELSE
            BEGIN
                IF COL_LENGTH(N'{qualified}', N'Path') IS NULL
                    ALTER TABLE {qualified} ADD [Path] NVARCHAR(2048) NULL;

                IF EXISTS (SELECT 1
                           FROM sys.columns c
                           WHERE c.object_id = OBJECT_ID(N'{qualified}')
                             AND c.name = N'Applied'
                             AND c.system_type_id <> TYPE_ID(N'datetime2'))
                BEGIN
                    -- A default bound to the old type blocks ALTER COLUMN; drop it first.
                    DECLARE @df SYSNAME;
                    SELECT @df = dc.name
                    FROM sys.default_constraints dc
                    JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id
                    WHERE dc.parent_object_id = OBJECT_ID(N'{qualified}')
                      AND c.name = N'Applied';
                    IF @df IS NOT NULL
                    BEGIN
                        DECLARE @drop NVARCHAR(512) = N'ALTER TABLE {qualified} DROP CONSTRAINT ' + QUOTENAME(@df);
                        EXEC sp_executesql @drop;
                    END
                    ALTER TABLE {qualified} ALTER COLUMN [Applied] DATETIME2 NOT NULL;
                END

                IF NOT EXISTS (
                    SELECT 1
                    FROM sys.default_constraints dc
                    JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id
                    WHERE dc.parent_object_id = OBJECT_ID(N'{qualified}')
                      AND c.name = N'Applied'
                )
                BEGIN
                    ALTER TABLE {qualified} ADD CONSTRAINT [DF_{bare_table}_Applied] DEFAULT (SYSUTCDATETIME()) FOR [Applied];
                END

                IF COL_LENGTH(N'{qualified}', N'Content') IS NULL
                    ALTER TABLE {qualified} ADD [Content] NVARCHAR(MAX) NULL;
            END
            "#
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ([ScriptName],[Applied],[Path],[ExecutedBy],[MachineName],[Content]) \
             VALUES (@P1, SYSUTCDATETIME(), @P2, SUSER_SNAME(), HOST_NAME(), @P3)",
            self.qualified()
        )
    }
}

impl Default for JournalTable {
    fn default() -> Self {
        Self {
            schema: format!("[{}]", DEFAULT_JOURNAL_SCHEMA),
            table: format!("[{}]", DEFAULT_JOURNAL_TABLE),
        }
    }
}

/// SQL Server journal. Opens a fresh connection per call.
#[derive(Debug, Clone)]
pub struct SqlServerJournal {
    connection_string: String,
    table: JournalTable,
}

impl SqlServerJournal {
    pub fn new(connection_string: impl Into<String>, table: JournalTable) -> Self {
        Self {
            connection_string: connection_string.into(),
            table,
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Insert a journal row on an existing session, so callers can put it in the same
    /// transaction as the script itself.
    pub async fn store_executed_script(
        &self,
        client: &mut SqlClient,
        identity: &ScriptIdentity,
        fallback_content: &str,
    ) -> Result<()> {
        let folder = normalize_folder(&identity.folder);
        let content = current_script_content(identity, fallback_content);

        let insert_sql = self.table.insert_sql();
        let mut q = Query::new(insert_sql);
        q.bind(identity.file_name.as_str());
        q.bind(folder.as_str());
        q.bind(content.as_str());

        let mut stream = q
            .query(client)
            .await
            .with_context(|| format!("Failed to journal script: {}", identity.file_name))?;
        while stream.try_next().await?.is_some() {}

        info!(
            "[PHASE: journal] [STEP: record_applied] Journaled {} ({} chars)",
            identity,
            content.chars().count()
        );
        Ok(())
    }

    async fn query_rows(&self, query: Query<'_>, what: &str) -> Result<Vec<Row>> {
        let mut client = connection::connect(&self.connection_string).await?;
        let rows = query
            .query(&mut client)
            .await
            .with_context(|| format!("Failed to query {}", what))?
            .into_first_result()
            .await
            .with_context(|| format!("Failed to read {}", what))?;
        Ok(rows)
    }
}

#[async_trait]
impl JournalStore for SqlServerJournal {
    async fn ensure_schema(&self) -> Result<()> {
        info!(
            "[PHASE: journal] [STEP: ensure_schema] Ensuring journal table {}",
            self.table.qualified()
        );

        let mut client = connection::connect(&self.connection_string).await?;
        let sql = self.table.ensure_schema_sql();
        let mut stream = client
            .simple_query(sql)
            .await
            .with_context(|| format!("Failed to ensure journal table {}", self.table.qualified()))?;
        while stream
            .try_next()
            .await
            .with_context(|| "Failed reading results of journal schema upgrade")?
            .is_some()
        {}
        Ok(())
    }

    async fn applied_identities(&self) -> Result<Vec<ScriptIdentity>> {
        let sql = format!(
            "SELECT [Path],[ScriptName] FROM {}",
            self.table.qualified()
        );
        let rows = self
            .query_rows(Query::new(sql), "applied scripts")
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let folder = row.try_get::<&str, _>(0)?.unwrap_or_default();
            let file = row.try_get::<&str, _>(1)?.unwrap_or_default();
            out.push(ScriptIdentity::new(normalize_folder(folder), file));
        }

        info!(
            "[PHASE: journal] [STEP: applied_identities] {} journaled scripts",
            out.len()
        );
        Ok(out)
    }

    async fn record_applied(
        &self,
        identity: &ScriptIdentity,
        fallback_content: &str,
    ) -> Result<()> {
        let mut client = connection::connect(&self.connection_string).await?;
        self.store_executed_script(&mut client, identity, fallback_content)
            .await
    }

    async fn history(&self) -> Result<Vec<HistoryRow>> {
        let sql = format!(
            "SELECT [Id],[ScriptName],[Applied],[ExecutedBy],[MachineName],[Path] FROM {}",
            self.table.qualified()
        );
        let rows = self.query_rows(Query::new(sql), "journal history").await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(HistoryRow {
                id: row.try_get::<i32, _>(0)?.unwrap_or_default(),
                script_name: row.try_get::<&str, _>(1)?.unwrap_or_default().to_string(),
                applied_utc: row
                    .try_get::<NaiveDateTime, _>(2)?
                    .map(|naive| naive.and_utc()),
                executed_by: row.try_get::<&str, _>(3)?.map(str::to_string),
                machine_name: row.try_get::<&str, _>(4)?.map(str::to_string),
                path: row.try_get::<&str, _>(5)?.map(str::to_string),
            });
        }

        sort_history(&mut out);
        Ok(out)
    }

    async fn content_by_id(&self, id: i32) -> Result<String> {
        if id <= 0 {
            return Ok(String::new());
        }
        let sql = format!(
            "SELECT [Content] FROM {} WHERE [Id] = @P1",
            self.table.qualified()
        );
        let mut q = Query::new(sql);
        q.bind(id);
        let rows = self.query_rows(q, "script content").await?;

        Ok(rows
            .first()
            .map(|r| r.try_get::<&str, _>(0))
            .transpose()?
            .flatten()
            .unwrap_or_default()
            .to_string())
    }

    async fn latest_content(
        &self,
        file_name: &str,
        folder_scope: &str,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT [Path],[Content] FROM {} WHERE [ScriptName] = @P1 ORDER BY [Applied] DESC",
            self.table.qualified()
        );
        let mut q = Query::new(sql);
        q.bind(file_name);
        let rows = self.query_rows(q, "script content").await?;

        for row in rows {
            let path = row.try_get::<&str, _>(0)?.unwrap_or_default();
            if !is_within_folder(path, folder_scope) {
                continue;
            }
            if let Some(content) = row.try_get::<&str, _>(1)? {
                if !content.is_empty() {
                    return Ok(Some(content.to_string()));
                }
            }
        }
        Ok(None)
    }
}

/// Content to journal: the file as it is on disk right now, else what the caller executed.
pub(crate) fn current_script_content(identity: &ScriptIdentity, fallback: &str) -> String {
    match read_script_text(&identity.full_path()) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "[PHASE: journal] [STEP: record_applied] Could not re-read {}: {}; journaling executed text",
                identity, e
            );
            fallback.to_string()
        }
    }
}

/// Newest first, then script name (case-insensitive).
pub fn sort_history(rows: &mut [HistoryRow]) {
    rows.sort_by(|a, b| {
        b.applied_utc
            .cmp(&a.applied_utc)
            .then_with(|| a.script_name.to_lowercase().cmp(&b.script_name.to_lowercase()))
    });
}
