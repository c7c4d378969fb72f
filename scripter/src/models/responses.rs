// Command response models
// Serialized as JSON by the CLI with `--json`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::journal::HistoryRow;
use crate::scripts::key::ScriptIdentity;
use crate::scripts::reconcile::ExecutedRow;
use crate::scripts::service::{ExecutionOutcome, LoadResult, PendingScript};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingScriptView {
    pub script_name: String,
    pub folder: String,
    pub release: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<PendingScript> for PendingScriptView {
    fn from(p: PendingScript) -> Self {
        Self {
            script_name: p.identity.file_name,
            folder: p.identity.folder,
            release: p.release,
            created_utc: p.created_utc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResponse {
    pub scripts_folder: String,
    pub executed: Vec<ExecutedRow>,
    pub pending: Vec<PendingScriptView>,
}

impl LoadResponse {
    pub fn new(scripts_folder: String, result: LoadResult) -> Self {
        Self {
            scripts_folder,
            executed: result.executed,
            pending: result.pending.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    pub applied: Vec<ScriptIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<ScriptIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExecutionOutcome> for RunResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Succeeded { applied } => Self {
                success: true,
                applied,
                failed: None,
                error: None,
            },
            ExecutionOutcome::Failed {
                applied,
                failed,
                error,
            } => Self {
                success: false,
                applied,
                failed: Some(failed),
                error: Some(format!("{:#}", error)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub rows: Vec<HistoryRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub target: String,
    pub text: String,
}
