use serde::{Deserialize, Serialize};

use crate::value::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// Record of one run, kept in the procedure's run history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub procedure_id: String,
    pub run_id: String,
    pub state: RunState,
    pub started_ms: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_ms: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a successful `createRun` returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub id: String,
    pub status: RunState,
    pub outputs: serde_json::Value,
}
