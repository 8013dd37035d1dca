//! JSON output structures for the copytask CLI

use chrono::{DateTime, Utc};
use copytask_engine::{TaskSnapshot, TaskState};
use serde::{Deserialize, Serialize};

/// Complete JSON output for a copy run
#[derive(Debug, Serialize, Deserialize)]
pub struct CopyResultJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Final snapshot of every task the run created
    pub tasks: Vec<TaskSnapshot>,
    /// Overall result
    pub result: OperationResult,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// copytask version
    pub version: String,
    /// Operation type
    pub operation: String,
    /// Time the output was produced
    pub timestamp: DateTime<Utc>,
}

/// Overall result of the run
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the last task completed without errors
    pub success: bool,
    /// State of the last task
    pub state: TaskState,
    /// Number of failed items in the last task
    pub error_count: usize,
}

impl CopyResultJson {
    /// Build the output from the snapshots of a run, last task last
    pub fn new(tasks: Vec<TaskSnapshot>) -> Self {
        let last = tasks.last();
        let result = OperationResult {
            success: last.is_some_and(|t| t.state == TaskState::Completed),
            state: last.map_or(TaskState::Failed, |t| t.state),
            error_count: last.map_or(0, |t| t.errors.len()),
        };
        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: "copy".to_string(),
                timestamp: Utc::now(),
            },
            tasks,
            result,
        }
    }

    /// Pretty-printed JSON text
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
