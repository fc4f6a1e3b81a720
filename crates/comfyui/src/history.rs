//! Interpretation of ComfyUI `/history/{prompt_id}` documents.
//!
//! The endpoint returns `{}` while a prompt is queued or running, and
//! `{"<prompt_id>": {"outputs": {...}, "status": {...}}}` once it has
//! finished:
//!
//! ```json
//! {
//!   "abc": {
//!     "outputs": { "9": { "images": [{ "filename": "x_00001_.png", "subfolder": "run", "type": "output" }] } },
//!     "status": { "status_str": "success", "completed": true, "messages": [] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status string ComfyUI reports for a failed prompt.
const STATUS_ERROR: &str = "error";

/// Message kind carrying the exception details of a failed node.
const EXECUTION_ERROR_MESSAGE: &str = "execution_error";

/// Output list keys that hold file descriptors.
const OUTPUT_FILE_KEYS: &[&str] = &["images", "gifs", "videos"];

/// Where a prompt stands according to its history entry.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStatus {
    /// No history yet (queued or still executing).
    Pending,
    /// Finished successfully with the given per-node outputs.
    Completed { outputs: Value },
    /// Finished with an execution error.
    Failed { message: String },
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: Value,
    #[serde(default)]
    status: Option<ExecutionStatus>,
}

#[derive(Debug, Deserialize)]
struct ExecutionStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    messages: Vec<(String, Value)>,
}

/// A file reported in a prompt's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Classify the history document for `prompt_id`.
pub fn parse_history(prompt_id: &str, history: &Value) -> HistoryStatus {
    let Some(raw) = history.get(prompt_id) else {
        return HistoryStatus::Pending;
    };
    let entry = match HistoryEntry::deserialize(raw) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(prompt_id, error = %e, "Unrecognised history entry");
            return HistoryStatus::Pending;
        }
    };

    match entry.status {
        Some(status) if status.status_str.as_deref() == Some(STATUS_ERROR) => {
            HistoryStatus::Failed {
                message: error_message(&status.messages),
            }
        }
        Some(status) if status.completed => HistoryStatus::Completed {
            outputs: entry.outputs,
        },
        Some(_) => HistoryStatus::Pending,
        // Older servers omit `status`; outputs alone mean the prompt ran.
        None if entry.outputs.as_object().is_some_and(|o| !o.is_empty()) => {
            HistoryStatus::Completed {
                outputs: entry.outputs,
            }
        }
        None => HistoryStatus::Pending,
    }
}

/// Every file descriptor listed under the outputs of any node.
pub fn output_files(outputs: &Value) -> Vec<OutputFile> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };
    nodes
        .values()
        .flat_map(|node| OUTPUT_FILE_KEYS.iter().filter_map(move |key| node.get(*key)))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|file| OutputFile::deserialize(file).ok())
        .collect()
}

fn error_message(messages: &[(String, Value)]) -> String {
    messages
        .iter()
        .find(|(kind, _)| kind == EXECUTION_ERROR_MESSAGE)
        .and_then(|(_, data)| {
            let text = data.get("exception_message")?.as_str()?.trim();
            let node = data.get("node_id").and_then(Value::as_str).unwrap_or("?");
            Some(format!("node {node}: {text}"))
        })
        .unwrap_or_else(|| "execution failed".to_string())
}
