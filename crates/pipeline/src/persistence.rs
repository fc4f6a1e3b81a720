//! Run and iteration records written to disk.
//!
//! Layout under the pipeline root:
//!
//! ```text
//! configs/run_<run_id>.json
//! runs/run_<run_id>/iter_0001/{image.png, video.mp4, prompt_t2i.txt,
//!                              prompt_i2v.txt, params_t2i.json,
//!                              params_i2v.json, metadata.json}
//! state/knowledge.json
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use t2i2v_core::params::{self, ParameterSet};

use crate::config::{create_dir, PipelineConfig};
use crate::error::PipelineError;

pub const PROMPT_T2I_FILE: &str = "prompt_t2i.txt";
pub const PROMPT_I2V_FILE: &str = "prompt_i2v.txt";
pub const PARAMS_T2I_FILE: &str = "params_t2i.json";
pub const PARAMS_I2V_FILE: &str = "params_i2v.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const KNOWLEDGE_FILE: &str = "knowledge.json";

/// Write `value` as pretty JSON, creating the parent directory.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).map_err(PipelineError::io(path))
}

pub fn save_text(path: &Path, text: &str) -> Result<(), PipelineError> {
    std::fs::write(path, text).map_err(PipelineError::io(path))
}

// ---------------------------------------------------------------------------
// Run snapshot
// ---------------------------------------------------------------------------

/// Configuration recorded once per run.
#[derive(Debug, Serialize)]
pub struct RunSnapshot<'a> {
    pub run_id: &'a str,
    pub started_at: chrono::DateTime<chrono::Local>,
    pub image_template_hash: String,
    pub video_template_hash: String,
    pub config: &'a PipelineConfig,
}

pub fn run_snapshot_path(config: &PipelineConfig, run_id: &str) -> PathBuf {
    config.configs_dir().join(format!("run_{run_id}.json"))
}

// ---------------------------------------------------------------------------
// Iteration records
// ---------------------------------------------------------------------------

/// Where an iteration's artifacts came from and where they went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetadata {
    pub iteration: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub frame_size: String,
    pub image_prompt_id: String,
    pub video_prompt_id: String,
    pub produced_image: PathBuf,
    pub produced_video: PathBuf,
    pub local_image: PathBuf,
    pub local_video: PathBuf,
    pub service_input_image: PathBuf,
}

/// Everything persisted for one finished iteration.
#[derive(Debug)]
pub struct IterationRecord<'a> {
    pub dir: &'a Path,
    pub image_prompt: &'a str,
    pub video_prompt: &'a str,
    pub image_params: &'a ParameterSet,
    pub video_params: &'a ParameterSet,
    pub metadata: &'a IterationMetadata,
}

/// Write prompts, parameter snapshots and metadata into the iteration
/// directory.
pub fn save_iteration(record: &IterationRecord<'_>) -> Result<(), PipelineError> {
    save_text(&record.dir.join(PROMPT_T2I_FILE), record.image_prompt)?;
    save_text(&record.dir.join(PROMPT_I2V_FILE), record.video_prompt)?;
    save_json(&record.dir.join(PARAMS_T2I_FILE), record.image_params)?;
    save_json(&record.dir.join(PARAMS_I2V_FILE), record.video_params)?;
    save_json(&record.dir.join(METADATA_FILE), record.metadata)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Knowledge log
// ---------------------------------------------------------------------------

/// Append-only history of finished iterations, shared across runs.
///
/// Unknown top-level keys written by other tools are preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeLog {
    #[serde(default)]
    pub best_score: f64,
    #[serde(default)]
    pub best_params: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for KnowledgeLog {
    fn default() -> Self {
        Self {
            best_score: 0.0,
            best_params: Map::new(),
            history: Vec::new(),
            other: Map::new(),
        }
    }
}

/// One knowledge log entry.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry<'a> {
    pub video: &'a Path,
    pub source_image: &'a Path,
    pub timestamp: i64,
    pub params: &'a ParameterSet,
    pub metrics: Map<String, Value>,
    /// `[sampler, scheduler]` of the video stage.
    pub combo: [Option<String>; 2],
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub photo_prompt: &'a str,
    pub photo_negative: &'a str,
}

impl KnowledgeEntry<'_> {
    pub fn combo_of(params: &ParameterSet) -> [Option<String>; 2] {
        [
            params.text(params::SAMPLER).ok().flatten(),
            params.text(params::SCHEDULER).ok().flatten(),
        ]
    }
}

pub fn knowledge_path(config: &PipelineConfig) -> PathBuf {
    config.state_dir().join(KNOWLEDGE_FILE)
}

/// Read-modify-write append to the knowledge log.
///
/// Not locked: assumes one sequencer process per root.
pub fn append_knowledge(path: &Path, entry: &KnowledgeEntry<'_>) -> Result<(), PipelineError> {
    let mut log = match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<KnowledgeLog>(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => KnowledgeLog::default(),
        Err(e) => return Err(PipelineError::io(path)(e)),
    };
    log.history.push(serde_json::to_value(entry)?);
    save_json(path, &log)
}

/// [`append_knowledge`], logging instead of failing.
pub fn append_knowledge_best_effort(path: &Path, entry: &KnowledgeEntry<'_>) {
    if let Err(e) = append_knowledge(path, entry) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to update knowledge log");
    }
}
