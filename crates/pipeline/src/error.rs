use std::path::PathBuf;

use t2i2v_comfyui::service::ExecutionError;
use t2i2v_core::error::CoreError;

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Text-to-image.
    Image,
    /// Image-to-video.
    Video,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a pipeline run. Nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Execution service error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("{stage} stage did not complete within {timeout_secs}s")]
    ExecutionTimeout { stage: Stage, timeout_secs: u64 },

    #[error("{stage} stage failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("No {stage} artifact found for prefix '{prefix}'")]
    ArtifactNotFound { stage: Stage, prefix: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
