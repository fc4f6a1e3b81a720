//! Sequencer configuration.
//!
//! Everything the sequencer needs is passed in explicitly; nothing is read
//! from the environment here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::PipelineError;
use crate::frames::{FrameSize, FALLBACK_FRAME_SIZE};

/// Default text-to-image wait.
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(1200);
/// Default image-to-video wait.
pub const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(1800);
/// Default video frame rate.
pub const DEFAULT_FPS: u32 = 20;
/// Default video duration in seconds.
pub const DEFAULT_SECONDS: f64 = 6.0;
/// Leading path component of every output filename prefix.
pub const DEFAULT_PREFIX_ROOT: &str = "agent_t2i2v";
/// Reference parameter file looked up under `state/` when none is given.
pub const DEFAULT_REFERENCE_FILE: &str = "reference_params.json";

/// Subdirectories created under the pipeline root.
const ROOT_SUBDIRS: &[&str] = &[
    "workflows",
    "runs",
    "input",
    "output",
    "logs",
    "configs",
    "state",
];

/// Prompt text for both stages.
#[derive(Debug, Clone, Serialize)]
pub struct StagePrompts {
    /// Subject half of the image prompt.
    pub part_a: String,
    /// Style half of the image prompt.
    pub part_b: String,
    pub image_negative: String,
    /// Camera / motion description appended for the video stage.
    pub motion: String,
    pub video_negative: String,
}

impl StagePrompts {
    /// Full image prompt: `part_a, part_b`.
    pub fn image_prompt(&self) -> String {
        join_prompt(&[&self.part_a, &self.part_b])
    }

    /// Video prompt: the image description followed by the motion.
    pub fn video_prompt(&self) -> String {
        join_prompt(&[&self.part_a, &self.part_b, &self.motion])
    }
}

impl Default for StagePrompts {
    fn default() -> Self {
        let negative =
            "blurry, low quality, jpeg artifacts, bad anatomy, extra limbs, text, watermark, cropped";
        Self {
            part_a: "ultra photorealistic full-body woman, standing in a field, head-to-toe, no crop"
                .to_string(),
            part_b: "professional photography, cinematic lighting, high detail".to_string(),
            image_negative: negative.to_string(),
            motion: "slow cinematic approach, gentle arc, soft breathing, subtle hair movement"
                .to_string(),
            video_negative: negative.to_string(),
        }
    }
}

fn join_prompt(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Pipeline working area (`runs/`, `configs/`, `state/`, ...).
    pub root: PathBuf,
    /// Directory the execution service reads input images from.
    pub service_input_dir: PathBuf,
    /// Directory the execution service writes outputs into.
    pub service_output_dir: PathBuf,
    pub iterations: usize,
    pub sizes: Vec<FrameSize>,
    pub randomize_sizes: bool,
    pub fps: u32,
    /// Inclusive frame-rate range; when set every iteration draws from it.
    pub fps_range: Option<(u32, u32)>,
    pub seconds: f64,
    #[serde(serialize_with = "serialize_secs")]
    pub image_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub video_timeout: Duration,
    pub prompts: StagePrompts,
    /// Reference parameter file; defaults to `state/reference_params.json`.
    pub reference_file: Option<PathBuf>,
    pub prefix_root: String,
}

impl PipelineConfig {
    /// Defaults rooted at `root`, with service directories under it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            service_input_dir: root.join("input"),
            service_output_dir: root.join("output"),
            root,
            iterations: 10,
            sizes: vec![FALLBACK_FRAME_SIZE],
            randomize_sizes: false,
            fps: DEFAULT_FPS,
            fps_range: None,
            seconds: DEFAULT_SECONDS,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            prompts: StagePrompts::default(),
            reference_file: None,
            prefix_root: DEFAULT_PREFIX_ROOT.to_string(),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn reference_path(&self) -> PathBuf {
        self.reference_file
            .clone()
            .unwrap_or_else(|| self.state_dir().join(DEFAULT_REFERENCE_FILE))
    }

    /// Create the root layout and the service directories.
    pub fn ensure_dirs(&self) -> Result<(), PipelineError> {
        let service_dirs = [&self.service_input_dir, &self.service_output_dir];
        for dir in ROOT_SUBDIRS
            .iter()
            .map(|d| self.root.join(d))
            .chain(service_dirs.into_iter().cloned())
        {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

pub(crate) fn create_dir(dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir).map_err(PipelineError::io(dir))
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_conventions() {
        let config = PipelineConfig::new("/tmp/agent");
        assert_eq!(config.image_timeout, Duration::from_secs(1200));
        assert_eq!(config.video_timeout, Duration::from_secs(1800));
        assert_eq!(config.fps, 20);
        assert_eq!(config.seconds, 6.0);
        assert_eq!(
            config.reference_path(),
            PathBuf::from("/tmp/agent/state/reference_params.json")
        );
    }

    #[test]
    fn prompts_join_non_empty_parts() {
        let prompts = StagePrompts {
            part_a: "a woman".into(),
            part_b: " ".into(),
            image_negative: String::new(),
            motion: "slow pan".into(),
            video_negative: String::new(),
        };
        assert_eq!(prompts.image_prompt(), "a woman");
        assert_eq!(prompts.video_prompt(), "a woman, slow pan");
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::new(dir.path().join("agent"));
        config.service_input_dir = dir.path().join("comfy/input");
        config.ensure_dirs().unwrap();

        for sub in ROOT_SUBDIRS {
            assert!(config.root.join(sub).is_dir(), "{sub} missing");
        }
        assert!(config.service_input_dir.is_dir());
    }

    #[test]
    fn config_snapshot_serializes_timeouts_as_seconds() {
        let config = PipelineConfig::new("/tmp/agent");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["image_timeout"], 1200);
        assert_eq!(json["prompts"]["part_b"], "professional photography, cinematic lighting, high detail");
    }
}
