//! Command-line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use t2i2v_core::resolver::TemplateFamily;
use t2i2v_pipeline::config::{PipelineConfig, StagePrompts};
use t2i2v_pipeline::frames::parse_sizes;

/// Two-stage text-to-image-to-video generation against ComfyUI
#[derive(Debug, Parser)]
#[command(name = "t2i2v-worker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the image-then-video pipeline
    Run(RunArgs),
    /// Apply parameters to a template and print the resulting workflow
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// ComfyUI base URL
    #[arg(long, env = "COMFYUI_API_URL", default_value = "http://127.0.0.1:8188")]
    pub api: String,

    /// Pipeline root for runs, configs and state
    #[arg(long, env = "T2I2V_ROOT", default_value = "/workspace/Agent_T2I2V")]
    pub root: PathBuf,

    /// Text-to-image workflow template (API format JSON)
    #[arg(long)]
    pub image_workflow: PathBuf,

    /// Image-to-video workflow template (API format JSON)
    #[arg(long)]
    pub i2v_workflow: PathBuf,

    /// How roles are resolved in the image template
    #[arg(long, default_value = "generic", value_parser = parse_family)]
    pub image_family: TemplateFamily,

    /// Reference parameter combinations for the video stage
    #[arg(long)]
    pub reference_file: Option<PathBuf>,

    /// Candidate frame sizes, cycled per iteration
    #[arg(long, default_value = "960x540,1280x720,768x432")]
    pub i2v_sizes: String,

    #[arg(long, default_value_t = 20)]
    pub i2v_fps: u32,

    #[arg(long, default_value_t = 6.0)]
    pub i2v_seconds: f64,

    /// Pick frame sizes at random instead of cycling
    #[arg(long)]
    pub randomize_sizes: bool,

    /// Draw the frame rate from [--fps-min, --fps-max] each iteration
    #[arg(long)]
    pub randomize_fps: bool,

    #[arg(long, default_value_t = 20)]
    pub fps_min: u32,

    #[arg(long, default_value_t = 35)]
    pub fps_max: u32,

    #[arg(long, default_value_t = 10)]
    pub iterations: usize,

    /// Directory ComfyUI loads input images from
    #[arg(long, env = "COMFYUI_INPUT_DIR", default_value = "/workspace/ComfyUI/input")]
    pub comfy_input_dir: PathBuf,

    /// Directory ComfyUI writes outputs into
    #[arg(long, env = "COMFYUI_OUTPUT_DIR", default_value = "/workspace/ComfyUI/output")]
    pub comfy_output_dir: PathBuf,

    #[arg(long, default_value_t = 2)]
    pub poll_interval_secs: u64,

    #[arg(long, default_value_t = 1200)]
    pub image_timeout_secs: u64,

    #[arg(long, default_value_t = 1800)]
    pub video_timeout_secs: u64,

    /// Subject half of the image prompt
    #[arg(long)]
    pub prompt_a: Option<String>,

    /// Style half of the image prompt
    #[arg(long)]
    pub prompt_b: Option<String>,

    /// Negative prompt for the image stage
    #[arg(long)]
    pub negative: Option<String>,

    /// Motion description appended to the video prompt
    #[arg(long)]
    pub motion: Option<String>,

    /// Negative prompt for the video stage (defaults to --negative)
    #[arg(long)]
    pub video_negative: Option<String>,
}

impl RunArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = StagePrompts::default();
        let image_negative = self.negative.clone().unwrap_or(defaults.image_negative);
        let video_negative = self
            .video_negative
            .clone()
            .or_else(|| self.negative.clone())
            .unwrap_or(defaults.video_negative);
        let prompts = StagePrompts {
            part_a: self.prompt_a.clone().unwrap_or(defaults.part_a),
            part_b: self.prompt_b.clone().unwrap_or(defaults.part_b),
            image_negative,
            motion: self.motion.clone().unwrap_or(defaults.motion),
            video_negative,
        };

        let mut config = PipelineConfig::new(&self.root);
        config.service_input_dir = self.comfy_input_dir.clone();
        config.service_output_dir = self.comfy_output_dir.clone();
        config.iterations = self.iterations;
        config.sizes = parse_sizes(&self.i2v_sizes);
        config.randomize_sizes = self.randomize_sizes;
        config.fps = self.i2v_fps;
        config.fps_range = self.randomize_fps.then_some((self.fps_min, self.fps_max));
        config.seconds = self.i2v_seconds;
        config.image_timeout = Duration::from_secs(self.image_timeout_secs);
        config.video_timeout = Duration::from_secs(self.video_timeout_secs);
        config.prompts = prompts;
        config.reference_file = self.reference_file.clone();
        config
    }
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Workflow template (API format JSON)
    #[arg(long)]
    pub workflow: PathBuf,

    /// Template family: generic, merged or i2v
    #[arg(long, default_value = "generic", value_parser = parse_family)]
    pub family: TemplateFamily,

    /// Flat parameter JSON object
    #[arg(long)]
    pub params: PathBuf,

    /// Write the rendered workflow here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

fn parse_family(s: &str) -> Result<TemplateFamily, String> {
    s.parse().map_err(|e: t2i2v_core::error::CoreError| e.to_string())
}
