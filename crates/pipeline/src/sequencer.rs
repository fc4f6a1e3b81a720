//! Two-stage run driver.
//!
//! Each iteration renders one image from text, hands it to the video
//! template, and renders one clip. Iterations run strictly one after the
//! other and the first error aborts the run.

use std::path::PathBuf;
use std::time::Duration;

use t2i2v_comfyui::history::{output_files, OutputFile};
use t2i2v_comfyui::service::{ExecutionService, JobId, JobOutcome};
use t2i2v_core::graph::WorkflowGraph;
use t2i2v_core::mapper;
use t2i2v_core::params::{self, ParameterSet};
use t2i2v_core::resolver::{NodeRoleBinding, TemplateFamily};

use crate::config::{create_dir, PipelineConfig};
use crate::error::{PipelineError, Stage};
use crate::frames::FrameSelector;
use crate::locator::{
    copy_artifact, extension_of, locate_artifact, reported_artifact, ArtifactKind,
};
use crate::persistence::{self, IterationMetadata, IterationRecord, KnowledgeEntry, RunSnapshot};
use crate::reference::load_reference_params;
use crate::stages::{self, ImageStageInput, VideoStageInput};

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A workflow template together with the family that resolves it.
#[derive(Debug, Clone)]
pub struct StageTemplate {
    pub graph: WorkflowGraph,
    pub family: TemplateFamily,
}

impl StageTemplate {
    pub fn new(graph: WorkflowGraph, family: TemplateFamily) -> Self {
        Self { graph, family }
    }

    /// Text-to-image template of unknown shape.
    pub fn image(graph: WorkflowGraph) -> Self {
        Self::new(graph, TemplateFamily::Generic)
    }

    /// Dedicated image-to-video template.
    pub fn video(graph: WorkflowGraph) -> Self {
        Self::new(graph, TemplateFamily::ImageToVideo)
    }
}

/// Template with its role binding resolved once per run.
#[derive(Debug)]
struct ResolvedTemplate {
    graph: WorkflowGraph,
    binding: NodeRoleBinding,
    family: TemplateFamily,
}

impl ResolvedTemplate {
    fn resolve(template: StageTemplate) -> Result<Self, PipelineError> {
        let binding = template.family.resolver().resolve(&template.graph)?;
        Ok(Self {
            graph: template.graph,
            binding,
            family: template.family,
        })
    }

    fn build(&self, params: &ParameterSet) -> Result<WorkflowGraph, PipelineError> {
        Ok(mapper::apply(&self.graph, &self.binding, params)?)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Artifacts of one finished iteration.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub index: usize,
    pub iteration: String,
    pub dir: PathBuf,
    pub local_image: PathBuf,
    pub local_video: PathBuf,
    pub image_params: ParameterSet,
    pub video_params: ParameterSet,
}

/// A stage job that finished successfully.
#[derive(Debug)]
struct FinishedJob {
    id: JobId,
    files: Vec<OutputFile>,
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub iterations: Vec<IterationOutcome>,
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer<S> {
    config: PipelineConfig,
    service: S,
    image: ResolvedTemplate,
    video: ResolvedTemplate,
    frames: FrameSelector,
    references: Vec<ParameterSet>,
    run_id: String,
}

impl<S: ExecutionService> Sequencer<S> {
    /// Resolve both templates and load the reference parameters.
    ///
    /// Fails when a fixed-convention template lacks required nodes.
    pub fn new(
        config: PipelineConfig,
        service: S,
        image_template: StageTemplate,
        video_template: StageTemplate,
    ) -> Result<Self, PipelineError> {
        let image = ResolvedTemplate::resolve(image_template)?;
        let video = ResolvedTemplate::resolve(video_template)?;
        let frames = FrameSelector::new(
            config.sizes.clone(),
            config.randomize_sizes,
            config.fps,
            config.fps_range,
        );
        let references = load_reference_params(&config.reference_path());
        let run_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

        tracing::info!(
            run_id = %run_id,
            image_family = %image.family,
            video_family = %video.family,
            references = references.len(),
            "Sequencer ready",
        );

        Ok(Self {
            config,
            service,
            image,
            video,
            frames,
            references,
            run_id,
        })
    }

    /// Replace the generated run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `run_<run_id>`: directory name and prefix component.
    pub fn run_name(&self) -> String {
        format!("run_{}", self.run_id)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.config.runs_dir().join(self.run_name())
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Run every configured iteration in order.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        self.config.ensure_dirs()?;
        create_dir(&self.run_dir())?;
        self.save_run_snapshot()?;

        tracing::info!(
            run_id = %self.run_id,
            iterations = self.config.iterations,
            "Run started",
        );

        let mut iterations = Vec::with_capacity(self.config.iterations);
        for index in 0..self.config.iterations {
            iterations.push(self.run_iteration(index).await?);
        }

        tracing::info!(
            run_id = %self.run_id,
            iterations = iterations.len(),
            run_dir = %self.run_dir().display(),
            "Run finished",
        );

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            run_dir: self.run_dir(),
            iterations,
        })
    }

    /// Produce the image and the video for iteration `index` (0-based).
    pub async fn run_iteration(&self, index: usize) -> Result<IterationOutcome, PipelineError> {
        let iteration = format!("iter_{:04}", index + 1);
        let iter_dir = self.run_dir().join(&iteration);
        create_dir(&iter_dir)?;

        let prompts = &self.config.prompts;
        let size = self.frames.size(index);
        let run_name = self.run_name();
        let prefix_base = format!("{}/{}/{}", self.config.prefix_root, run_name, iteration);

        // -- text-to-image --

        let image_prompt = prompts.image_prompt();
        let image_params = stages::image_params(&ImageStageInput {
            size,
            part_a: &prompts.part_a,
            part_b: &prompts.part_b,
            prompt: &image_prompt,
            negative_prompt: &prompts.image_negative,
            prefix: format!("{prefix_base}/image"),
            seed: stages::random_seed(),
        });
        tracing::info!(%iteration, frame_size = %size, "Rendering image");

        let image_job = self
            .execute(Stage::Image, &self.image, &image_params, self.config.image_timeout)
            .await?;
        let produced_image =
            self.locate(Stage::Image, &image_params, &image_job.files, ArtifactKind::Image)?;

        let image_ext = extension_of(&produced_image, ArtifactKind::Image);
        let local_image = iter_dir.join(format!("image{image_ext}"));
        copy_artifact(&produced_image, &local_image)?;
        let input_name = format!("{run_name}_{iteration}_image{image_ext}");
        let service_input_image = self.config.service_input_dir.join(&input_name);
        copy_artifact(&local_image, &service_input_image)?;

        // -- image-to-video --

        let video_prompt = prompts.video_prompt();
        let video_params = stages::video_params(&VideoStageInput {
            reference: self.reference_for(index),
            size,
            random_fps: self.frames.random_fps(),
            fixed_fps: self.frames.fixed_fps(),
            seconds: self.config.seconds,
            prompt: &video_prompt,
            negative_prompt: &prompts.video_negative,
            prefix: format!("{prefix_base}/video"),
            reference_image_name: &input_name,
        });
        tracing::info!(
            %iteration,
            fps = ?video_params.get(params::FPS),
            seconds = ?video_params.get(params::SECONDS),
            "Rendering video",
        );

        let video_job = self
            .execute(Stage::Video, &self.video, &video_params, self.config.video_timeout)
            .await?;
        let produced_video =
            self.locate(Stage::Video, &video_params, &video_job.files, ArtifactKind::Video)?;

        let video_ext = extension_of(&produced_video, ArtifactKind::Video);
        let local_video = iter_dir.join(format!("video{video_ext}"));
        copy_artifact(&produced_video, &local_video)?;

        // -- records --

        let metadata = IterationMetadata {
            iteration: iteration.clone(),
            timestamp: chrono::Utc::now(),
            frame_size: size.to_string(),
            image_prompt_id: image_job.id,
            video_prompt_id: video_job.id,
            produced_image,
            produced_video,
            local_image: local_image.clone(),
            local_video: local_video.clone(),
            service_input_image,
        };
        let compact_image_prompt = image_params
            .text(params::PROMPT)?
            .unwrap_or_default();
        persistence::save_iteration(&IterationRecord {
            dir: &iter_dir,
            image_prompt: &compact_image_prompt,
            video_prompt: &video_prompt,
            image_params: &image_params,
            video_params: &video_params,
            metadata: &metadata,
        })?;

        persistence::append_knowledge_best_effort(
            &persistence::knowledge_path(&self.config),
            &KnowledgeEntry {
                video: &local_video,
                source_image: &local_image,
                timestamp: metadata.timestamp.timestamp(),
                params: &video_params,
                metrics: Default::default(),
                combo: KnowledgeEntry::combo_of(&video_params),
                prompt: &video_prompt,
                negative_prompt: &prompts.video_negative,
                photo_prompt: &image_prompt,
                photo_negative: &prompts.image_negative,
            },
        );

        tracing::info!(
            %iteration,
            image = %local_image.display(),
            video = %local_video.display(),
            "Iteration complete",
        );

        Ok(IterationOutcome {
            index,
            iteration,
            dir: iter_dir,
            local_image,
            local_video,
            image_params,
            video_params,
        })
    }

    // ---- private helpers ----

    fn reference_for(&self, index: usize) -> Option<&ParameterSet> {
        if self.references.is_empty() {
            None
        } else {
            self.references.get(index % self.references.len())
        }
    }

    /// Build, submit and wait for one stage.
    async fn execute(
        &self,
        stage: Stage,
        template: &ResolvedTemplate,
        params: &ParameterSet,
        timeout: Duration,
    ) -> Result<FinishedJob, PipelineError> {
        let graph = template.build(params)?;
        let job = self.service.submit(&graph).await?;
        tracing::info!(%stage, prompt_id = %job, "Stage submitted");

        match self.service.await_completion(&job, timeout).await? {
            JobOutcome::Completed { outputs } => Ok(FinishedJob {
                files: output_files(&outputs),
                id: job,
            }),
            JobOutcome::Failed { message } => Err(PipelineError::StageFailed { stage, message }),
            JobOutcome::TimedOut => Err(PipelineError::ExecutionTimeout {
                stage,
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Files the service reported come first, then the prefix scan.
    fn locate(
        &self,
        stage: Stage,
        params: &ParameterSet,
        reported: &[OutputFile],
        kind: ArtifactKind,
    ) -> Result<PathBuf, PipelineError> {
        let output_dir = &self.config.service_output_dir;
        if let Some(path) = reported_artifact(output_dir, reported, kind) {
            tracing::debug!(%stage, path = %path.display(), "Using reported artifact");
            return Ok(path);
        }

        let prefix = params.text(params::PREFIX)?.unwrap_or_default();
        locate_artifact(output_dir, &prefix, kind).ok_or_else(|| {
            tracing::error!(%stage, %prefix, "Produced artifact not found");
            PipelineError::ArtifactNotFound { stage, prefix }
        })
    }

    fn save_run_snapshot(&self) -> Result<(), PipelineError> {
        let snapshot = RunSnapshot {
            run_id: &self.run_id,
            started_at: chrono::Local::now(),
            image_template_hash: self.image.graph.content_hash(),
            video_template_hash: self.video.graph.content_hash(),
            config: &self.config,
        };
        persistence::save_json(
            &persistence::run_snapshot_path(&self.config, &self.run_id),
            &snapshot,
        )
    }
}
