//! `t2i2v-worker` -- two-stage image and video generation driver.
//!
//! # Environment variables
//!
//! | Variable             | Default                      | Description                        |
//! |----------------------|------------------------------|------------------------------------|
//! | `COMFYUI_API_URL`    | `http://127.0.0.1:8188`      | ComfyUI base URL                   |
//! | `T2I2V_ROOT`         | `/workspace/Agent_T2I2V`     | Runs, configs and state            |
//! | `COMFYUI_INPUT_DIR`  | `/workspace/ComfyUI/input`   | Where source images are copied     |
//! | `COMFYUI_OUTPUT_DIR` | `/workspace/ComfyUI/output`  | Where ComfyUI writes outputs       |
//! | `RUST_LOG`           | all crates at `info`         | `tracing` filter                   |

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use t2i2v_comfyui::service::ComfyUIService;
use t2i2v_core::resolver::TemplateFamily;
use t2i2v_pipeline::sequencer::{Sequencer, StageTemplate};
use t2i2v_worker::cli::{Cli, Command, RunArgs};
use t2i2v_worker::render::render_to_output;
use t2i2v_worker::templates::load_template;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "t2i2v_worker=info,t2i2v_pipeline=info,t2i2v_comfyui=info,t2i2v_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Render(args) => render_to_output(&args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let image_template = load_template(&args.image_workflow)?;
    let video_template = load_template(&args.i2v_workflow)?;
    let config = args.pipeline_config();

    let service = ComfyUIService::new(args.api.clone()).with_poll_interval(args.poll_interval());

    tracing::info!(
        api = %args.api,
        client_id = service.client_id(),
        root = %config.root.display(),
        iterations = config.iterations,
        "Starting t2i2v-worker",
    );

    let sequencer = Sequencer::new(
        config,
        service,
        StageTemplate::new(image_template, args.image_family),
        StageTemplate::new(video_template, TemplateFamily::ImageToVideo),
    )
    .context("failed to prepare workflow templates")?;

    let summary = sequencer.run().await.context("pipeline run failed")?;

    tracing::info!(
        run_id = %summary.run_id,
        iterations = summary.iterations.len(),
        run_dir = %summary.run_dir.display(),
        "Two-stage run finished",
    );
    Ok(())
}
