//! Offline rendering: template + parameters -> submittable workflow.

use anyhow::{Context, Result};
use t2i2v_core::graph::WorkflowGraph;
use t2i2v_core::mapper;

use crate::cli::RenderArgs;
use crate::templates::{load_params, load_template};

/// Resolve, apply and return the rendered workflow.
pub fn render(args: &RenderArgs) -> Result<WorkflowGraph> {
    let template = load_template(&args.workflow)?;
    let params = load_params(&args.params)?;

    let binding = args
        .family
        .resolver()
        .resolve(&template)
        .with_context(|| format!("cannot resolve {} template roles", args.family))?;
    tracing::debug!(?binding, "Resolved roles");

    mapper::apply(&template, &binding, &params).context("failed to apply parameters")
}

/// [`render`] and write the result to `--output` or stdout.
pub fn render_to_output(args: &RenderArgs) -> Result<()> {
    let graph = render(args)?;
    let body = serde_json::to_string_pretty(&graph.to_value()?)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Rendered workflow written");
        }
        None => println!("{body}"),
    }
    Ok(())
}
