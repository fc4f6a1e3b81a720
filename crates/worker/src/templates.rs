//! Loading workflow templates and parameter files from disk.

use std::path::Path;

use anyhow::{Context, Result};
use t2i2v_core::graph::WorkflowGraph;
use t2i2v_core::params::ParameterSet;

/// Read and parse an API-format workflow template.
pub fn load_template(path: &Path) -> Result<WorkflowGraph> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow template: {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse workflow template: {}", path.display()))?;
    let graph = WorkflowGraph::from_value(&json)
        .with_context(|| format!("invalid workflow template: {}", path.display()))?;

    tracing::info!(path = %path.display(), nodes = graph.len(), "Loaded workflow template");
    Ok(graph)
}

/// Read a flat parameter object.
pub fn load_params(path: &Path) -> Result<ParameterSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read parameters: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parameters must be a JSON object: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_template_reports_path() {
        let err = load_template(Path::new("/nonexistent/t2i.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/t2i.json"));
    }

    #[test]
    fn template_without_class_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"1": {"inputs": {}}}"#).unwrap();

        let err = load_template(&path).unwrap_err();
        assert!(format!("{err:#}").contains("class_type"));
    }

    #[test]
    fn params_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(load_params(&path).is_err());

        std::fs::write(&path, r#"{"steps": 8}"#).unwrap();
        assert_eq!(load_params(&path).unwrap().integer("steps").unwrap(), Some(8));
    }
}
