#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Workflow is missing required nodes: {}", .missing.join(", "))]
    MissingRequiredNode { missing: Vec<String> },

    #[error("Parameter '{param}' cannot be converted to {expected}: {value}")]
    ParameterCoercion {
        param: String,
        expected: &'static str,
        value: serde_json::Value,
    },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
