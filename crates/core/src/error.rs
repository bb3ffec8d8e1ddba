use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The template does not expose a node the mutator writes to.
    #[error("Configuration error: template has no node {node_id} ({role})")]
    MissingNode { node_id: String, role: &'static str },

    #[error("Failed to read template {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse template {path}: {source}")]
    TemplateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to list artifact directory {path}: {source}")]
    ArtifactDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No LoRA checkpoint for step {step} in {dir}")]
    ArtifactNotFound { dir: PathBuf, step: u32 },

    #[error("Validation failed: {0}")]
    Validation(String),
}
