use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AnswersheetError {
    #[error("failed to fetch submission: {0}")]
    Fetch(String),

    #[error("pdftoppm not found. Install poppler: brew install poppler (macOS) or apt install poppler-utils (Linux)")]
    PdftoppmNotFound,

    #[error("pdftoppm failed with exit code {code}: {stderr}")]
    PdftoppmFailed { code: i32, stderr: String },

    #[error("PDF rasterization failed: {0}")]
    Raster(String),

    #[error("model '{model}' call failed: {message}")]
    Model { model: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response for job {job_id}: {reason}")]
    MalformedResponse { job_id: String, reason: String },

    #[error("job {job_id} did not complete after {attempts} attempt(s)")]
    JobFailed { job_id: String, attempts: u32 },

    #[error("degenerate region: left={left} top={top} right={right} bottom={bottom}")]
    DegenerateRegion {
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("artifact upload failed for '{key}': {reason}")]
    Storage { key: String, reason: String },

    #[error("prompt '{0}' not found in prompt book")]
    PromptNotFound(String),

    #[error("missing parameters for prompt '{name}': {}", params.join(", "))]
    MissingPromptParams { name: String, params: Vec<String> },

    #[error("failed to load prompts from {}: {reason}", path.display())]
    PromptLoad { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<reqwest::Error> for AnswersheetError {
    fn from(e: reqwest::Error) -> Self {
        AnswersheetError::Transport(e.to_string())
    }
}
