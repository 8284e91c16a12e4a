pub mod aggregate;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod llm;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod raster;
pub mod reconcile;
pub mod storage;
pub mod structured;

use error::AnswersheetError;
use pipeline::{PipelineOptions, PipelineParts, SubmissionPipeline, SubmissionResult, SubmissionSource};

/// Main API entry point: extract every student's answers from one
/// submission PDF.
///
/// `source` is an `http(s)://` URL or a local path. Page-level faults are
/// reported in the result; only fetch, rasterization and prompt faults
/// return an error.
pub async fn extract_submission(
    source: &str,
    parts: PipelineParts,
    options: PipelineOptions,
) -> Result<SubmissionResult, AnswersheetError> {
    let pipeline = SubmissionPipeline::new(parts, options)?;
    pipeline.run(&SubmissionSource::parse(source)).await
}
