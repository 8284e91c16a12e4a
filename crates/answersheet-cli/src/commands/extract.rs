use answersheet_core::config::Settings;
use answersheet_core::error::AnswersheetError;
use answersheet_core::extract_submission;
use answersheet_core::llm::gemini::GeminiClient;
use answersheet_core::llm::runpod::{HttpJobApi, JobRunner, RunpodClient, TokioSleeper};
use answersheet_core::merge::ModelRegionMerger;
use answersheet_core::pipeline::{PipelineOptions, PipelineParts};
use answersheet_core::prompts::PromptBook;
use answersheet_core::raster::pdftoppm::PdftoppmRasterizer;
use answersheet_core::storage::{ArtifactStore, MemoryArtifactStore, S3ArtifactStore, S3Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::output;

const REGION_MODEL: &str = "molmo";

pub async fn run(
    source: &str,
    config: Option<PathBuf>,
    output_format: &str,
    output_file: Option<PathBuf>,
    dry_run: bool,
) -> Result<(), AnswersheetError> {
    let mut settings = match config {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    settings.apply_env(|key| std::env::var(key).ok());

    let parts = build_parts(&settings, dry_run)?;
    let result = extract_submission(source, parts, PipelineOptions::from(&settings)).await?;

    let output_str = match output_format {
        "json" => output::json::format(&result)?,
        _ => output::table::format(&result),
    };

    match output_file {
        Some(path) => {
            // Always write JSON when saving to file
            std::fs::write(&path, output::json::format(&result)?)?;
            eprintln!(
                "Extracted {} student(s) from {} page(s), written to {}",
                result.students.len(),
                result.pages,
                path.display()
            );
            for fault in &result.page_faults {
                eprintln!(
                    "  skipped page {} ({}): {}",
                    fault.page_index + 1,
                    fault.stage,
                    fault.error
                );
            }
            if !result.pairing_faults.is_empty() {
                eprintln!(
                    "  {} answer snippet(s) could not be stored",
                    result.pairing_faults.len()
                );
            }
        }
        None => {
            println!("{output_str}");
        }
    }

    Ok(())
}

fn required(value: &Option<String>, name: &str) -> Result<String, AnswersheetError> {
    value
        .clone()
        .ok_or_else(|| AnswersheetError::Config(format!("{} is not set", name)))
}

fn build_parts(settings: &Settings, dry_run: bool) -> Result<PipelineParts, AnswersheetError> {
    let prompts = Arc::new(match &settings.prompts {
        Some(path) => PromptBook::load(path)?,
        None => PromptBook::builtin()?,
    });

    let gemini_key = required(&settings.secrets.gemini_api_key, "GEMINI_API_KEY")?;
    let models = &settings.models;
    let extraction_model = GeminiClient::new(
        gemini_key.clone(),
        models.extraction.clone(),
        models.pricing_for(&models.extraction),
    )?;
    let verification_model = GeminiClient::new(
        gemini_key,
        models.verification.clone(),
        models.pricing_for(&models.verification),
    )?;

    let endpoint_id = required(&settings.runpod.endpoint_id, "ENDPOINT_ID")?;
    let runpod_key = required(&settings.secrets.runpod_api_key, "RUNPOD_API_KEY")?;
    let runner = JobRunner::new(
        Arc::new(HttpJobApi::new(&endpoint_id, runpod_key)?),
        Arc::new(TokioSleeper),
        Duration::from_millis(settings.runpod.poll_interval_ms),
        settings.runpod.max_retries,
    );

    let store: Arc<dyn ArtifactStore> = if dry_run {
        Arc::new(MemoryArtifactStore::new())
    } else {
        Arc::new(S3ArtifactStore::new(S3Settings {
            bucket: required(&settings.storage.bucket, "S3_BUCKET_NAME")?,
            region: required(&settings.storage.region, "S3_REGION")?,
            access_key_id: required(&settings.secrets.s3_access_key_id, "S3_ACCESS_KEY_ID")?,
            secret_access_key: required(
                &settings.secrets.s3_secret_access_key,
                "S3_SECRET_ACCESS_KEY",
            )?,
            endpoint: settings.storage.endpoint.clone(),
        })?)
    };

    Ok(PipelineParts {
        rasterizer: Arc::new(PdftoppmRasterizer::new()),
        extraction_model: Arc::new(extraction_model),
        region_model: Arc::new(RunpodClient::new(runner, REGION_MODEL)),
        merger: Arc::new(ModelRegionMerger::new(
            Arc::new(verification_model),
            prompts.clone(),
        )),
        store,
        prompts,
    })
}
