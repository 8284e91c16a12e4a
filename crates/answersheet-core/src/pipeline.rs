use crate::aggregate::Aggregator;
use crate::config::Settings;
use crate::detection::RegionDetector;
use crate::error::AnswersheetError;
use crate::geometry::PageShape;
use crate::llm::{ImageSource, Usage, VisionModel};
use crate::merge::RegionMerger;
use crate::model::{PageExtraction, PageRegions, StudentSummary};
use crate::prompts::PromptBook;
use crate::raster::PageRasterizer;
use crate::reconcile::{PageInput, PageReport, PairingFault, Reconciler};
use crate::storage::{encode_jpeg, page_key, ArtifactStore};
use crate::structured::{extraction_schema, ExtractionOutcome, PageExtractor};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Where a submission PDF comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionSource {
    Url(String),
    Path(PathBuf),
}

impl SubmissionSource {
    /// `http://` and `https://` sources are URLs; anything else is a path.
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            SubmissionSource::Url(source.to_string())
        } else {
            SubmissionSource::Path(PathBuf::from(source))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub dpi: u32,
    pub max_concurrency: usize,
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        PipelineOptions {
            dpi: settings.raster.dpi,
            max_concurrency: settings.pipeline.max_concurrency,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions::from(&Settings::default())
    }
}

/// Collaborators the pipeline is assembled from.
pub struct PipelineParts {
    pub rasterizer: Arc<dyn PageRasterizer>,
    /// Reads page metadata (structured output).
    pub extraction_model: Arc<dyn VisionModel>,
    /// Points at question numbers (free text with coordinates).
    pub region_model: Arc<dyn VisionModel>,
    pub merger: Arc<dyn RegionMerger>,
    pub store: Arc<dyn ArtifactStore>,
    pub prompts: Arc<PromptBook>,
}

/// Stage at which a page was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    Encode,
    Extraction,
    Upload,
    Detection,
}

impl std::fmt::Display for FaultStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultStage::Encode => "encode",
            FaultStage::Extraction => "extraction",
            FaultStage::Upload => "upload",
            FaultStage::Detection => "detection",
        };
        f.write_str(name)
    }
}

/// A page that never reached the fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFault {
    pub page_index: usize,
    pub stage: FaultStage,
    pub error: String,
}

impl PageFault {
    fn new(page_index: usize, stage: FaultStage, error: impl ToString) -> Self {
        PageFault {
            page_index,
            stage,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWarning {
    pub page_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Every page was folded and every snippet stored.
    Complete,
    /// At least one page or snippet is missing; see the faults.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    pub pages: usize,
    pub students: Vec<StudentSummary>,
    pub page_faults: Vec<PageFault>,
    pub pairing_faults: Vec<PairingFault>,
    pub warnings: Vec<PageWarning>,
    pub usage: Usage,
    #[serde(skip)]
    pub reports: Vec<PageReport>,
}

/// A page whose metadata was read and whose image was uploaded.
struct Staged {
    extraction: PageExtraction,
    /// How the region model receives the page.
    image: ImageSource,
}

/// The region model fetches pages by URL. Stores without public URLs
/// (in-memory, dry runs) fall back to sending the page inline.
fn region_source(page_url: String, jpeg: &[u8]) -> ImageSource {
    if page_url.starts_with("https://") || page_url.starts_with("http://") {
        ImageSource::Url(page_url)
    } else {
        ImageSource::Jpeg(jpeg.to_vec())
    }
}

/// Turns one submission PDF into per-student answer records.
pub struct SubmissionPipeline {
    http: reqwest::Client,
    rasterizer: Arc<dyn PageRasterizer>,
    extractor: PageExtractor,
    detector: RegionDetector,
    merger: Arc<dyn RegionMerger>,
    store: Arc<dyn ArtifactStore>,
    prompts: Arc<PromptBook>,
    options: PipelineOptions,
}

impl SubmissionPipeline {
    pub fn new(parts: PipelineParts, options: PipelineOptions) -> Result<Self, AnswersheetError> {
        if options.max_concurrency == 0 {
            return Err(AnswersheetError::Config(
                "max_concurrency must be positive".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(SubmissionPipeline {
            http,
            rasterizer: parts.rasterizer,
            extractor: PageExtractor::new(parts.extraction_model),
            detector: RegionDetector::new(parts.region_model),
            merger: parts.merger,
            store: parts.store,
            prompts: parts.prompts,
            options,
        })
    }

    /// Fetch, rasterize and process a submission.
    ///
    /// Only fetch, rasterization and prompt faults fail the call; page-level
    /// faults are reported in the result.
    pub async fn run(&self, source: &SubmissionSource) -> Result<SubmissionResult, AnswersheetError> {
        let pdf = self.fetch(source).await?;
        self.run_pdf(pdf).await
    }

    pub async fn run_pdf(&self, pdf: Vec<u8>) -> Result<SubmissionResult, AnswersheetError> {
        let rasterizer = self.rasterizer.clone();
        let dpi = self.options.dpi;
        let images = tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, dpi))
            .await
            .map_err(|e| AnswersheetError::Raster(e.to_string()))??;
        info!(
            pages = images.len(),
            dpi,
            backend = self.rasterizer.backend_name(),
            "rasterized submission"
        );

        let system_prompt = self.prompts.system("page_extract_prompt")?;
        let user_prompt = self.prompts.format_user("page_extract_prompt", &[])?;
        let schema = extraction_schema();
        let mut usage = Usage::default();

        let jpegs: Vec<Result<Vec<u8>, PageFault>> = images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                encode_jpeg(image).map_err(|e| PageFault::new(i, FaultStage::Encode, e))
            })
            .collect();

        // Phase 1: page metadata.
        let user_prompt = &user_prompt;
        let schema = &schema;
        let outcomes = self
            .fan_out(jpegs.iter(), |jpeg| async move {
                let bytes = jpeg.as_ref().map_err(Clone::clone)?;
                let outcome = self
                    .extractor
                    .extract(system_prompt, user_prompt, ImageSource::Jpeg(bytes.clone()), schema)
                    .await;
                Ok::<_, PageFault>(outcome)
            })
            .await;

        let extracted: Vec<Result<PageExtraction, PageFault>> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                let outcome = outcome?;
                usage.add(outcome.usage());
                match outcome {
                    ExtractionOutcome::Extracted { page, .. } => Ok(page),
                    ExtractionOutcome::Failed { error, .. } => {
                        Err(PageFault::new(i, FaultStage::Extraction, error))
                    }
                }
            })
            .collect();
        info!(
            pages = extracted.iter().filter(|p| p.is_ok()).count(),
            "page metadata extraction complete"
        );

        let staged = self
            .fan_out(
                extracted.into_iter().zip(jpegs.iter()).enumerate(),
                |(i, (extraction, jpeg))| async move {
                    let extraction = extraction?;
                    let bytes = jpeg.as_ref().map_err(Clone::clone)?;
                    let key = page_key(&extraction.student_id, &extraction.page_no);
                    match self.store.put_jpeg(&key, bytes.clone()).await {
                        Ok(page_url) => Ok(Staged {
                            extraction,
                            image: region_source(page_url, bytes),
                        }),
                        Err(e) => Err(PageFault::new(i, FaultStage::Upload, e)),
                    }
                },
            )
            .await;

        // Phase 2: answer regions.
        let detected = self
            .fan_out(
                staged.into_iter().zip(images.iter()).enumerate(),
                |(i, (staged, image))| async move {
                    let staged = staged?;
                    let regions = self.detect(i, &staged, PageShape::of(image)).await?;
                    Ok::<_, PageFault>((staged.extraction, regions))
                },
            )
            .await;

        // Phase 3: sequential fold in page order.
        let mut aggregator =
            Aggregator::new(Reconciler::new(self.merger.clone(), self.store.clone()));
        let mut page_faults = Vec::new();
        let mut reports = Vec::new();
        for (i, (page, image)) in detected.into_iter().zip(images.iter()).enumerate() {
            match page {
                Ok((extraction, regions)) => {
                    let report = aggregator
                        .fold(PageInput {
                            page_index: i,
                            extraction: &extraction,
                            regions,
                            image,
                        })
                        .await;
                    usage.add(&report.usage);
                    reports.push(report);
                }
                Err(fault) => {
                    warn!(
                        page = fault.page_index,
                        stage = %fault.stage,
                        error = %fault.error,
                        "page skipped"
                    );
                    page_faults.push(fault);
                }
            }
        }

        let book = aggregator.into_book();
        let pairing_faults: Vec<PairingFault> = reports
            .iter()
            .flat_map(|r| r.pairing_faults.iter().cloned())
            .collect();
        let warnings = reports
            .iter()
            .flat_map(|r| {
                r.warnings.iter().map(|message| PageWarning {
                    page_index: r.page_index,
                    message: message.clone(),
                })
            })
            .collect();
        let status = if page_faults.is_empty() && pairing_faults.is_empty() {
            SubmissionStatus::Complete
        } else {
            SubmissionStatus::Partial
        };

        info!(
            students = book.len(),
            page_faults = page_faults.len(),
            pairing_faults = pairing_faults.len(),
            cost = %usage.cost,
            "submission processed"
        );
        Ok(SubmissionResult {
            status,
            pages: images.len(),
            students: book.finalize(),
            page_faults,
            pairing_faults,
            warnings,
            usage,
            reports,
        })
    }

    async fn fetch(&self, source: &SubmissionSource) -> Result<Vec<u8>, AnswersheetError> {
        match source {
            SubmissionSource::Url(url) => {
                debug!(%url, "downloading submission");
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| AnswersheetError::Fetch(e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AnswersheetError::Fetch(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            SubmissionSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| AnswersheetError::Fetch(format!("{}: {}", path.display(), e))),
        }
    }

    async fn detect(
        &self,
        page_index: usize,
        staged: &Staged,
        shape: PageShape,
    ) -> Result<PageRegions, PageFault> {
        let questions = &staged.extraction.question_numbers;
        if questions.is_empty() {
            debug!(page = page_index, "no questions on page, skipping region detection");
            return Ok(Vec::new());
        }

        let fault = |e: AnswersheetError| PageFault::new(page_index, FaultStage::Detection, e);
        let question_list = serde_json::to_string(questions).map_err(|e| fault(e.into()))?;
        let prompt = self
            .prompts
            .format_user(
                "molmo_extraction_prompt",
                &[("question_numbers", question_list.as_str())],
            )
            .map_err(fault)?;

        let regions = self
            .detector
            .detect(&prompt, staged.image.clone(), shape)
            .await
            .map_err(fault)?;
        debug!(
            page = page_index,
            questions = questions.len(),
            regions = regions.len(),
            "regions detected"
        );
        Ok(regions)
    }

    /// Run `task` for every item with at most `max_concurrency` in flight.
    /// Results come back in input order.
    async fn fan_out<I, F, Fut>(&self, items: I, task: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future,
    {
        let limit = Semaphore::new(self.options.max_concurrency);
        let limit = &limit;
        join_all(items.into_iter().map(|item| {
            let pending = task(item);
            async move {
                let _permit = limit.acquire().await;
                pending.await
            }
        }))
        .await
    }
}
