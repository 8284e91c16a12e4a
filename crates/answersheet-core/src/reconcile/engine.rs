use crate::error::AnswersheetError;
use crate::geometry::{crop, PageShape, Region};
use crate::llm::ImageSource;
use crate::merge::RegionMerger;
use crate::model::{PageExtraction, PageRegions, StudentRecord};
use crate::reconcile::outcome::{ContinuationOutcome, PageReport, PairingFault};
use crate::reconcile::plan::{needs_merge, plan_page, usable_regions};
use crate::storage::{artifact_key, encode_jpeg, ArtifactStore};
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page, ready to be folded into its student's record.
pub struct PageInput<'a> {
    /// Zero-based page index within the submission.
    pub page_index: usize,
    pub extraction: &'a PageExtraction,
    /// Detector regions, top to bottom.
    pub regions: PageRegions,
    pub image: &'a DynamicImage,
}

/// Reconciles a page's metadata with its detected regions, crops every
/// answer and stores the snippets.
///
/// Count mismatches are repaired, never raised. Crop and upload failures
/// are recorded per pairing; sibling pairings still run.
pub struct Reconciler {
    merger: Arc<dyn RegionMerger>,
    store: Arc<dyn ArtifactStore>,
}

impl Reconciler {
    pub fn new(merger: Arc<dyn RegionMerger>, store: Arc<dyn ArtifactStore>) -> Self {
        Reconciler { merger, store }
    }

    pub async fn reconcile(&self, record: &mut StudentRecord, page: PageInput<'_>) -> PageReport {
        let PageInput {
            page_index,
            extraction,
            regions,
            image,
        } = page;
        let shape = PageShape::of(image);
        let mut report = PageReport::new(page_index, &extraction.student_id, &extraction.page_no);
        report.detected = regions.len();
        report.expected = extraction.question_numbers.len();

        let mut regions = usable_regions(extraction, regions);
        report.discarded = report.detected - regions.len();
        if report.discarded > 0 {
            info!(
                page = page_index,
                regions = report.discarded,
                "page lists no questions, discarding detected regions"
            );
        }

        if needs_merge(extraction, &regions) {
            regions = self.merge(&mut report, extraction, regions, image).await;
        }

        let plan = plan_page(extraction, &regions, shape);
        if plan.surplus > 0 {
            warn!(
                page = page_index,
                surplus = plan.surplus,
                "more regions than questions after merge, dropping the surplus"
            );
            report.truncated += plan.surplus;
        }
        if plan.defaulted {
            info!(
                page = page_index,
                questions = report.expected,
                regions = regions.len(),
                "fewer regions than questions, using full-page regions"
            );
            report.defaulted = true;
        }

        if let Some(region) = plan.continuation {
            let outcome = self
                .attach_continuation(record, &mut report, region, image)
                .await;
            report.continuation = outcome;
        }

        record.page_numbers.push(extraction.page_no.clone());
        record
            .question_answered
            .extend(extraction.question_numbers.iter().cloned());

        for pairing in plan.pairings {
            match self
                .store_snip(image, &pairing.region, &record.student_id, &pairing.question_no, false)
                .await
            {
                Ok(reference) => {
                    record.answers.push(&pairing.question_no, reference);
                    report.artifacts += 1;
                }
                Err(e) => {
                    warn!(
                        page = page_index,
                        question = %pairing.question_no,
                        error = %e,
                        "failed to store answer snippet"
                    );
                    report.pairing_faults.push(PairingFault {
                        page_index,
                        question_no: pairing.question_no,
                        continuation: false,
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            page = page_index,
            student_id = %record.student_id,
            artifacts = report.artifacts,
            faults = report.pairing_faults.len(),
            "page reconciled"
        );
        report
    }

    async fn merge(
        &self,
        report: &mut PageReport,
        extraction: &PageExtraction,
        regions: PageRegions,
        image: &DynamicImage,
    ) -> PageRegions {
        let questions = &extraction.question_numbers;
        let source = match encode_jpeg(image) {
            Ok(bytes) => ImageSource::Jpeg(bytes),
            Err(e) => return keep_leading(report, regions, questions.len(), &e),
        };

        match self.merger.merge(&regions, questions, source).await {
            Ok(merged) => {
                info!(
                    page = report.page_index,
                    questions = questions.len(),
                    before = regions.len(),
                    after = merged.regions.len(),
                    "merged over-detected regions"
                );
                report.merged = true;
                report.usage.add(&merged.usage);
                merged.regions
            }
            Err(e) => keep_leading(report, regions, questions.len(), &e),
        }
    }

    async fn attach_continuation(
        &self,
        record: &mut StudentRecord,
        report: &mut PageReport,
        region: Region,
        image: &DynamicImage,
    ) -> ContinuationOutcome {
        let Some(question_no) = record.last_question().map(str::to_string) else {
            warn!(
                page = report.page_index,
                student_id = %record.student_id,
                "continuation page has no earlier question for this student, dropping it"
            );
            report
                .warnings
                .push("continuation region dropped: no earlier question for this student".into());
            return ContinuationOutcome::Dropped;
        };

        match self
            .store_snip(image, &region, &record.student_id, &question_no, true)
            .await
        {
            Ok(reference) => {
                record.answers.push(&question_no, reference);
                report.artifacts += 1;
                ContinuationOutcome::Attached { question_no }
            }
            Err(e) => {
                warn!(
                    page = report.page_index,
                    question = %question_no,
                    error = %e,
                    "failed to store continuation snippet"
                );
                report.pairing_faults.push(PairingFault {
                    page_index: report.page_index,
                    question_no,
                    continuation: true,
                    error: e.to_string(),
                });
                ContinuationOutcome::Faulted
            }
        }
    }

    async fn store_snip(
        &self,
        image: &DynamicImage,
        region: &Region,
        student_id: &str,
        question_no: &str,
        continuation: bool,
    ) -> Result<String, AnswersheetError> {
        // `crop` normalizes corners; inverted regions must not reach it.
        if !region.is_upright() {
            return Err(AnswersheetError::DegenerateRegion {
                left: region.p1.x,
                top: region.p1.y,
                right: region.p4.x,
                bottom: region.p4.y,
            });
        }
        let snip = crop(image, region)?;
        let bytes = encode_jpeg(&snip)?;
        let key = artifact_key(student_id, question_no, continuation);
        self.store.put_jpeg(&key, bytes).await
    }
}

/// Fallback when merging fails: keep the first `keep` detector regions.
fn keep_leading(
    report: &mut PageReport,
    mut regions: PageRegions,
    keep: usize,
    error: &AnswersheetError,
) -> PageRegions {
    warn!(
        page = report.page_index,
        regions = regions.len(),
        questions = keep,
        error = %error,
        "region merge failed, truncating detector output"
    );
    report.warnings.push(format!(
        "region merge failed, kept the first {} of {} detected regions: {}",
        keep,
        regions.len(),
        error
    ));
    report.truncated += regions.len().saturating_sub(keep);
    regions.truncate(keep);
    regions
}
