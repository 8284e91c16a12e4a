use crate::llm::Usage;
use serde::{Deserialize, Serialize};

/// A single question (or continuation) whose snippet could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingFault {
    /// Zero-based page index within the submission.
    pub page_index: usize,
    /// Question the snippet belongs to.
    pub question_no: String,
    /// Whether the snippet was a continuation region.
    pub continuation: bool,
    pub error: String,
}

/// What happened to a page's leading continuation region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationOutcome {
    /// The page does not start with a continuation.
    None,
    /// Stored under the student's most recent question.
    Attached { question_no: String },
    /// No earlier question to attach to; the snippet was dropped.
    Dropped,
    /// Cropping or uploading failed (see the page's pairing faults).
    Faulted,
}

/// Record of every repair and artifact produced while folding one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub page_index: usize,
    pub student_id: String,
    pub page_no: String,
    /// Regions the detector returned.
    pub detected: usize,
    /// Question numbers the extraction model reported.
    pub expected: usize,
    /// Detector regions discarded because the page lists no questions.
    pub discarded: usize,
    /// The merge fallback ran.
    pub merged: bool,
    /// Surplus regions dropped after merging.
    pub truncated: usize,
    /// Questions paired with the full-page default region.
    pub defaulted: bool,
    pub continuation: ContinuationOutcome,
    /// Artifact references appended to the student's answers.
    pub artifacts: usize,
    pub pairing_faults: Vec<PairingFault>,
    pub warnings: Vec<String>,
    /// Model usage spent on this page during reconciliation.
    pub usage: Usage,
}

impl PageReport {
    pub fn new(page_index: usize, student_id: &str, page_no: &str) -> Self {
        PageReport {
            page_index,
            student_id: student_id.to_string(),
            page_no: page_no.to_string(),
            detected: 0,
            expected: 0,
            discarded: 0,
            merged: false,
            truncated: 0,
            defaulted: false,
            continuation: ContinuationOutcome::None,
            artifacts: 0,
            pairing_faults: Vec::new(),
            warnings: Vec::new(),
            usage: Usage::default(),
        }
    }
}
