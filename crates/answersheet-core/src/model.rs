use crate::geometry::Region;
use serde::{Deserialize, Serialize};

/// Student id the extraction model reports for pages without a filled-in id.
pub const UNKNOWN_STUDENT: &str = "unknown";

/// Structured metadata the extraction model reads off one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageExtraction {
    pub student_id: String,
    pub student_name: String,
    pub page_no: String,
    /// Question numbers in top-to-bottom reading order.
    pub question_numbers: Vec<String>,
    /// `"true"` or `"false"`; the extraction schema types this as a string.
    pub starts_with_continuation: String,
}

impl PageExtraction {
    /// Whether the page opens with content that belongs to a question
    /// started on an earlier page. Only the exact literal `"true"` counts.
    pub fn starts_continuation(&self) -> bool {
        self.starts_with_continuation == "true"
    }

    pub fn is_unidentified(&self) -> bool {
        self.student_id == UNKNOWN_STUDENT
    }
}

/// Detected answer regions for one page, top to bottom.
pub type PageRegions = Vec<Region>;

/// Answer artifacts per question, iterated in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerMap {
    entries: Vec<(String, Vec<String>)>,
}

impl AnswerMap {
    pub fn push(&mut self, question_no: &str, reference: String) {
        match self.entries.iter_mut().find(|(q, _)| q == question_no) {
            Some((_, refs)) => refs.push(reference),
            None => self
                .entries
                .push((question_no.to_string(), vec![reference])),
        }
    }

    pub fn get(&self, question_no: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(q, _)| q == question_no)
            .map(|(_, refs)| refs.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(q, refs)| (q.as_str(), refs.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-student accumulator, mutated once per page folded for that student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: String,
    pub page_numbers: Vec<String>,
    /// Every question number seen, in page order. May contain duplicates
    /// when an answer spans pages.
    pub question_answered: Vec<String>,
    pub answers: AnswerMap,
}

impl StudentRecord {
    pub fn new(student_id: &str, student_name: &str) -> Self {
        StudentRecord {
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            page_numbers: Vec::new(),
            question_answered: Vec::new(),
            answers: AnswerMap::default(),
        }
    }

    /// The most recently seen question number, if any.
    pub fn last_question(&self) -> Option<&str> {
        self.question_answered.last().map(String::as_str)
    }
}

/// One question's answer images in the final response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question_no: String,
    pub answerpath: Vec<String>,
}

/// Finalized per-student record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub page_numbers: Vec<String>,
    pub question_answered: Vec<String>,
    pub answers: Vec<AnswerEntry>,
}

impl From<&StudentRecord> for StudentSummary {
    fn from(record: &StudentRecord) -> Self {
        StudentSummary {
            student_id: record.student_id.clone(),
            student_name: record.student_name.clone(),
            page_numbers: record.page_numbers.clone(),
            question_answered: record.question_answered.clone(),
            answers: record
                .answers
                .iter()
                .map(|(question_no, refs)| AnswerEntry {
                    question_no: question_no.to_string(),
                    answerpath: refs.to_vec(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_flag_is_exact_string() {
        let mut page = PageExtraction {
            student_id: "S1".into(),
            student_name: "Ada".into(),
            page_no: "2".into(),
            question_numbers: vec![],
            starts_with_continuation: "true".into(),
        };
        assert!(page.starts_continuation());
        page.starts_with_continuation = "True".into();
        assert!(!page.starts_continuation());
        page.starts_with_continuation = "false".into();
        assert!(!page.starts_continuation());
    }

    #[test]
    fn test_unknown_sentinel() {
        let mut page = PageExtraction {
            student_id: UNKNOWN_STUDENT.into(),
            student_name: String::new(),
            page_no: "1".into(),
            question_numbers: vec![],
            starts_with_continuation: "false".into(),
        };
        assert!(page.is_unidentified());
        page.student_id = "Unknown".into();
        assert!(!page.is_unidentified());
    }

    #[test]
    fn test_answer_map_keeps_first_insertion_order() {
        let mut answers = AnswerMap::default();
        answers.push("3", "a".into());
        answers.push("1", "b".into());
        answers.push("3", "c".into());

        let order: Vec<&str> = answers.iter().map(|(q, _)| q).collect();
        assert_eq!(order, vec!["3", "1"]);
        assert_eq!(answers.get("3").unwrap(), ["a", "c"]);
    }

    #[test]
    fn test_summary_flattens_answers() {
        let mut record = StudentRecord::new("S1", "Ada");
        record.answers.push("2", "x".into());
        record.answers.push("1", "y".into());
        let summary = StudentSummary::from(&record);
        assert_eq!(summary.answers[0].question_no, "2");
        assert_eq!(summary.answers[1].answerpath, vec!["y"]);
    }
}
