use crate::model::{StudentRecord, StudentSummary};
use crate::reconcile::{PageInput, PageReport, Reconciler};
use std::collections::HashMap;
use tracing::warn;

/// Student records keyed by student id, iterated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentBook {
    records: Vec<StudentRecord>,
    index: HashMap<String, usize>,
}

impl StudentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `student_id`, created with `student_name` on first use.
    /// Later pages never rename an existing record.
    pub fn entry(&mut self, student_id: &str, student_name: &str) -> &mut StudentRecord {
        let slot = match self.index.get(student_id) {
            Some(&slot) => slot,
            None => {
                self.records
                    .push(StudentRecord::new(student_id, student_name));
                let slot = self.records.len() - 1;
                self.index.insert(student_id.to_string(), slot);
                slot
            }
        };
        &mut self.records[slot]
    }

    pub fn get(&self, student_id: &str) -> Option<&StudentRecord> {
        self.index.get(student_id).map(|&slot| &self.records[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &StudentRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Final per-student output, in first-seen order. Does not consume or
    /// modify the book.
    pub fn finalize(&self) -> Vec<StudentSummary> {
        self.records.iter().map(StudentSummary::from).collect()
    }
}

/// Folds pages, strictly in page order, into per-student records.
pub struct Aggregator {
    reconciler: Reconciler,
    book: StudentBook,
}

impl Aggregator {
    pub fn new(reconciler: Reconciler) -> Self {
        Aggregator {
            reconciler,
            book: StudentBook::new(),
        }
    }

    pub async fn fold(&mut self, page: PageInput<'_>) -> PageReport {
        if page.extraction.is_unidentified() {
            warn!(
                page = page.page_index,
                page_no = %page.extraction.page_no,
                "student id not filled in, folding into the shared unknown bucket"
            );
        }
        let record = self
            .book
            .entry(&page.extraction.student_id, &page.extraction.student_name);
        self.reconciler.reconcile(record, page).await
    }

    pub fn into_book(self) -> StudentBook {
        self.book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnswersheetError;
    use crate::geometry::Region;
    use crate::llm::{ImageSource, Usage};
    use crate::merge::{MergedRegions, RegionMerger};
    use crate::model::PageExtraction;
    use crate::reconcile::ContinuationOutcome;
    use crate::storage::ArtifactStore;
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// References are `ref-N` in upload order.
    #[derive(Default)]
    struct CountingStore {
        next: AtomicUsize,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn put_jpeg(&self, key: &str, _bytes: Vec<u8>) -> Result<String, AnswersheetError> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("ref-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }
    }

    /// Returns the first `len(questions)` regions it is given.
    #[derive(Default)]
    struct TakeFirstMerger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegionMerger for TakeFirstMerger {
        async fn merge(
            &self,
            regions: &[Region],
            question_numbers: &[String],
            _image: ImageSource,
        ) -> Result<MergedRegions, AnswersheetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MergedRegions {
                regions: regions[..question_numbers.len()].to_vec(),
                usage: Usage::default(),
            })
        }
    }

    struct Page {
        extraction: PageExtraction,
        regions: Vec<Region>,
    }

    fn page(student: &str, page_no: &str, questions: &[&str], continuation: bool, regions: usize) -> Page {
        Page {
            extraction: PageExtraction {
                student_id: student.into(),
                student_name: format!("{} name", student),
                page_no: page_no.into(),
                question_numbers: questions.iter().map(|q| q.to_string()).collect(),
                starts_with_continuation: if continuation { "true" } else { "false" }.into(),
            },
            regions: (0..regions as i32)
                .map(|i| Region::rect(50, 300 + i * 100, 400, 390 + i * 100))
                .collect(),
        }
    }

    fn blank_page() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(600, 800))
    }

    async fn fold_all(
        pages: &[Page],
        merger: Arc<TakeFirstMerger>,
    ) -> (StudentBook, Vec<PageReport>, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        let mut aggregator = Aggregator::new(Reconciler::new(merger, store.clone()));
        let image = blank_page();
        let mut reports = Vec::new();
        for (i, p) in pages.iter().enumerate() {
            let report = aggregator
                .fold(PageInput {
                    page_index: i,
                    extraction: &p.extraction,
                    regions: p.regions.clone(),
                    image: &image,
                })
                .await;
            reports.push(report);
        }
        (aggregator.into_book(), reports, store)
    }

    #[test]
    fn test_book_keeps_first_seen_order_and_name() {
        let mut book = StudentBook::new();
        book.entry("S2", "Bea");
        book.entry("S1", "Ada");
        book.entry("S2", "Renamed").page_numbers.push("4".into());

        let ids: Vec<&str> = book.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        assert_eq!(book.get("S2").unwrap().student_name, "Bea");
        assert_eq!(book.get("S2").unwrap().page_numbers, vec!["4"]);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_finalize_does_not_mutate() {
        let mut book = StudentBook::new();
        book.entry("S1", "Ada").answers.push("1", "ref-0".into());
        let before = book.clone();
        let first = book.finalize();
        let second = book.finalize();
        assert_eq!(first, second);
        assert_eq!(book, before);
        assert_eq!(first[0].answers[0].question_no, "1");
    }

    #[tokio::test]
    async fn test_continuation_across_pages() {
        let pages = vec![
            page("S1", "1", &["1", "2"], false, 2),
            page("S1", "2", &[], true, 0),
        ];
        let (book, reports, _) = fold_all(&pages, Arc::default()).await;

        let record = book.get("S1").unwrap();
        assert_eq!(record.page_numbers, vec!["1", "2"]);
        assert_eq!(record.question_answered, vec!["1", "2"]);
        assert_eq!(record.answers.get("1").unwrap(), ["ref-0"]);
        assert_eq!(record.answers.get("2").unwrap(), ["ref-1", "ref-2"]);
        assert_eq!(
            reports[1].continuation,
            ContinuationOutcome::Attached {
                question_no: "2".into()
            }
        );
    }

    #[tokio::test]
    async fn test_single_question_without_regions_uses_default() {
        let pages = vec![page("S1", "1", &["3"], false, 0)];
        let (book, reports, store) = fold_all(&pages, Arc::default()).await;
        assert!(reports[0].defaulted);
        assert_eq!(book.get("S1").unwrap().answers.get("3").unwrap().len(), 1);
        assert!(store.keys.lock().unwrap()[0].starts_with("S1/3-"));
    }

    #[tokio::test]
    async fn test_exact_merge_result_is_used_as_is() {
        let merger = Arc::new(TakeFirstMerger::default());
        let pages = vec![page("S1", "1", &["1"], false, 3)];
        let (book, reports, _) = fold_all(&pages, merger.clone()).await;
        assert_eq!(merger.calls.load(Ordering::SeqCst), 1);
        assert!(reports[0].merged);
        assert_eq!(reports[0].truncated, 0);
        assert!(!reports[0].defaulted);
        assert_eq!(book.get("S1").unwrap().answers.len(), 1);
    }

    #[tokio::test]
    async fn test_fold_is_deterministic() {
        let pages = vec![
            page("S1", "1", &["1", "2"], false, 2),
            page("S2", "1", &["1"], false, 3),
            page("S1", "2", &["3"], true, 1),
        ];
        let (first, _, _) = fold_all(&pages, Arc::default()).await;
        let (second, _, _) = fold_all(&pages, Arc::default()).await;
        assert_eq!(first.finalize(), second.finalize());
    }

    #[tokio::test]
    async fn test_fold_is_order_sensitive() {
        let forward = vec![
            page("S1", "1", &["1", "2"], false, 2),
            page("S1", "2", &["3"], true, 1),
        ];
        let reversed = vec![
            page("S1", "2", &["3"], true, 1),
            page("S1", "1", &["1", "2"], false, 2),
        ];
        let (a, _, _) = fold_all(&forward, Arc::default()).await;
        let (b, reports, _) = fold_all(&reversed, Arc::default()).await;

        assert_eq!(a.get("S1").unwrap().answers.get("2").unwrap().len(), 2);
        assert_eq!(b.get("S1").unwrap().answers.get("2").unwrap().len(), 1);
        assert_eq!(reports[0].continuation, ContinuationOutcome::Dropped);
        assert_ne!(a.finalize(), b.finalize());
    }

    #[tokio::test]
    async fn test_unknown_students_share_a_bucket() {
        let pages = vec![
            page("unknown", "1", &["1"], false, 1),
            page("S1", "1", &["1"], false, 1),
            page("unknown", "2", &["2"], false, 1),
        ];
        let (book, _, _) = fold_all(&pages, Arc::default()).await;
        let summaries = book.finalize();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].student_id, "unknown");
        assert_eq!(summaries[0].page_numbers, vec!["1", "2"]);
    }
}
