use crate::geometry::{PageShape, Region};
use crate::model::{PageExtraction, PageRegions};

/// One question paired with the region its answer is cropped from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub question_no: String,
    pub region: Region,
}

/// Pure outcome of reconciling a page's extraction with its regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    /// Leading region to attach to the previous question, if the page
    /// starts with a continuation.
    pub continuation: Option<Region>,
    /// Question/region pairs in question order.
    pub pairings: Vec<Pairing>,
    /// The detector output was replaced by full-page default regions.
    pub defaulted: bool,
    /// Regions left over after pairing every question.
    pub surplus: usize,
}

/// Drop every detected region when the page lists no questions.
pub fn usable_regions(extraction: &PageExtraction, regions: PageRegions) -> PageRegions {
    if extraction.question_numbers.is_empty() {
        Vec::new()
    } else {
        regions
    }
}

/// More regions than questions: the detector split at least one answer.
pub fn needs_merge(extraction: &PageExtraction, regions: &[Region]) -> bool {
    extraction.question_numbers.len() < regions.len()
}

/// Plan the crops for one page.
///
/// `regions` are the detector's regions after any merge, top to bottom.
/// Under-detection replaces the whole list with one full-page region per
/// question; a partial list cannot be paired positionally. Surplus regions
/// are left unpaired.
pub fn plan_page(extraction: &PageExtraction, regions: &[Region], shape: PageShape) -> PagePlan {
    let questions = &extraction.question_numbers;
    let regions: &[Region] = if questions.is_empty() { &[] } else { regions };

    let continuation = extraction
        .starts_continuation()
        .then(|| Region::continuation(shape, regions.first()));

    let defaulted = questions.len() > regions.len();
    let paired: Vec<Region> = if defaulted {
        vec![Region::full_page(shape); questions.len()]
    } else {
        regions.to_vec()
    };
    let surplus = paired.len().saturating_sub(questions.len());

    let pairings = questions
        .iter()
        .zip(paired)
        .map(|(question_no, region)| Pairing {
            question_no: question_no.clone(),
            region,
        })
        .collect();

    PagePlan {
        continuation,
        pairings,
        defaulted,
        surplus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: PageShape = PageShape {
        height: 2200,
        width: 1700,
    };

    fn page(questions: &[&str], continuation: bool) -> PageExtraction {
        PageExtraction {
            student_id: "S1".into(),
            student_name: "Ada".into(),
            page_no: "1".into(),
            question_numbers: questions.iter().map(|q| q.to_string()).collect(),
            starts_with_continuation: if continuation { "true" } else { "false" }.into(),
        }
    }

    #[test]
    fn test_empty_questions_discard_regions() {
        let extraction = page(&[], false);
        let regions = vec![Region::rect(50, 300, 1500, 900)];
        assert!(usable_regions(&extraction, regions.clone()).is_empty());

        let plan = plan_page(&extraction, &regions, SHAPE);
        assert!(plan.pairings.is_empty());
        assert!(!plan.defaulted);
        assert_eq!(plan.surplus, 0);
    }

    #[test]
    fn test_pairs_in_order() {
        let extraction = page(&["1", "2"], false);
        let regions = vec![
            Region::rect(50, 300, 1500, 890),
            Region::rect(50, 900, 1500, 2150),
        ];
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert_eq!(plan.pairings.len(), 2);
        assert_eq!(plan.pairings[0].question_no, "1");
        assert_eq!(plan.pairings[0].region, regions[0]);
        assert_eq!(plan.pairings[1].region, regions[1]);
        assert!(plan.continuation.is_none());
    }

    #[test]
    fn test_under_detection_uses_default_for_every_question() {
        let extraction = page(&["1", "2", "3"], false);
        let regions = vec![Region::rect(50, 300, 1500, 890)];
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert!(plan.defaulted);
        assert_eq!(plan.pairings.len(), 3);
        assert!(plan
            .pairings
            .iter()
            .all(|p| p.region == Region::full_page(SHAPE)));
    }

    #[test]
    fn test_surplus_left_unpaired() {
        let extraction = page(&["1"], false);
        let regions = vec![
            Region::rect(50, 300, 1500, 890),
            Region::rect(50, 900, 1500, 2150),
        ];
        assert!(needs_merge(&extraction, &regions));
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert_eq!(plan.pairings.len(), 1);
        assert_eq!(plan.surplus, 1);
    }

    #[test]
    fn test_continuation_stops_above_first_region() {
        let extraction = page(&["4"], true);
        let regions = vec![Region::rect(50, 1100, 1500, 2150)];
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert_eq!(
            plan.continuation,
            Some(Region::rect(50, 240, 1500, 1090))
        );
    }

    #[test]
    fn test_continuation_without_questions_covers_page() {
        let extraction = page(&[], true);
        let regions = vec![Region::rect(50, 1100, 1500, 2150)];
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert_eq!(plan.continuation, Some(Region::full_page(SHAPE)));
        assert!(plan.pairings.is_empty());
    }

    #[test]
    fn test_exact_count_not_padded() {
        let extraction = page(&["1", "2"], false);
        let regions = vec![
            Region::rect(50, 300, 1500, 890),
            Region::rect(50, 900, 1500, 2150),
        ];
        assert!(!needs_merge(&extraction, &regions));
        let plan = plan_page(&extraction, &regions, SHAPE);
        assert!(!plan.defaulted);
        assert_eq!(plan.surplus, 0);
    }
}
