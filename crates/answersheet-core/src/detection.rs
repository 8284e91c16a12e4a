use crate::error::AnswersheetError;
use crate::geometry::{
    PageShape, Point, Region, REGION_BOTTOM_MARGIN, REGION_GAP, REGION_LEFT, REGION_RIGHT_MARGIN,
};
use crate::llm::{ImageSource, VisionModel, VisionRequest};
use crate::model::PageRegions;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Known downward bias of the point detector, in pixels.
pub const Y_OFFSET_CORRECTION: i32 = 50;

static MULTI_POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"x\d+="([\d.]+)" y\d+="([\d.]+)""#).expect("multi-point pattern is valid")
});

static SINGLE_POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"x="([\d.]+)" y="([\d.]+)""#).expect("single-point pattern is valid")
});

fn to_pixels(x_pct: &str, y_pct: &str, shape: PageShape) -> Option<Point> {
    let x: f64 = x_pct.parse().ok()?;
    let y: f64 = y_pct.parse().ok()?;
    Some(Point::new(
        (x / 100.0 * f64::from(shape.width)) as i32,
        (y / 100.0 * f64::from(shape.height)) as i32 - Y_OFFSET_CORRECTION,
    ))
}

/// Extract anchor points from detector text, sorted top to bottom.
///
/// Multi-point answers (`<points x1=".." y1=".." x2=..>`) yield every pair;
/// otherwise only the first single `x=".." y=".."` point is used. Values are
/// percentages of the page size.
pub fn parse_anchors(text: &str, shape: PageShape) -> Vec<Point> {
    let mut anchors: Vec<Point> = if text.contains("points") {
        MULTI_POINT_RE
            .captures_iter(text)
            .filter_map(|c| to_pixels(&c[1], &c[2], shape))
            .collect()
    } else {
        SINGLE_POINT_RE
            .captures(text)
            .and_then(|c| to_pixels(&c[1], &c[2], shape))
            .into_iter()
            .collect()
    };
    anchors.sort_by_key(|p| p.y);
    anchors
}

/// Extrapolate one answer region per anchor.
///
/// Each region spans the fixed horizontal band and runs from its anchor down
/// to just above the next anchor; the last one runs to the page bottom.
pub fn regions_from_anchors(anchors: &[Point], shape: PageShape) -> PageRegions {
    let right = shape.w() - REGION_RIGHT_MARGIN;
    anchors
        .iter()
        .enumerate()
        .map(|(i, anchor)| {
            let bottom = match anchors.get(i + 1) {
                Some(next) => next.y - REGION_GAP,
                None => shape.h() - REGION_BOTTOM_MARGIN,
            };
            Region::rect(REGION_LEFT, anchor.y, right, bottom)
        })
        .collect()
}

/// Region Inference Adapter over the point-detection model.
pub struct RegionDetector {
    model: Arc<dyn VisionModel>,
}

impl RegionDetector {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        RegionDetector { model }
    }

    /// Detect answer regions on one page, sorted top to bottom.
    ///
    /// Service faults are returned as errors. A reply without coordinates is
    /// zero detections.
    pub async fn detect(
        &self,
        prompt: &str,
        image: ImageSource,
        shape: PageShape,
    ) -> Result<PageRegions, AnswersheetError> {
        let request = VisionRequest::new(prompt, image);
        let reply = self.model.generate(&request).await?;

        let anchors = parse_anchors(&reply.text, shape);
        if anchors.is_empty() {
            warn!(model = %reply.model, "no coordinates found in detector output");
        } else {
            debug!(model = %reply.model, anchors = anchors.len(), "parsed detector anchors");
        }
        Ok(regions_from_anchors(&anchors, shape))
    }
}
