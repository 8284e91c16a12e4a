use crate::error::AnswersheetError;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

/// Fixed left edge of every synthesized or extrapolated answer region.
pub const REGION_LEFT: i32 = 50;
/// Distance between the right page edge and a region's right edge.
pub const REGION_RIGHT_MARGIN: i32 = 200;
/// Distance between the bottom page edge and the lowest region's bottom edge.
pub const REGION_BOTTOM_MARGIN: i32 = 50;
/// Top edge of default and continuation regions (below the page header).
pub const CONTENT_TOP: i32 = 240;
/// Gap left above the next region when a region is closed off.
pub const REGION_GAP: i32 = 10;

/// Pixel coordinate in source-page space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

/// Page dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageShape {
    pub height: u32,
    pub width: u32,
}

impl PageShape {
    pub fn new(height: u32, width: u32) -> Self {
        PageShape { height, width }
    }

    pub fn of(image: &DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        PageShape { height, width }
    }

    pub(crate) fn h(&self) -> i32 {
        i32::try_from(self.height).unwrap_or(i32::MAX)
    }

    pub(crate) fn w(&self) -> i32 {
        i32::try_from(self.width).unwrap_or(i32::MAX)
    }
}

/// Axis-aligned extent of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn is_degenerate(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    fn degenerate_error(&self) -> AnswersheetError {
        AnswersheetError::DegenerateRegion {
            left: self.left,
            top: self.top,
            right: self.right,
            bottom: self.bottom,
        }
    }
}

/// Quadrilateral answer region.
///
/// Corners are not required to be axis-aligned; cropping always uses
/// [`Region::bounds`]. Regions built here follow the detector's corner
/// order: p1 top-left, p2 top-right, p3 bottom-left, p4 bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub p1: Point,
    pub p2: Point,
    pub p3: Point,
    pub p4: Point,
}

impl Region {
    pub fn rect(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Region {
            p1: Point::new(left, top),
            p2: Point::new(right, top),
            p3: Point::new(left, bottom),
            p4: Point::new(right, bottom),
        }
    }

    /// Placeholder region covering the answer area of a whole page.
    pub fn full_page(shape: PageShape) -> Self {
        Region::rect(
            REGION_LEFT,
            CONTENT_TOP,
            shape.w() - REGION_RIGHT_MARGIN,
            shape.h() - REGION_BOTTOM_MARGIN,
        )
    }

    /// Leading region of a continuation page: from the content top down to
    /// just above the first detected region, or to the page bottom.
    pub fn continuation(shape: PageShape, first: Option<&Region>) -> Self {
        match first {
            Some(first) => Region::rect(
                REGION_LEFT,
                CONTENT_TOP,
                shape.w() - REGION_RIGHT_MARGIN,
                first.p1.y - REGION_GAP,
            ),
            None => Region::full_page(shape),
        }
    }

    /// True when the region was built top-down and left-to-right, i.e. its
    /// bottom-left corner lies below its top-left corner.
    pub fn is_upright(&self) -> bool {
        self.p3.y > self.p1.y && self.p2.x > self.p1.x
    }

    pub fn corners(&self) -> [Point; 4] {
        [self.p1, self.p2, self.p3, self.p4]
    }

    pub fn bounds(&self) -> Bounds {
        let corners = self.corners();
        let xs = corners.iter().map(|p| p.x);
        let ys = corners.iter().map(|p| p.y);
        Bounds {
            left: xs.clone().min().unwrap_or_default(),
            right: xs.max().unwrap_or_default(),
            top: ys.clone().min().unwrap_or_default(),
            bottom: ys.max().unwrap_or_default(),
        }
    }
}

/// Crop the axis-aligned bounds of `region` out of `image`.
///
/// Bounds are clamped to the image. Zero-area regions, before or after
/// clamping, are rejected with [`AnswersheetError::DegenerateRegion`].
pub fn crop(image: &DynamicImage, region: &Region) -> Result<DynamicImage, AnswersheetError> {
    let bounds = region.bounds();
    if bounds.is_degenerate() {
        return Err(bounds.degenerate_error());
    }

    let shape = PageShape::of(image);
    let clamped = Bounds {
        left: bounds.left.clamp(0, shape.w()),
        top: bounds.top.clamp(0, shape.h()),
        right: bounds.right.clamp(0, shape.w()),
        bottom: bounds.bottom.clamp(0, shape.h()),
    };
    if clamped.is_degenerate() {
        return Err(bounds.degenerate_error());
    }

    // Non-negative after clamping.
    Ok(image.crop_imm(
        clamped.left as u32,
        clamped.top as u32,
        (clamped.right - clamped.left) as u32,
        (clamped.bottom - clamped.top) as u32,
    ))
}
