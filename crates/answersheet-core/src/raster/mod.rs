pub mod pdftoppm;

use crate::error::AnswersheetError;
use image::DynamicImage;

/// Resolution the pipeline renders pages at unless configured otherwise.
pub const DEFAULT_DPI: u32 = 200;

/// Trait for PDF rasterization backends.
pub trait PageRasterizer: Send + Sync {
    /// Render every page of the PDF at `dpi`, in page order.
    fn rasterize(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, AnswersheetError>;

    /// Name of this rasterization backend (for diagnostics).
    fn backend_name(&self) -> &str;
}
