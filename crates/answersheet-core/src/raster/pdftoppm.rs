use crate::error::AnswersheetError;
use crate::raster::PageRasterizer;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::process::Command;

const PAGE_PREFIX: &str = "page";

/// Rasterization backend using pdftoppm (from poppler-utils).
pub struct PdftoppmRasterizer;

impl PdftoppmRasterizer {
    pub fn new() -> Self {
        PdftoppmRasterizer
    }

    /// Check if pdftoppm is available on the system.
    pub fn is_available() -> bool {
        Command::new("pdftoppm")
            .arg("-v")
            .output()
            .map(|o| o.status.success() || !o.stderr.is_empty())
            .unwrap_or(false)
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, AnswersheetError> {
        let workdir = tempfile::tempdir().map_err(|e| AnswersheetError::Raster(e.to_string()))?;
        let pdf_path = workdir.path().join("submission.pdf");
        std::fs::write(&pdf_path, pdf_bytes).map_err(|e| AnswersheetError::Raster(e.to_string()))?;

        let output = Command::new("pdftoppm")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-png")
            .arg(&pdf_path)
            .arg(workdir.path().join(PAGE_PREFIX))
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AnswersheetError::PdftoppmNotFound
                } else {
                    AnswersheetError::Raster(format!("pdftoppm failed: {}", e))
                }
            })?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(AnswersheetError::PdftoppmFailed { code, stderr });
        }

        let pages = page_files(workdir.path())?;
        if pages.is_empty() {
            return Err(AnswersheetError::Raster("pdftoppm produced no pages".into()));
        }

        pages
            .iter()
            .map(|path| image::open(path).map_err(AnswersheetError::from))
            .collect()
    }

    fn backend_name(&self) -> &str {
        "pdftoppm"
    }
}

/// Rendered page files in page order.
///
/// pdftoppm names pages `page-N.png`, zero-padding N to the width of the
/// page count, so the number is parsed rather than sorted as text.
fn page_files(dir: &Path) -> Result<Vec<PathBuf>, AnswersheetError> {
    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(page_no) = page_number(name) {
            numbered.push((page_no, path));
        }
    }
    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(PAGE_PREFIX)?
        .strip_prefix('-')?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_number_parsing() {
        assert_eq!(page_number("page-1.png"), Some(1));
        assert_eq!(page_number("page-010.png"), Some(10));
        assert_eq!(page_number("submission.pdf"), None);
        assert_eq!(page_number("page-x.png"), None);
    }

    #[test]
    fn test_page_files_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-02.png", "page-1.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = page_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-02.png", "page-10.png"]);
    }

    #[test]
    fn test_rasterize_rejects_garbage() {
        if !PdftoppmRasterizer::is_available() {
            return;
        }
        let result = PdftoppmRasterizer::new().rasterize(b"not a pdf", 72);
        assert!(matches!(
            result,
            Err(AnswersheetError::PdftoppmFailed { .. })
        ));
    }
}
