//! Figure rasterisation: render PDF figures from arXiv sources to PNG.
//!
//! Authors commonly include vector figures as single-page PDFs. pandoc keeps
//! the reference as-is, and neither the block converter nor the image host
//! can do anything with a PDF, so each one is rendered to a PNG next to the
//! original before the LaTeX is rendered.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is not safe to call
//! from async contexts. The whole batch runs on the blocking pool with a
//! single library binding.

use crate::error::ArchiveError;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One figure to render: source PDF and destination PNG.
#[derive(Debug, Clone)]
pub struct FigureJob {
    pub pdf: PathBuf,
    pub png: PathBuf,
}

/// Render page 1 of every job's PDF to its PNG path.
///
/// `max_pixels` caps the longest edge of the output.
pub async fn rasterise_pdf_figures(
    jobs: Vec<FigureJob>,
    max_pixels: u32,
) -> Result<Vec<FigureJob>, ArchiveError> {
    if jobs.is_empty() {
        return Ok(jobs);
    }
    tokio::task::spawn_blocking(move || rasterise_blocking(jobs, max_pixels))
        .await
        .map_err(|e| ArchiveError::Internal(format!("Render task panicked: {}", e)))?
}

fn rasterise_blocking(
    jobs: Vec<FigureJob>,
    max_pixels: u32,
) -> Result<Vec<FigureJob>, ArchiveError> {
    let first = jobs[0].pdf.clone();
    let pdfium = bind_pdfium().map_err(|detail| ArchiveError::RasterisationFailed {
        path: first,
        detail,
    })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    for job in &jobs {
        render_first_page(&pdfium, &job.pdf, &job.png, &render_config)?;
    }
    info!("Rasterised {} PDF figures", jobs.len());
    Ok(jobs)
}

fn render_first_page(
    pdfium: &Pdfium,
    pdf: &Path,
    png: &Path,
    render_config: &PdfRenderConfig,
) -> Result<(), ArchiveError> {
    let fail = |detail: String| ArchiveError::RasterisationFailed {
        path: pdf.to_path_buf(),
        detail,
    };

    let document = pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| fail(format!("{:?}", e)))?;
    let page = document
        .pages()
        .get(0)
        .map_err(|e| fail(format!("{:?}", e)))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| fail(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    image
        .save_with_format(png, ImageFormat::Png)
        .map_err(|e| fail(format!("PNG encode: {}", e)))?;

    debug!(
        "Rendered {} → {} ({}x{} px)",
        pdf.display(),
        png.display(),
        image.width(),
        image.height()
    );
    Ok(())
}

/// Bind pdfium from `PDFIUM_LIB_PATH`, the working directory, or the system.
fn bind_pdfium() -> Result<Pdfium, String> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| format!("pdfium library unavailable ({:?}); set PDFIUM_LIB_PATH", e))?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_batch_needs_no_library() {
        let out = rasterise_pdf_figures(Vec::new(), 1600).await.unwrap();
        assert!(out.is_empty());
    }
}
