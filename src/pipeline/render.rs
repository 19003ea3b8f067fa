//! PDF rasterisation: a lazy, pdfium-backed [`PageSource`].
//!
//! ## Why a worker thread?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Each [`PdfPageSource`] owns one dedicated thread that binds pdfium and
//! loads the document once, then renders pages as the driver requests them.
//! Tokio workers never stall during CPU-heavy rendering, and a long document
//! is parsed once instead of once per page. The thread exits when the source
//! is dropped.
//!
//! ## Why lazy?
//!
//! The page count is read once when the source is opened; each page is
//! rendered only when the driver asks for it. Resuming a half-finished
//! 300-page document therefore renders only the pages still missing.

use crate::config::ConversionConfig;
use crate::error::Vision2MdError;
use crate::pipeline::encode;
use crate::pipeline::source::{PageImage, PageSource};
use futures::future::BoxFuture;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

type RenderResult = Result<PageImage, Vision2MdError>;

/// One page render request for the worker thread.
#[derive(Debug)]
struct RenderJob {
    page: usize,
    reply: oneshot::Sender<RenderResult>,
}

/// A PDF on disk, rendered page-by-page on demand.
#[derive(Debug, Clone)]
pub struct PdfPageSource {
    path: PathBuf,
    page_count: usize,
    jobs: mpsc::UnboundedSender<RenderJob>,
}

impl PdfPageSource {
    /// Validate `path`, start the render worker, and return the source once
    /// the worker has loaded the document and counted its pages.
    pub async fn open(path: impl AsRef<Path>, config: &ConversionConfig) -> Result<Self, Vision2MdError> {
        let path = path.as_ref().to_path_buf();
        check_pdf_magic(&path)?;

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker_path = path.clone();
        let password = config.password.clone();
        let max_pixels = config.max_rendered_pixels;

        std::thread::Builder::new()
            .name("vision2md-pdfium".to_string())
            .spawn(move || render_worker(&worker_path, password.as_deref(), max_pixels, ready_tx, jobs_rx))
            .map_err(|e| Vision2MdError::Internal(format!("Failed to start PDF render thread: {}", e)))?;

        let page_count = ready_rx
            .await
            .map_err(|_| Vision2MdError::Internal("PDF render thread exited while opening".to_string()))??;

        info!("PDF {} has {} pages", path.display(), page_count);
        Ok(Self::from_worker(path, page_count, jobs_tx))
    }

    fn from_worker(path: PathBuf, page_count: usize, jobs: mpsc::UnboundedSender<RenderJob>) -> Self {
        Self { path, page_count, jobs }
    }
}

impl PageSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn load_page(&self, page: usize) -> BoxFuture<'_, Result<PageImage, Vision2MdError>> {
        Box::pin(async move {
            if page == 0 || page > self.page_count {
                return Err(Vision2MdError::PageOutOfRange {
                    page,
                    total: self.page_count,
                });
            }
            let (reply, rx) = oneshot::channel();
            self.jobs
                .send(RenderJob { page, reply })
                .map_err(|_| Vision2MdError::Internal("PDF render thread has stopped".to_string()))?;
            rx.await
                .map_err(|_| Vision2MdError::Internal(format!("PDF render thread dropped page {}", page)))?
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Reject missing, unreadable, and non-PDF files before pdfium sees them.
fn check_pdf_magic(path: &Path) -> Result<(), Vision2MdError> {
    let mut f = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Vision2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Vision2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut magic = [0u8; 4];
    if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        return Err(Vision2MdError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Bind pdfium from `PDFIUM_LIB_PATH` when set, otherwise the system library.
fn bind_pdfium() -> Result<Pdfium, Vision2MdError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(&lib),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| Vision2MdError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn load_error(path: &Path, password: Option<&str>, err: PdfiumError) -> Vision2MdError {
    let err_str = format!("{:?}", err);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            Vision2MdError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            Vision2MdError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        Vision2MdError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

/// Body of the render thread: bind pdfium, load the document once, report
/// the page count, then serve jobs until every sender is gone.
fn render_worker(
    path: &Path,
    password: Option<&str>,
    max_pixels: u32,
    ready: oneshot::Sender<Result<usize, Vision2MdError>>,
    jobs: mpsc::UnboundedReceiver<RenderJob>,
) {
    let pdfium = match bind_pdfium() {
        Ok(pdfium) => pdfium,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let document = match pdfium.load_pdf_from_file(path, password) {
        Ok(document) => document,
        Err(e) => {
            let _ = ready.send(Err(load_error(path, password, e)));
            return;
        }
    };
    if ready.send(Ok(document.pages().len() as usize)).is_err() {
        return;
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);
    serve_jobs(jobs, |page| render_page(&document, &render_config, page));
    debug!("PDF render thread for {} finished", path.display());
}

fn serve_jobs(mut jobs: mpsc::UnboundedReceiver<RenderJob>, mut render: impl FnMut(usize) -> RenderResult) {
    while let Some(job) = jobs.blocking_recv() {
        // The requester may have gone away; the next job is still served.
        let _ = job.reply.send(render(job.page));
    }
}

fn render_page(document: &PdfDocument<'_>, render_config: &PdfRenderConfig, page: usize) -> RenderResult {
    let pages = document.pages();
    let pdf_page = pages
        .get((page - 1) as u16)
        .map_err(|e| Vision2MdError::RasterisationFailed {
            page,
            detail: format!("{:?}", e),
        })?;

    let bitmap = pdf_page
        .render_with_config(render_config)
        .map_err(|e| Vision2MdError::RasterisationFailed {
            page,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!("Rendered page {} → {}x{} px", page, image.width(), image.height());

    let png = encode::encode_png(&image).map_err(|e| Vision2MdError::RasterisationFailed {
        page,
        detail: format!("PNG encoding failed: {}", e),
    })?;
    Ok(PageImage::png(page, png))
}
