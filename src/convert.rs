//! Conversion drivers: progressive (resumable) and batch (one-shot).
//!
//! ## Progressive
//!
//! Pages are walked strictly in ascending order on a single task. Each page
//! that is neither already present in the artifact nor before the start page
//! is sent to the inference client; its section is appended, flushed and
//! synced before the next page starts. If a page fails for good, the run stops
//! and everything before it stays on disk as a valid checkpoint, so re-running
//! with the same output path picks up exactly where it stopped.
//!
//! ## Batch
//!
//! One request carrying every page in order, one atomic write (temp file +
//! rename). Used for single-page documents, where there is nothing to resume.

use crate::backend::resolve_backend;
use crate::checkpoint::{load_artifact_state, render_section};
use crate::config::{ConversionConfig, ConversionMode};
use crate::error::Vision2MdError;
use crate::output::ConversionReport;
use crate::pipeline::llm::InferenceClient;
use crate::pipeline::render::PdfPageSource;
use crate::pipeline::source::{image_mime_type, read_image_file, ImageDirSource, InMemorySource, PageSource};
use crate::progress::SkipReason;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Convert `source` into `output`, choosing the driver from `config.mode`.
///
/// [`ConversionMode::Auto`] uses the batch driver for single-page documents
/// and the progressive driver otherwise.
pub async fn convert_to_file(
    source: &dyn PageSource,
    client: &mut InferenceClient,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionReport, Vision2MdError> {
    let total = source.page_count();
    if total == 0 {
        return Err(Vision2MdError::NoPages {
            input: source.describe(),
        });
    }

    match config.mode.resolve(total) {
        ConversionMode::Batch => convert_batch(source, client, output, config).await,
        _ => convert_progressive(source, client, output, config).await,
    }
}

/// Resolve the page source and backend from `config`, then convert.
///
/// `input` may be a PDF, a single page image, or a directory of page images.
pub async fn convert_path(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionReport, Vision2MdError> {
    let input = input.as_ref();
    info!("Starting conversion: {}", input.display());

    let source = open_source(input, config).await?;
    let backend = resolve_backend(config)?;
    let mut client = InferenceClient::from_config(backend, config);
    info!(
        "Using backend '{}' with model '{}'",
        client.backend_name(),
        client.model()
    );

    convert_to_file(source.as_ref(), &mut client, output, config).await
}

/// Synchronous wrapper around [`convert_path`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_path_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionReport, Vision2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Vision2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_path(input, output, config))
}

/// Pick a page source for `input`: directory → images, image → one page, else PDF.
pub async fn open_source(
    input: &Path,
    config: &ConversionConfig,
) -> Result<Box<dyn PageSource>, Vision2MdError> {
    if input.is_dir() {
        return Ok(Box::new(ImageDirSource::open(input)?));
    }
    if image_mime_type(input).is_some() {
        let page = read_image_file(input, 1).await?;
        return Ok(Box::new(
            InMemorySource::new(vec![page]).named(input.display().to_string()),
        ));
    }
    Ok(Box::new(PdfPageSource::open(input, config).await?))
}

/// `report.pdf` → `report.md`; a directory `scans/` → `scans.md`.
pub fn default_output_path(input: &Path) -> PathBuf {
    if input.is_dir() {
        let trimmed = input.components().as_path().to_path_buf();
        return trimmed.with_extension("md");
    }
    input.with_extension("md")
}

/// Resumable page-by-page conversion.
///
/// # Errors
/// - [`Vision2MdError::InvalidStartPage`] when `config.start_page` exceeds the
///   page count; detected before the artifact is read or opened.
/// - [`Vision2MdError::PageFailed`] when a page fails inference; earlier pages
///   remain in the artifact.
/// - I/O and page-source errors are returned as-is.
pub async fn convert_progressive(
    source: &dyn PageSource,
    client: &mut InferenceClient,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionReport, Vision2MdError> {
    let run_start = Instant::now();
    let output = output.as_ref();
    let total = source.page_count();
    check_page_range(source, config.start_page)?;
    let start_page = config.effective_start_page();

    // ── Recover the checkpoint from the artifact itself ──────────────────
    let state = load_artifact_state(config.checkpoint.as_ref(), output).await?;
    let resuming = state.completed.range(1..=total).next().is_some();
    let append = resuming || (state.len > 0 && start_page != 1);
    info!(
        "{} pages, start page {}, {} already completed; opening {} in {} mode",
        total,
        start_page,
        state.completed.len(),
        output.display(),
        if append { "append" } else { "overwrite" }
    );

    let mut file = open_artifact(output, append).await?;
    let mut artifact_has_content = append && state.len > 0;

    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_conversion_start(total);
    }

    let mut report = ConversionReport {
        output_path: output.to_path_buf(),
        mode: ConversionMode::Progressive,
        total_pages: total,
        written_pages: Vec::new(),
        resumed_pages: Vec::new(),
        not_requested_pages: Vec::new(),
        duration_ms: 0,
    };

    for page in 1..=total {
        if state.completed.contains(&page) {
            info!("Skipping page {}/{} (already completed)", page, total);
            if let Some(cb) = cb {
                cb.on_page_skipped(page, total, SkipReason::AlreadyCompleted);
            }
            report.resumed_pages.push(page);
            continue;
        }
        if page < start_page {
            debug!("Skipping page {}/{} (before start page {})", page, total, start_page);
            if let Some(cb) = cb {
                cb.on_page_skipped(page, total, SkipReason::BeforeStartPage);
            }
            report.not_requested_pages.push(page);
            continue;
        }

        if let Some(cb) = cb {
            cb.on_page_start(page, total);
        }
        let image = source.load_page(page).await?;

        let markdown = match client.convert(vec![image]).await {
            Ok(markdown) => markdown,
            Err(err) => {
                warn!(
                    "Page {}/{} failed: {}; partial output kept at {}",
                    page,
                    total,
                    err,
                    output.display()
                );
                if let Some(cb) = cb {
                    cb.on_page_error(page, total, &err.to_string());
                }
                return Err(Vision2MdError::PageFailed {
                    page,
                    output: output.to_path_buf(),
                    source: err,
                });
            }
        };

        let section = render_section(page, &markdown, !artifact_has_content);
        write_section(&mut file, output, &section).await?;
        artifact_has_content = true;

        info!("Page {}/{} written to {}", page, total, output.display());
        if let Some(cb) = cb {
            cb.on_page_written(page, total, output);
        }
        report.written_pages.push(page);
    }

    file.flush().await.map_err(|e| write_error(output, e))?;
    drop(file);

    report.duration_ms = run_start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {} written, {} resumed, {} before start page, {}ms",
        report.written_pages.len(),
        report.resumed_pages.len(),
        report.not_requested_pages.len(),
        report.duration_ms
    );
    if let Some(cb) = cb {
        cb.on_conversion_complete(total, report.written_pages.len());
    }
    Ok(report)
}

/// One request for the whole document, one atomic write, no resume.
///
/// Pages before `config.start_page` are left out of the request. A
/// single-page result is written as a `## Page N` section, so a later
/// progressive run over the same artifact sees it as completed.
pub async fn convert_batch(
    source: &dyn PageSource,
    client: &mut InferenceClient,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionReport, Vision2MdError> {
    let run_start = Instant::now();
    let output = output.as_ref();
    let total = source.page_count();
    check_page_range(source, config.start_page)?;
    let start_page = config.effective_start_page();

    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_conversion_start(total);
        for page in 1..start_page {
            cb.on_page_skipped(page, total, SkipReason::BeforeStartPage);
        }
    }

    let mut images = Vec::with_capacity(total + 1 - start_page);
    for page in start_page..=total {
        images.push(source.load_page(page).await?);
    }
    let pages: Vec<usize> = images.iter().map(|img| img.page).collect();
    info!("Batch converting {} page(s) in one request", pages.len());

    if let Some(cb) = cb {
        cb.on_page_start(start_page, total);
    }
    let markdown = match client.convert(images).await {
        Ok(markdown) => markdown,
        Err(err) => {
            warn!("Batch conversion failed: {}", err);
            if let Some(cb) = cb {
                cb.on_page_error(start_page, total, &err.to_string());
            }
            return Err(Vision2MdError::BatchFailed {
                output: output.to_path_buf(),
                source: err,
            });
        }
    };

    let content = match pages.as_slice() {
        [only] => render_section(*only, &markdown, true),
        _ => markdown,
    };
    write_atomic(output, &content).await?;

    if let Some(cb) = cb {
        for &page in &pages {
            cb.on_page_written(page, total, output);
        }
        cb.on_conversion_complete(total, pages.len());
    }

    Ok(ConversionReport {
        output_path: output.to_path_buf(),
        mode: ConversionMode::Batch,
        total_pages: total,
        written_pages: pages,
        resumed_pages: Vec::new(),
        not_requested_pages: (1..start_page).collect(),
        duration_ms: run_start.elapsed().as_millis() as u64,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn check_page_range(source: &dyn PageSource, start_page: usize) -> Result<(), Vision2MdError> {
    let total = source.page_count();
    if total == 0 {
        return Err(Vision2MdError::NoPages {
            input: source.describe(),
        });
    }
    if start_page > total {
        return Err(Vision2MdError::InvalidStartPage { start_page, total });
    }
    Ok(())
}

fn write_error(path: &Path, source: std::io::Error) -> Vision2MdError {
    Vision2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), Vision2MdError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_error(path, e))?;
    }
    Ok(())
}

/// Open the artifact for appending (resume) or truncating (fresh run).
async fn open_artifact(path: &Path, append: bool) -> Result<File, Vision2MdError> {
    ensure_parent_dir(path).await?;

    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).await.map_err(|e| write_error(path, e))
}

/// Write a whole section in one call and make it durable before returning.
async fn write_section(file: &mut File, path: &Path, section: &str) -> Result<(), Vision2MdError> {
    file.write_all(section.as_bytes())
        .await
        .map_err(|e| write_error(path, e))?;
    file.flush().await.map_err(|e| write_error(path, e))?;
    file.sync_data().await.map_err(|e| write_error(path, e))
}

/// Atomic write: write to a sibling temp file, then rename over `path`.
async fn write_atomic(path: &Path, content: &str) -> Result<(), Vision2MdError> {
    ensure_parent_dir(path).await?;

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| write_error(path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| write_error(path, e))
}
