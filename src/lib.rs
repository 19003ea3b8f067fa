//! # edgequake-vision2md
//!
//! Convert page images (a PDF, a directory of scans, or a single image) to
//! Markdown with a Vision Language Model, one page at a time, in a way that
//! survives rate limits and interruptions.
//!
//! ## Why progressive?
//!
//! Free-tier vision endpoints rate-limit aggressively and long documents take
//! a while. Converting everything and writing once means a failure at page 180
//! loses 179 pages of paid-for work. Here every page is appended to the output
//! file as soon as it is converted, and the output file *is* the checkpoint:
//! re-running the same command skips every page whose `## Page N` header is
//! already present.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input
//!  │
//!  ├─ 1. Source     PDF (pdfium, rendered lazily) / image dir / single image
//!  ├─ 2. Checkpoint scan the existing artifact for `## Page N` headers
//!  ├─ 3. Pace       ≥ request_delay between consecutive requests
//!  ├─ 4. VLM        OpenRouter or any edgequake-llm provider, with backoff
//!  └─ 5. Append     one section per page, flushed + synced before the next
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_vision2md::{convert_path, ConversionConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from OPENROUTER_API_KEY / OPENAI_API_KEY / …
//!     let config = ConversionConfig::builder()
//!         .request_delay(Duration::from_secs(3))
//!         .build()?;
//!     let report = convert_path("book.pdf", "book.md", &config).await?;
//!     eprintln!(
//!         "{} pages written, {} resumed",
//!         report.written_pages.len(),
//!         report.resumed_pages.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vision2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-vision2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{resolve_backend, OpenRouterBackend, ProviderBackend};
pub use checkpoint::{CheckpointScanner, HeaderScanner, SECTION_SEPARATOR};
pub use config::{ConversionConfig, ConversionConfigBuilder, ConversionMode};
pub use convert::{
    convert_batch, convert_path, convert_path_sync, convert_progressive, convert_to_file,
    default_output_path, open_source,
};
pub use error::{InferenceError, InferenceErrorKind, Vision2MdError};
pub use output::ConversionReport;
pub use pipeline::llm::{ConversionRequest, InferenceClient, VisionBackend};
pub use pipeline::render::PdfPageSource;
pub use pipeline::source::{ImageDirSource, InMemorySource, PageImage, PageSource};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback, SkipReason};
