//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive a
//! notice for every decision the driver makes: page skipped, page sent, retry
//! scheduled, page written, page failed.
//!
//! Callbacks are the side channel for humans; the artifact itself is the only
//! contract. Forward events to a terminal progress bar, a log, or a channel
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_vision2md::{ConversionProgressCallback, ConversionConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_written(&self, page: usize, total: usize, output: &Path) {
//!         self.written.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} → {}", page, total, output.display());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { written: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Why the driver did not send a page to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The artifact already holds a `## Page N` section for it.
    AlreadyCompleted,
    /// The page lies before the requested start page.
    BeforeStartPage,
}

/// Called by the conversion drivers as they walk the document.
///
/// Pages are processed strictly in order on one task, so callbacks never
/// race each other; the `Send + Sync` bound only lets the callback live in a
/// shared [`crate::config::ConversionConfig`]. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first page is considered.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// A page was skipped without any write or inference call.
    fn on_page_skipped(&self, page: usize, total_pages: usize, reason: SkipReason) {
        let _ = (page, total_pages, reason);
    }

    /// Called just before the page is sent to the inference client.
    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// A retryable failure occurred; the client will sleep `delay` and retry.
    ///
    /// `attempt` is the 1-based retry number, `max_retries` the ceiling.
    fn on_retry(&self, page: usize, attempt: u32, max_retries: u32, delay: Duration, error: &str) {
        let _ = (page, attempt, max_retries, delay, error);
    }

    /// The page's section has been written and flushed to `output`.
    fn on_page_written(&self, page: usize, total_pages: usize, output: &Path) {
        let _ = (page, total_pages, output);
    }

    /// The page failed for good; the run stops here.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after the last page was written or skipped.
    ///
    /// `written` counts pages converted in this run (not resumed ones).
    fn on_conversion_complete(&self, total_pages: usize, written: usize) {
        let _ = (total_pages, written);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
