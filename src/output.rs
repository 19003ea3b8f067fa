//! What a conversion run reports back to its caller.

use crate::config::ConversionMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Summary of one successful run.
///
/// Serialisable so the CLI can emit it with `--json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionReport {
    /// The artifact that was written (and, in progressive mode, resumed).
    pub output_path: PathBuf,
    /// The driver that actually ran (never `Auto`).
    pub mode: ConversionMode,
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages converted during this run, ascending.
    pub written_pages: Vec<usize>,
    /// Pages found already completed in the artifact, ascending.
    pub resumed_pages: Vec<usize>,
    /// Pages before the start page that were neither present nor processed.
    pub not_requested_pages: Vec<usize>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl ConversionReport {
    /// True when every page of the document is now present in the artifact.
    pub fn is_complete(&self) -> bool {
        self.not_requested_pages.is_empty()
            && self.written_pages.len() + self.resumed_pages.len() == self.total_pages
    }
}
