//! The output artifact doubles as the checkpoint.
//!
//! Every completed page is written as a section that starts with a header
//! line of the exact form `## Page <N>`; sections are joined by
//! [`SECTION_SEPARATOR`]. Recovering progress is therefore just a matter of
//! finding those header lines: no sidecar state file exists, so the
//! checkpoint can never drift from the Markdown the user actually has.
//!
//! ```text
//! ## Page 1
//!
//! …markdown…
//!
//! ---
//!
//! ## Page 2
//!
//! …markdown…
//! ```
//!
//! Scanning is isolated behind [`CheckpointScanner`] so a different strategy
//! (e.g. a manifest next to the artifact) can replace header scanning without
//! touching the driver.

use crate::error::Vision2MdError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Delimiter between two page sections. Never written before the first one.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

static PAGE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^## Page ([0-9]+)\r?$").expect("valid header regex"));

/// Recovers the set of completed pages from artifact contents.
pub trait CheckpointScanner: Send + Sync {
    fn scan(&self, contents: &str) -> BTreeSet<usize>;
}

/// Counts a page as completed when its `## Page N` header line is present.
///
/// Body integrity is not checked: a header whose body was cut off by a crash
/// still counts. The driver writes each section in one buffered write to keep
/// that window small.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderScanner;

impl CheckpointScanner for HeaderScanner {
    fn scan(&self, contents: &str) -> BTreeSet<usize> {
        PAGE_HEADER
            .captures_iter(contents)
            .filter_map(|caps| caps[1].parse::<usize>().ok())
            .collect()
    }
}

/// The header line for `page`.
pub fn page_header(page: usize) -> String {
    format!("## Page {page}")
}

/// A complete section for `page`, prefixed with the separator unless it is
/// the first section in the artifact.
pub fn render_section(page: usize, markdown: &str, first: bool) -> String {
    let header = page_header(page);
    let mut section = String::with_capacity(
        SECTION_SEPARATOR.len() + header.len() + 2 + markdown.len(),
    );
    if !first {
        section.push_str(SECTION_SEPARATOR);
    }
    section.push_str(&header);
    section.push_str("\n\n");
    section.push_str(markdown);
    section
}

/// What the driver needs to know about an existing artifact before opening it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactState {
    /// Pages whose headers are present.
    pub completed: BTreeSet<usize>,
    /// Byte length of the artifact (0 when missing).
    pub len: u64,
}

/// Read `path` and scan it. A missing artifact is an empty checkpoint.
pub async fn load_artifact_state(
    scanner: &dyn CheckpointScanner,
    path: &Path,
) -> Result<ArtifactState, Vision2MdError> {
    let contents = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ArtifactState::default()),
        Err(e) => {
            return Err(Vision2MdError::OutputReadFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    // A crash can truncate mid-character; lossy decoding keeps the headers.
    let text = String::from_utf8_lossy(&contents);
    let completed = scanner.scan(&text);
    debug!(
        "Checkpoint {}: {} bytes, {} completed pages",
        path.display(),
        contents.len(),
        completed.len()
    );

    Ok(ArtifactState {
        completed,
        len: contents.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(pages: &[usize]) -> String {
        pages
            .iter()
            .enumerate()
            .map(|(i, &p)| render_section(p, &format!("Content for page {p}"), i == 0))
            .collect()
    }

    #[test]
    fn empty_contents_is_empty_set() {
        assert!(HeaderScanner.scan("").is_empty());
    }

    #[test]
    fn finds_sparse_pages() {
        let set = HeaderScanner.scan(&artifact(&[1, 3, 5]));
        assert_eq!(set, BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn order_and_duplicates_do_not_matter() {
        let text = "## Page 4\n\nx\n\n---\n\n## Page 2\n\ny\n\n---\n\n## Page 4\n\nz";
        assert_eq!(HeaderScanner.scan(text), BTreeSet::from([2, 4]));
    }

    #[test]
    fn scan_is_idempotent() {
        let text = artifact(&[1, 2, 3]);
        assert_eq!(HeaderScanner.scan(&text), HeaderScanner.scan(&text));
    }

    #[test]
    fn header_must_be_a_whole_line_at_line_start() {
        let text = "intro ## Page 1\n### Page 2\n## Page 3 (draft)\n## Page\n## Page 7\n";
        assert_eq!(HeaderScanner.scan(text), BTreeSet::from([7]));
    }

    #[test]
    fn crlf_headers_are_recognised() {
        assert_eq!(HeaderScanner.scan("## Page 9\r\n\r\nbody"), BTreeSet::from([9]));
    }

    #[test]
    fn truncated_final_section_still_counts() {
        let mut text = artifact(&[1]);
        text.push_str(SECTION_SEPARATOR);
        text.push_str("## Page 2\n");
        assert_eq!(HeaderScanner.scan(&text), BTreeSet::from([1, 2]));
    }

    #[test]
    fn render_section_format_is_exact() {
        assert_eq!(render_section(1, "Hello", true), "## Page 1\n\nHello");
        assert_eq!(render_section(12, "World", false), "\n\n---\n\n## Page 12\n\nWorld");
    }

    #[tokio::test]
    async fn missing_artifact_is_empty_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_artifact_state(&HeaderScanner, &dir.path().join("nope.md"))
            .await
            .unwrap();
        assert_eq!(state, ArtifactState::default());
    }

    #[tokio::test]
    async fn existing_artifact_reports_pages_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");
        let text = artifact(&[1, 2]);
        std::fs::write(&path, &text).unwrap();

        let state = load_artifact_state(&HeaderScanner, &path).await.unwrap();
        assert_eq!(state.completed, BTreeSet::from([1, 2]));
        assert_eq!(state.len, text.len() as u64);
    }
}
