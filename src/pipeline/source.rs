//! Page images and the sources that produce them.
//!
//! The conversion drivers never rasterise anything themselves. They ask a
//! [`PageSource`] for page `N` when (and only when) page `N` needs to be sent
//! to the model, so a resumed run over a 500-page PDF does not re-render the
//! 400 pages that are already in the artifact.

use crate::error::Vision2MdError;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One rendered page: 1-based index plus encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: usize,
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl PageImage {
    pub fn new(page: usize, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            page,
            data,
            mime_type: mime_type.into(),
        }
    }

    pub fn png(page: usize, data: Vec<u8>) -> Self {
        Self::new(page, data, "image/png")
    }
}

/// Something that can hand out page images by 1-based page number.
pub trait PageSource: Send + Sync {
    /// Total number of pages in the document.
    fn page_count(&self) -> usize;

    /// Produce the image for `page` (1-based).
    fn load_page(&self, page: usize) -> BoxFuture<'_, Result<PageImage, Vision2MdError>>;

    /// Human-readable name used in logs and error messages.
    fn describe(&self) -> String;
}

/// Pre-rendered pages held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pages: Vec<PageImage>,
    name: String,
}

impl InMemorySource {
    /// Build a source from images already numbered `1..=N` in order.
    pub fn new(pages: Vec<PageImage>) -> Self {
        Self {
            pages,
            name: "<memory>".to_string(),
        }
    }

    /// Number raw PNG buffers `1..=N` in the order given.
    pub fn from_png_bytes(buffers: Vec<Vec<u8>>) -> Self {
        Self::new(
            buffers
                .into_iter()
                .enumerate()
                .map(|(i, data)| PageImage::png(i + 1, data))
                .collect(),
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl PageSource for InMemorySource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn load_page(&self, page: usize) -> BoxFuture<'_, Result<PageImage, Vision2MdError>> {
        let total = self.pages.len();
        let found = page
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
            .cloned()
            .ok_or(Vision2MdError::PageOutOfRange { page, total });
        Box::pin(async move { found })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A directory of page images, one file per page.
///
/// Files are ordered by natural filename order so `page2.png` comes before
/// `page10.png`. Anything that is not a recognised image is ignored.
#[derive(Debug, Clone)]
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Vision2MdError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => Vision2MdError::PermissionDenied {
                path: dir.clone(),
            },
            _ => Vision2MdError::FileNotFound { path: dir.clone() },
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && image_mime_type(p).is_some())
            .collect();
        files.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));

        debug!("Found {} page images in {}", files.len(), dir.display());
        Ok(Self { dir, files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl PageSource for ImageDirSource {
    fn page_count(&self) -> usize {
        self.files.len()
    }

    fn load_page(&self, page: usize) -> BoxFuture<'_, Result<PageImage, Vision2MdError>> {
        Box::pin(async move {
            let total = self.files.len();
            let path = page
                .checked_sub(1)
                .and_then(|idx| self.files.get(idx))
                .ok_or(Vision2MdError::PageOutOfRange { page, total })?;
            read_image_file(path, page).await
        })
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Read a single image file as page `page`.
pub async fn read_image_file(path: &Path, page: usize) -> Result<PageImage, Vision2MdError> {
    let mime = image_mime_type(path).ok_or_else(|| Vision2MdError::UnsupportedImage {
        path: path.to_path_buf(),
    })?;
    let data = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Vision2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Vision2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    Ok(PageImage::new(page, data, mime))
}

/// MIME type for a page image, judged by extension.
pub fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Num(u64),
    Text(String),
}

/// Split a filename into digit and non-digit runs for natural ordering.
fn natural_key(path: &Path) -> Vec<Chunk> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut in_digits = false;

    for ch in name.chars() {
        let is_digit = ch.is_ascii_digit();
        if !buf.is_empty() && is_digit != in_digits {
            chunks.push(flush_chunk(&buf, in_digits));
            buf.clear();
        }
        in_digits = is_digit;
        buf.push(ch);
    }
    if !buf.is_empty() {
        chunks.push(flush_chunk(&buf, in_digits));
    }
    chunks
}

fn flush_chunk(buf: &str, digits: bool) -> Chunk {
    if digits {
        // Absurdly long digit runs fall back to text ordering.
        buf.parse().map(Chunk::Num).unwrap_or_else(|_| Chunk::Text(buf.to_string()))
    } else {
        Chunk::Text(buf.to_string())
    }
}
