//! Pipeline stages for page-by-page document conversion.
//!
//! Each submodule implements one step. The drivers in [`crate::convert`]
//! only see the [`source::PageSource`] and [`llm::InferenceClient`] seams, so
//! a new rendering backend or inference provider never changes the driver.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ render ──▶ encode ──▶ llm ──▶ convert (artifact)
//! (pages)   (pdfium)   (PNG)     (VLM)   (## Page N sections)
//! ```
//!
//! 1. [`source`]: the `PageImage` type and the `PageSource` trait, with
//!    in-memory and image-directory sources
//! 2. [`render`]: lazy pdfium rasterisation; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: PNG-encode rendered pages; base64 data URLs for the
//!    request body
//! 4. [`llm`]: the inference client: pacing floor, exponential backoff,
//!    retry classification; the only stage with network I/O

pub mod encode;
pub mod llm;
pub mod render;
pub mod source;
