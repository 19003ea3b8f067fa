//! Instruction prompts for VLM-based page-to-Markdown conversion.
//!
//! The prompt is configuration, not ambient state: it is copied into the
//! [`crate::pipeline::llm::InferenceClient`] when the client is built, and
//! callers override it via [`crate::config::ConversionConfig::system_prompt`].

/// Default instruction sent with every page image (or, in batch mode, with
/// the whole ordered set of page images).
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert document transcriber. Convert the supplied page image(s) to clean, structured Markdown.

Rules:
- Extract ALL readable text and text chunks. Look at the entire image; do not skip margins, captions, footnotes, or table cells.
- Keep the reading order a human would use.
- Use # / ## / ### for headings, - or 1. for lists, GFM pipe tables for tables, and triple backticks for code.
- When several images are supplied they are consecutive pages of one document, in order.
- Output ONLY the Markdown. Do not wrap it in ```markdown fences and do not add commentary or "Page X" markers."#;
