//! Shared utility functions for article-forge.
//!
//! JSON extraction from LLM responses and text helpers used by the agents.

pub mod json_extraction;
pub mod text;

pub use json_extraction::{extract_json_object, JsonExtractionError};
pub use text::{count_words, slugify, strip_markdown, truncate_at_word};
