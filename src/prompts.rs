//! Prompts sent with each page image.
//!
//! Callers can override the instruction via
//! [`crate::config::BatchConfig::prompt`] and add a system message via
//! [`crate::config::BatchConfig::system_prompt`]; the constant here is used
//! only when no override is provided.

/// Default instruction sent alongside every page image.
///
/// Kept short on purpose: small local vision models follow a single
/// paragraph more reliably than a long rule list.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract the content of this image as a markdown document. \
Do not wrap in a markdown code block. \
Ensure the order of content is preserved in the final output. \
Tables should be returned as a markdown table.";
