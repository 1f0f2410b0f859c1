//! Pipeline stages for batch extraction.
//!
//! Each submodule implements one step; [`crate::extract`] strings them
//! together for a single document.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source/render ──▶ encode ──▶ inference ──▶ postprocess
//!                                  (retry)      │
//!                                               ▼
//!                        state ──▶ checkpoint ──▶ assemble
//! ```
//!
//! 1. [`input`]      : resolve a local PDF, URL, or image directory
//! 2. [`source`]     : turn a document into ordered [`crate::document::PageTask`]s;
//!    [`render`] does the pdfium work in `spawn_blocking`
//! 3. [`encode`]     : load one page image into memory for exactly one
//!    attempt cycle
//! 4. [`inference`]  : the vision-model call, classified into transient and
//!    permanent failures; [`retry`] drives the attempts
//! 5. [`postprocess`]: structural cleanup of the model's markdown
//! 6. [`state`]      : ordered results and the pipeline state machine
//! 7. [`checkpoint`] : durable snapshots every K pages
//! 8. [`assemble`]   : the final report and its file

pub mod assemble;
pub mod checkpoint;
pub mod encode;
pub mod inference;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod retry;
pub mod source;
pub mod state;
