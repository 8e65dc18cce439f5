//! Pipeline stages for prompt-to-PDF generation.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! llm ──▶ extract ──▶ sanitize ──▶ listings ──▶ compile
//! (text)  (candidate)  (sanitized)   (final)      (PDF bytes)
//! ```
//!
//! 1. [`llm`]: the only stage with network I/O; returns free text
//! 2. [`extract`]: isolate the LaTeX document from the model's reply
//! 3. [`sanitize`]: document class, essential packages, allow-list,
//!    document body
//! 4. [`listings`]: fallback definitions for unknown listing languages
//! 5. [`compile`]: scratch directory, external compiler, guaranteed cleanup
//!
//! Stages 2–4 are pure `&str → String` functions; [`build_document`] runs
//! them in order.

pub mod compile;
pub mod extract;
pub mod listings;
pub mod llm;
pub mod sanitize;

use extract::Confidence;

/// The final document and how it was located in the model's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub latex: String,
    pub confidence: Confidence,
}

/// Turn a raw model reply into the final document handed to the compiler.
///
/// Runs extract → sanitize → listings. Never fails; whether the result
/// compiles is for [`compile`] to find out.
pub fn prepare_document(raw: &str) -> PreparedDocument {
    let extraction = extract::extract_latex(raw);
    let sanitized = sanitize::sanitize_latex(&extraction.document);
    PreparedDocument {
        latex: listings::define_listing_languages(&sanitized),
        confidence: extraction.confidence,
    }
}

/// [`prepare_document`] without the confidence.
pub fn build_document(raw: &str) -> String {
    prepare_document(raw).latex
}
