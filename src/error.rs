//! Error types for the prompt2pdf library.
//!
//! Three error types reflect three distinct audiences:
//!
//! * [`Prompt2PdfError`]: **Fatal**: the service cannot start or a
//!   collaborator cannot be built (bad configuration, no LLM provider).
//!   Surfaced to the operator, never to a user.
//!
//! * [`CompileError`]: **Diagnostic**: the LaTeX toolchain rejected the
//!   document. Carries the compiler log verbatim so the caller can show the
//!   user exactly which line broke.
//!
//! * [`GenerateError`]: **Per-request**: one prompt failed somewhere in
//!   the orchestrator. Compilation failures keep their diagnostics; every
//!   other kind collapses to a generic message at the HTTP boundary.

use crate::store::{DatabaseError, StorageError};
use serde::Serialize;
use thiserror::Error;

/// Text returned in place of a compiler log when none could be recovered.
pub const NO_LOG_PLACEHOLDER: &str = "no compilation log available";

/// All fatal errors returned while configuring or starting the service.
#[derive(Debug, Error)]
pub enum Prompt2PdfError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },
}

/// Which stage of the compiler invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileErrorKind {
    /// The document could not be written to (or read back from) the
    /// scratch directory.
    WriteFailed,
    /// The compiler could not be spawned, exited non-zero, or timed out.
    InvocationFailed,
    /// The compiler exited zero but left no PDF behind.
    MissingOutput,
}

/// A structured compiler failure.
///
/// `log` is `None` when the compiler never wrote a log file; use
/// [`CompileError::log_text`] to get the placeholder in that case.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub detail: Option<String>,
    pub log: Option<String>,
}

impl CompileError {
    pub fn write_failed(detail: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::WriteFailed,
            message: "Failed to write LaTeX document".to_string(),
            detail: Some(detail.into()),
            log: None,
        }
    }

    pub fn invocation_failed(detail: impl Into<String>, log: Option<String>) -> Self {
        Self {
            kind: CompileErrorKind::InvocationFailed,
            message: "LaTeX compilation failed".to_string(),
            detail: Some(detail.into()),
            log,
        }
    }

    pub fn missing_output(log: Option<String>) -> Self {
        Self {
            kind: CompileErrorKind::MissingOutput,
            message: "LaTeX compiler produced no PDF".to_string(),
            detail: Some("the compiler exited successfully but output.pdf is missing".to_string()),
            log,
        }
    }

    /// The recovered compiler log, or [`NO_LOG_PLACEHOLDER`].
    pub fn log_text(&self) -> &str {
        self.log.as_deref().unwrap_or(NO_LOG_PLACEHOLDER)
    }
}

/// Why a single generation request failed.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The model call errored or returned nothing usable.
    #[error("LaTeX generation failed: {detail}")]
    ModelFailed { detail: String },

    /// The document did not compile. Nothing was uploaded or recorded.
    #[error("{error}")]
    Compilation {
        error: CompileError,
        generated_tex: String,
    },

    /// Upload or URL signing failed after a successful compile.
    #[error("Failed to store PDF: {0}")]
    Storage(#[from] StorageError),

    /// The success record could not be written.
    #[error("Failed to record generation: {0}")]
    Database(#[from] DatabaseError),
}

impl GenerateError {
    /// Whether this failure carries compiler diagnostics worth showing the user.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }
}
