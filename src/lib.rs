//! # prompt2pdf
//!
//! Turn a natural-language prompt into a compiled PDF: a language model
//! writes a LaTeX document, this crate repairs it into something a stock
//! TeX distribution will accept, compiles it, stores the PDF and records the
//! attempt.
//!
//! ## Why post-process at all?
//!
//! Even a well-prompted model writes LaTeX that fails to compile a fair
//! share of the time: it wraps the document in chat fences, reaches for
//! `minted` (which needs `-shell-escape`), draws with TikZ, or tags listings
//! with languages the `listings` package has never heard of. The pipeline
//! below fixes those quirks deterministically before the compiler sees them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! prompt
//!  │
//!  ├─ 1. Model     system instruction + prompt → free text
//!  ├─ 2. Extract   fenced block / \documentclass…\end{document}
//!  ├─ 3. Sanitize  essential packages, allow-list, document skeleton
//!  ├─ 4. Listings  fallback \lstdefinelanguage per [language=X]
//!  ├─ 5. Compile   pdflatex or containerized compiler in a scratch dir
//!  └─ 6. Persist   object storage upload, signed URL, generation record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prompt2pdf::pipeline::build_document;
//! use prompt2pdf::pipeline::compile::{LatexCompiler, PdfCompiler};
//! use prompt2pdf::ServiceConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reply = "```latex\n\\documentclass{article}\n\\begin{document}\nHi\n\\end{document}\n```";
//!     let tex = build_document(reply);
//!     let compiler = LatexCompiler::from_config(&ServiceConfig::default());
//!     let pdf = compiler.compile(&tex).await?;
//!     std::fs::write("hello.pdf", pdf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `prompt2pdf` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod error;
pub mod generate;
pub mod pipeline;
pub mod prompts;
pub mod rate_limit;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{IdentityProvider, Session, SupabaseAuth};
pub use config::{CompilerBackend, RateLimitConfig, ServiceConfig, ServiceConfigBuilder};
pub use error::{CompileError, CompileErrorKind, GenerateError, Prompt2PdfError};
pub use generate::{GeneratedPdf, Generator};
pub use rate_limit::{InMemoryRateLimiter, RateLimitDecision, RateLimiter, UpstashRateLimiter};
pub use server::{router, AppState};
pub use store::{
    Database, GenerationRecord, GenerationStatus, GenerationStore, ObjectStore, S3ObjectStore,
    SqliteGenerationStore,
};
