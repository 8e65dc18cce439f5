//! Generation orchestrator: one prompt in, one stored PDF out.
//!
//! ```text
//! prompt ─▶ model ─▶ build_document ─▶ compile ─▶ upload ─▶ presign ─▶ record
//!             │                           │          │         │          │
//!             └── ModelFailed             │          └─────────┴──────────┴── error record
//!                 + error record          └── Compilation (nothing stored)
//! ```
//!
//! Authentication and quotas are enforced by the HTTP layer before
//! [`Generator::generate`] is called; the orchestrator only ever sees an
//! authenticated [`Session`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::Session;
use crate::config::ServiceConfig;
use crate::error::GenerateError;
use crate::pipeline::{self, compile::PdfCompiler, extract::Confidence, llm::ModelClient};
use crate::prompts::{prepare_user_message, SYSTEM_PROMPT};
use crate::store::{GenerationRecord, GenerationStore, ObjectStore};

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A successfully stored PDF.
#[derive(Debug, Clone)]
pub struct GeneratedPdf {
    /// Time-limited retrieval URL.
    pub pdf_url: String,
    pub object_key: String,
    /// The final document that was compiled.
    pub latex: String,
    /// How the document was found in the model's reply.
    pub confidence: Confidence,
    pub record: GenerationRecord,
}

/// Sequences the pipeline around its collaborators.
#[derive(Clone)]
pub struct Generator {
    model: Arc<dyn ModelClient>,
    compiler: Arc<dyn PdfCompiler>,
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn GenerationStore>,
    system_prompt: String,
    key_prefix: String,
    url_expiry: Duration,
}

impl Generator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        compiler: Arc<dyn PdfCompiler>,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn GenerationStore>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            model,
            compiler,
            objects,
            records,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            key_prefix: config.key_prefix.clone(),
            url_expiry: config.url_expiry(),
        }
    }

    /// Generate, compile, store and record a PDF for `message`.
    ///
    /// Compilation failures are returned with their diagnostics and leave no
    /// trace in storage. Every other failure first writes a best-effort
    /// `error` record for the session's user.
    pub async fn generate(&self, session: &Session, message: &str) -> Result<GeneratedPdf, GenerateError> {
        let start = Instant::now();
        match self.run(session, message).await {
            Ok(pdf) => {
                info!(
                    "Generated {} for user {} in {:?}",
                    pdf.object_key,
                    session.user_id,
                    start.elapsed()
                );
                Ok(pdf)
            }
            Err(e) if e.is_diagnostic() => {
                warn!("Compilation failed for user {}: {e}", session.user_id);
                Err(e)
            }
            Err(e) => {
                error!("Generation failed for user {}: {e}", session.user_id);
                self.record_failure(session, message).await;
                Err(e)
            }
        }
    }

    async fn run(&self, session: &Session, message: &str) -> Result<GeneratedPdf, GenerateError> {
        let user_message = prepare_user_message(message);
        let raw = self
            .model
            .complete(&self.system_prompt, &user_message)
            .await
            .map_err(|e| GenerateError::ModelFailed { detail: e.message })?;
        if raw.trim().is_empty() {
            return Err(GenerateError::ModelFailed {
                detail: "the model returned an empty LaTeX document".to_string(),
            });
        }

        let pipeline::PreparedDocument { latex, confidence } = pipeline::prepare_document(&raw);
        if confidence == Confidence::Passthrough {
            warn!(
                "No LaTeX markers in model reply for user {}; compiling the reply as-is",
                session.user_id
            );
        }

        let pdf = match self.compiler.compile(&latex).await {
            Ok(pdf) => pdf,
            Err(error) => {
                return Err(GenerateError::Compilation {
                    error,
                    generated_tex: latex,
                })
            }
        };

        let object_key = self.object_key();
        self.objects.put(&object_key, pdf, PDF_CONTENT_TYPE).await?;
        let pdf_url = self.objects.presign_get(&object_key, self.url_expiry).await?;

        let record = GenerationRecord::success(&session.user_id, message, &pdf_url);
        self.records.insert(&record).await?;

        Ok(GeneratedPdf {
            pdf_url,
            object_key,
            latex,
            confidence,
            record,
        })
    }

    /// `<prefix>/<unix-millis>-<random>.pdf`; the suffix keeps keys unique
    /// within one millisecond.
    fn object_key(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}-{}.pdf",
            self.key_prefix,
            Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }

    async fn record_failure(&self, session: &Session, message: &str) {
        let record = GenerationRecord::error(&session.user_id, message);
        if let Err(e) = self.records.insert(&record).await {
            error!(
                "Could not record failed generation for user {}: {e}",
                session.user_id
            );
        }
    }
}
