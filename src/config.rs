//! Configuration types for the prompt-to-PDF service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. The HTTP server, the orchestrator and the
//! compiler all read from the same struct, so one `Debug` print at startup
//! tells an operator everything the process will do.
//!
//! # Design choice: builder over constructor
//! Most deployments touch two or three knobs (bucket, compiler backend,
//! model). The builder lets callers set only those and rely on documented
//! defaults for the rest.

use crate::error::Prompt2PdfError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default chat model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// S3 refuses presigned URLs valid for longer than seven days.
const MAX_URL_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration for the prompt-to-PDF service.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use prompt2pdf::{CompilerBackend, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .model("gpt-4o")
///     .compiler(CompilerBackend::local("pdflatex"))
///     .compile_timeout_secs(60)
///     .bucket("my-pdfs")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// LLM model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the completion. Default: 0.3.
    ///
    /// Low enough that the model sticks to the document skeleton it was
    /// asked for, high enough that prose does not read like a form letter.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    ///
    /// A truncated reply loses its `\end{document}`; the sanitizer appends
    /// one, but open environments will still break the compile.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses [`crate::prompts::SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// How LaTeX is compiled. Default: the `latex-service` container via docker.
    pub compiler: CompilerBackend,

    /// Upper bound on one compiler run in seconds. Default: 120.
    ///
    /// A runaway `\loop` or a wedged container would otherwise hold the
    /// request open forever. The child process is killed on expiry.
    pub compile_timeout_secs: u64,

    /// Parent directory for per-request scratch directories.
    /// If None, uses the system temp directory.
    pub scratch_root: Option<PathBuf>,

    /// Object-storage bucket receiving the PDFs.
    pub bucket: Option<String>,

    /// Object-storage region override. If None, the SDK resolves it from the environment.
    pub region: Option<String>,

    /// Key prefix for stored PDFs. Default: "pdfs".
    pub key_prefix: String,

    /// Lifetime of the signed retrieval URL in seconds. Default: 3600.
    pub url_expiry_secs: u64,

    /// Per-user request quota. Default: 10 requests per 60 s. None disables it.
    pub rate_limit: Option<RateLimitConfig>,

    /// Records per page in the history listing. Default: 10.
    pub history_page_size: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 4096,
            system_prompt: None,
            compiler: CompilerBackend::default(),
            compile_timeout_secs: 120,
            scratch_root: None,
            bucket: None,
            region: None,
            key_prefix: "pdfs".to_string(),
            url_expiry_secs: 3600,
            rate_limit: Some(RateLimitConfig::default()),
            history_page_size: 10,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("compiler", &self.compiler)
            .field("compile_timeout_secs", &self.compile_timeout_secs)
            .field("scratch_root", &self.scratch_root)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("key_prefix", &self.key_prefix)
            .field("url_expiry_secs", &self.url_expiry_secs)
            .field("rate_limit", &self.rate_limit)
            .field("history_page_size", &self.history_page_size)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_secs)
    }

    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn compiler(mut self, backend: CompilerBackend) -> Self {
        self.config.compiler = backend;
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compile_timeout_secs = secs;
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket = Some(bucket.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn url_expiry_secs(mut self, secs: u64) -> Self {
        self.config.url_expiry_secs = secs;
        self
    }

    pub fn rate_limit(mut self, limit: Option<RateLimitConfig>) -> Self {
        self.config.rate_limit = limit;
        self
    }

    pub fn history_page_size(mut self, n: u64) -> Self {
        self.config.history_page_size = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Prompt2PdfError> {
        let c = &self.config;
        if c.compile_timeout_secs == 0 {
            return Err(Prompt2PdfError::InvalidConfig(
                "Compile timeout must be ≥ 1 second".into(),
            ));
        }
        if c.url_expiry_secs == 0 || c.url_expiry_secs > MAX_URL_EXPIRY_SECS {
            return Err(Prompt2PdfError::InvalidConfig(format!(
                "URL expiry must be 1–{MAX_URL_EXPIRY_SECS} seconds, got {}",
                c.url_expiry_secs
            )));
        }
        let prefix = c.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(Prompt2PdfError::InvalidConfig(
                "Key prefix must not be empty".into(),
            ));
        }
        if c.history_page_size == 0 {
            return Err(Prompt2PdfError::InvalidConfig(
                "History page size must be ≥ 1".into(),
            ));
        }
        if let Some(limit) = &c.rate_limit {
            if limit.interval_secs == 0 || limit.limit == 0 {
                return Err(Prompt2PdfError::InvalidConfig(format!(
                    "Rate limit needs a non-zero interval and limit, got {}/{}s",
                    limit.limit, limit.interval_secs
                )));
            }
        }
        let mut config = self.config;
        config.key_prefix = config.key_prefix.trim_matches('/').to_string();
        Ok(config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where the LaTeX compiler runs.
///
/// | Backend | Log file | Use case |
/// |---------|----------|----------|
/// | `Local` | `output.log` | Developer machines with TeX Live installed |
/// | `Container` | `compile.log` | Servers; the image owns the TeX distribution (default) |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilerBackend {
    /// Run a LaTeX engine binary directly (e.g. `pdflatex`).
    Local { program: String },
    /// Run a one-shot container that reads `/latex/content` and writes `/latex/output`.
    Container { runtime: String, image: String },
}

impl Default for CompilerBackend {
    fn default() -> Self {
        Self::container("docker", "latex-service")
    }
}

impl CompilerBackend {
    pub fn local(program: impl Into<String>) -> Self {
        Self::Local {
            program: program.into(),
        }
    }

    pub fn container(runtime: impl Into<String>, image: impl Into<String>) -> Self {
        Self::Container {
            runtime: runtime.into(),
            image: image.into(),
        }
    }

    /// Name of the log file the backend leaves in the output directory.
    pub fn log_file_name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "output.log",
            Self::Container { .. } => "compile.log",
        }
    }
}

/// Fixed-window request quota per caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    pub interval_secs: u64,
    /// Requests admitted per window.
    pub limit: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            limit: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServiceConfig::default();
        assert_eq!(c.temperature, 0.3);
        assert_eq!(c.compile_timeout_secs, 120);
        assert_eq!(c.url_expiry_secs, 3600);
        assert_eq!(c.key_prefix, "pdfs");
        assert_eq!(c.history_page_size, 10);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
        assert_eq!(c.compiler, CompilerBackend::container("docker", "latex-service"));
    }

    #[test]
    fn builder_trims_key_prefix() {
        let c = ServiceConfig::builder().key_prefix("/pdfs/").build().unwrap();
        assert_eq!(c.key_prefix, "pdfs");
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ServiceConfig::builder()
            .compile_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"), "got: {err}");
    }

    #[test]
    fn builder_rejects_week_long_urls() {
        assert!(ServiceConfig::builder()
            .url_expiry_secs(MAX_URL_EXPIRY_SECS + 1)
            .build()
            .is_err());
        assert!(ServiceConfig::builder()
            .url_expiry_secs(MAX_URL_EXPIRY_SECS)
            .build()
            .is_ok());
    }

    #[test]
    fn builder_rejects_empty_rate_limit() {
        let zero = RateLimitConfig {
            interval_secs: 60,
            limit: 0,
        };
        assert!(ServiceConfig::builder().rate_limit(Some(zero)).build().is_err());
        assert!(ServiceConfig::builder().rate_limit(None).build().is_ok());
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ServiceConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn backend_log_file_names() {
        assert_eq!(CompilerBackend::local("pdflatex").log_file_name(), "output.log");
        assert_eq!(CompilerBackend::default().log_file_name(), "compile.log");
    }
}
