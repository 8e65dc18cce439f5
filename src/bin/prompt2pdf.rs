//! CLI binary for prompt2pdf.
//!
//! A thin shim over the library crate: `serve` maps flags onto
//! `ServiceConfig` and wires the production collaborators into the HTTP
//! router; `compile` runs the document pipeline on a local file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use prompt2pdf::pipeline::compile::{LatexCompiler, PdfCompiler};
use prompt2pdf::pipeline::extract::Confidence;
use prompt2pdf::pipeline::llm::{resolve_provider, ProviderModelClient};
use prompt2pdf::rate_limit::RateLimiter;
use prompt2pdf::{
    pipeline, router, AppState, CompilerBackend, Database, Generator, InMemoryRateLimiter,
    RateLimitConfig, S3ObjectStore, ServiceConfig, ServiceConfigBuilder, SqliteGenerationStore,
    SupabaseAuth, UpstashRateLimiter,
};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  prompt2pdf serve --bucket my-pdfs --supabase-url https://xyz.supabase.co

  # Compile with a local TeX Live instead of the latex-service container
  prompt2pdf serve --bucket my-pdfs --compiler local

  # Repair and compile a model reply saved to a file
  prompt2pdf compile reply.txt -o out.pdf --compiler local

  # Show the repaired document without compiling
  cat reply.txt | prompt2pdf compile - --print-latex --dry-run

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  EDGEQUAKE_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL           Override model ID (default: gpt-4o)
  AWS_BUCKET_NAME           Bucket receiving generated PDFs
  AWS_REGION                Bucket region (AWS credentials come from the usual chain)
  SUPABASE_URL              Supabase project URL
  SUPABASE_ANON_KEY         Supabase anonymous API key
  UPSTASH_REDIS_REST_URL    Upstash Redis REST endpoint for shared rate limits
  UPSTASH_REDIS_REST_TOKEN  Upstash Redis REST token
  RUST_LOG                  Log filter, overrides -v
"#;

/// Turn natural-language prompts into compiled LaTeX PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "prompt2pdf",
    version,
    about = "Turn natural-language prompts into compiled LaTeX PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PROMPT2PDF_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Repair and compile a LaTeX document (or a raw model reply) locally.
    Compile(CompileArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Local,
    Container,
}

#[derive(Args, Debug)]
struct CompilerArgs {
    /// Where LaTeX runs.
    #[arg(long, env = "PROMPT2PDF_COMPILER", value_enum, default_value = "container")]
    compiler: BackendArg,

    /// LaTeX engine for the local backend.
    #[arg(long, env = "PROMPT2PDF_LATEX_PROGRAM", default_value = "pdflatex")]
    latex_program: String,

    /// Container runtime for the container backend.
    #[arg(long, env = "PROMPT2PDF_CONTAINER_RUNTIME", default_value = "docker")]
    container_runtime: String,

    /// Compiler image for the container backend.
    #[arg(long, env = "PROMPT2PDF_CONTAINER_IMAGE", default_value = "latex-service")]
    container_image: String,

    /// Seconds before a compiler run is killed.
    #[arg(long, env = "PROMPT2PDF_COMPILE_TIMEOUT", default_value_t = 120)]
    compile_timeout: u64,

    /// Parent directory for per-request scratch directories.
    #[arg(long, env = "PROMPT2PDF_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,
}

impl CompilerArgs {
    fn apply(&self, builder: ServiceConfigBuilder) -> ServiceConfigBuilder {
        let backend = match self.compiler {
            BackendArg::Local => CompilerBackend::local(&self.latex_program),
            BackendArg::Container => {
                CompilerBackend::container(&self.container_runtime, &self.container_image)
            }
        };
        let builder = builder
            .compiler(backend)
            .compile_timeout_secs(self.compile_timeout);
        match &self.scratch_dir {
            Some(dir) => builder.scratch_root(dir),
            None => builder,
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "PROMPT2PDF_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// SQLite database holding generation records.
    #[arg(long, env = "PROMPT2PDF_DATABASE", default_value = "prompt2pdf.db")]
    database: PathBuf,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PROMPT2PDF_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "PROMPT2PDF_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PROMPT2PDF_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Bucket receiving generated PDFs.
    #[arg(long, env = "AWS_BUCKET_NAME")]
    bucket: String,

    /// Bucket region. Defaults to the AWS environment.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Object key prefix.
    #[arg(long, env = "PROMPT2PDF_KEY_PREFIX", default_value = "pdfs")]
    key_prefix: String,

    /// Lifetime of signed PDF URLs in seconds.
    #[arg(long, env = "PROMPT2PDF_URL_EXPIRY", default_value_t = 3600)]
    url_expiry: u64,

    /// Supabase project URL.
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Supabase anonymous API key.
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_anon_key: String,

    /// Upstash Redis REST endpoint. Without it quotas are per process.
    #[arg(long, env = "UPSTASH_REDIS_REST_URL")]
    upstash_url: Option<String>,

    /// Upstash Redis REST token.
    #[arg(long, env = "UPSTASH_REDIS_REST_TOKEN", hide_env_values = true)]
    upstash_token: Option<String>,

    /// Requests per user per window.
    #[arg(long, env = "PROMPT2PDF_RATE_LIMIT", default_value_t = 10)]
    rate_limit: u64,

    /// Rate-limit window in seconds.
    #[arg(long, env = "PROMPT2PDF_RATE_INTERVAL", default_value_t = 60)]
    rate_interval: u64,

    /// Disable per-user quotas.
    #[arg(long, env = "PROMPT2PDF_NO_RATE_LIMIT")]
    no_rate_limit: bool,

    #[command(flatten)]
    compiler: CompilerArgs,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// LaTeX file or saved model reply; `-` reads stdin.
    input: String,

    /// Where to write the PDF.
    #[arg(short, long, default_value = "output.pdf")]
    output: PathBuf,

    /// Print the repaired document to stdout.
    #[arg(long)]
    print_latex: bool,

    /// Stop after repairing; do not compile.
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    compiler: CompilerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Compile(args) => compile(args).await,
    }
}

// ── serve ────────────────────────────────────────────────────────────────────

async fn serve(args: ServeArgs) -> Result<()> {
    let mut builder = ServiceConfig::builder()
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .bucket(&args.bucket)
        .key_prefix(&args.key_prefix)
        .url_expiry_secs(args.url_expiry)
        .rate_limit((!args.no_rate_limit).then_some(RateLimitConfig {
            interval_secs: args.rate_interval,
            limit: args.rate_limit,
        }));
    if let Some(model) = &args.model {
        builder = builder.model(model);
    }
    if let Some(provider) = &args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(region) = &args.region {
        builder = builder.region(region);
    }
    if let Some(path) = &args.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt file: {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    let config = args.compiler.apply(builder).build()?;
    info!("Starting with {:?}", config);

    let db = Database::open(&args.database)
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;
    let records = Arc::new(SqliteGenerationStore::new(db));
    let objects = Arc::new(
        S3ObjectStore::from_env(&args.bucket, config.region.clone())
            .await
            .context("Failed to configure object storage")?,
    );
    let provider = resolve_provider(&config)?;
    let model = Arc::new(ProviderModelClient::new(provider, &config));
    info!("Storing PDFs in bucket {}", objects.bucket());
    let compiler = Arc::new(LatexCompiler::from_config(&config));
    info!("Compiler backend: {:?}", compiler.backend());

    let generator = Generator::new(model, compiler, objects, records.clone(), &config);

    let rate_limiter = match (config.rate_limit, &args.upstash_url, &args.upstash_token) {
        (None, _, _) => None,
        (Some(limit), Some(url), Some(token)) => {
            info!("Rate limit {}/{}s via Upstash", limit.limit, limit.interval_secs);
            Some(Arc::new(UpstashRateLimiter::new(url, token, limit)) as Arc<dyn RateLimiter>)
        }
        (Some(limit), _, _) => {
            info!("Rate limit {}/{}s in process", limit.limit, limit.interval_secs);
            Some(Arc::new(InMemoryRateLimiter::new(limit)) as Arc<dyn RateLimiter>)
        }
    };

    let state = AppState {
        generator: Arc::new(generator),
        identity: Arc::new(SupabaseAuth::new(&args.supabase_url, &args.supabase_anon_key)),
        rate_limiter,
        records,
        history_page_size: config.history_page_size,
    };

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Listening on {}", args.listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

// ── compile ──────────────────────────────────────────────────────────────────

async fn compile(args: CompileArgs) -> Result<()> {
    let raw = if args.input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("Failed to read {}", args.input))?
    };

    let pipeline::PreparedDocument { latex, confidence } = pipeline::prepare_document(&raw);
    if confidence == Confidence::Passthrough {
        eprintln!("{}", dim("No LaTeX markers found; compiling the input as-is"));
    }
    if args.print_latex {
        println!("{latex}");
    }
    if args.dry_run {
        return Ok(());
    }

    let config = args.compiler.apply(ServiceConfig::builder()).build()?;
    let compiler = LatexCompiler::from_config(&config);

    match compiler.compile(&latex).await {
        Ok(pdf) => {
            // Write atomically: tmp file then rename.
            let tmp = args.output.with_extension("pdf.tmp");
            std::fs::write(&tmp, &pdf)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            std::fs::rename(&tmp, &args.output)
                .with_context(|| format!("Failed to rename to {}", args.output.display()))?;
            eprintln!(
                "{} {} {}",
                green("✓"),
                args.output.display(),
                dim(&format!("({} bytes)", pdf.len()))
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", red("✗"), e.message);
            if let Some(detail) = &e.detail {
                eprintln!("  {}", dim(detail));
            }
            eprintln!("{}", e.log_text());
            anyhow::bail!("compilation failed ({:?})", e.kind)
        }
    }
}
