//! End-to-end tests for the prompt2pdf HTTP service.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`. The
//! model, compiler, object store and identity provider are in-process
//! doubles; generation records go to a real in-memory SQLite database.
//!
//! The toolchain test at the bottom compiles with a real `pdflatex` and is
//! gated behind the `LATEX_E2E` environment variable.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use prompt2pdf::auth::AuthError;
use prompt2pdf::pipeline::compile::{LatexCompiler, PdfCompiler};
use prompt2pdf::pipeline::llm::{ModelClient, ModelError};
use prompt2pdf::store::StorageError;
use prompt2pdf::{
    router, AppState, CompileError, CompilerBackend, Database, GenerationRecord, GenerationStatus, GenerationStore,
    Generator, IdentityProvider, InMemoryRateLimiter, ObjectStore, RateLimitConfig, RateLimiter, ServiceConfig,
    Session, SqliteGenerationStore,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

// ── Test doubles ─────────────────────────────────────────────────────────────

const ARTICLE: &str = "Here is your document:\n```latex\n\\documentclass{article}\n\\begin{document}\nHello\n\\end{document}\n```";

struct StubModel {
    reply: String,
    calls: AtomicUsize,
    last_user_message: Mutex<Option<String>>,
}

impl StubModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            last_user_message: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for StubModel {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_user_message.lock().unwrap() = Some(user.to_string());
        Ok(self.reply.clone())
    }
}

enum CompilerMode {
    Pdf,
    Fail,
}

struct StubCompiler(CompilerMode);

#[async_trait]
impl PdfCompiler for StubCompiler {
    async fn compile(&self, _document: &str) -> Result<Vec<u8>, CompileError> {
        match self.0 {
            CompilerMode::Pdf => Ok(b"%PDF-1.4 stub".to_vec()),
            CompilerMode::Fail => Err(CompileError::invocation_failed(
                "exit status: 1",
                Some("! Undefined control sequence.".to_string()),
            )),
        }
    }
}

#[derive(Default)]
struct StubObjects {
    fail_upload: bool,
    puts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ObjectStore for StubObjects {
    async fn put(&self, key: &str, _bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        if self.fail_upload {
            return Err(StorageError::Upload {
                key: key.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string()));
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://bucket.test/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        ))
    }
}

struct StubIdentity;

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn current_session(&self, token: &str) -> Result<Option<Session>, AuthError> {
        Ok(match token {
            "valid-token" => Some(Session {
                user_id: "user-1".to_string(),
                email: Some("user@example.com".to_string()),
                access_token: token.to_string(),
            }),
            "other-token" => Some(Session {
                user_id: "user-2".to_string(),
                email: None,
                access_token: token.to_string(),
            }),
            _ => None,
        })
    }

    async fn exchange_code(&self, code: &str, _verifier: Option<&str>) -> Result<Session, AuthError> {
        if code == "good-code" {
            Ok(Session {
                user_id: "user-1".to_string(),
                email: None,
                access_token: "fresh-token".to_string(),
            })
        } else {
            Err(AuthError::Rejected {
                status: 400,
                body: "invalid grant".to_string(),
            })
        }
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct TestApp {
    app: Router,
    model: Arc<StubModel>,
    objects: Arc<StubObjects>,
    records: Arc<SqliteGenerationStore>,
}

struct Options {
    reply: &'static str,
    compiler: CompilerMode,
    fail_upload: bool,
    rate_limit: Option<RateLimitConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reply: ARTICLE,
            compiler: CompilerMode::Pdf,
            fail_upload: false,
            rate_limit: None,
        }
    }
}

fn test_app(options: Options) -> TestApp {
    let config = ServiceConfig::default();
    let model = StubModel::new(options.reply);
    let objects = Arc::new(StubObjects {
        fail_upload: options.fail_upload,
        ..Default::default()
    });
    let records = Arc::new(SqliteGenerationStore::new(Database::open_in_memory().unwrap()));
    let generator = Generator::new(
        model.clone(),
        Arc::new(StubCompiler(options.compiler)),
        objects.clone(),
        records.clone(),
        &config,
    );
    let state = AppState {
        generator: Arc::new(generator),
        identity: Arc::new(StubIdentity),
        rate_limiter: options
            .rate_limit
            .map(|c| Arc::new(InMemoryRateLimiter::new(c)) as Arc<dyn RateLimiter>),
        records: records.clone(),
        history_page_size: config.history_page_size,
    };
    TestApp {
        app: router(state),
        model,
        objects,
        records,
    }
}

fn chat_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("sb-access-token={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

async fn records_for(app: &TestApp, user: &str) -> Vec<GenerationRecord> {
    app.records.list_for_user(user, 1, 100).await.unwrap()
}

// ── Scenario A: success ──────────────────────────────────────────────────────

#[tokio::test]
async fn successful_generation_returns_url_and_records_success() {
    let t = test_app(Options::default());
    let (status, _, body) = send(
        &t.app,
        chat_request(Some("valid-token"), r#"{"message":"Write **hello** in a document"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    let url = body["pdfUrl"].as_str().unwrap();
    assert!(url.contains("pdfs/") && url.contains("X-Amz-Expires=3600"));

    assert_eq!(t.model.calls(), 1);
    assert_eq!(
        t.model.last_user_message.lock().unwrap().as_deref(),
        Some("Write \\textbf{hello} in a document")
    );

    let puts = t.objects.puts.lock().unwrap().clone();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].1, "application/pdf");

    let records = records_for(&t, "user-1").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, GenerationStatus::Success);
    assert_eq!(records[0].pdf_url, url);
    assert_eq!(records[0].prompt, "Write **hello** in a document");
}

// ── Scenario B: empty model reply ────────────────────────────────────────────

#[tokio::test]
async fn empty_model_reply_fails_without_upload() {
    let t = test_app(Options {
        reply: "",
        ..Default::default()
    });
    let (status, _, body) = send(&t.app, chat_request(Some("valid-token"), r#"{"message":"hi"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to generate PDF");
    assert!(t.objects.puts.lock().unwrap().is_empty());

    let records = records_for(&t, "user-1").await;
    assert!(records.iter().all(|r| r.status != GenerationStatus::Success));
}

// ── Scenario C: upload failure ───────────────────────────────────────────────

#[tokio::test]
async fn upload_failure_returns_generic_error_and_records_error() {
    let t = test_app(Options {
        fail_upload: true,
        ..Default::default()
    });
    let (status, _, body) = send(&t.app, chat_request(Some("valid-token"), r#"{"message":"hi"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to generate PDF");
    assert!(body.get("details").is_none(), "storage internals must not leak: {body}");

    let records = records_for(&t, "user-1").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, GenerationStatus::Error);
    assert_eq!(records[0].user_id, "user-1");
    assert_eq!(records[0].pdf_url, "");
}

// ── Scenario D: unauthenticated ──────────────────────────────────────────────

#[tokio::test]
async fn unauthenticated_request_is_rejected_before_model_call() {
    let t = test_app(Options::default());

    let (status, _, _) = send(&t.app, chat_request(None, r#"{"message":"hi"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&t.app, chat_request(Some("expired"), r#"{"message":"hi"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(t.model.calls(), 0);
}

// ── Compile failure diagnostics ──────────────────────────────────────────────

#[tokio::test]
async fn compile_failure_returns_diagnostics_and_stores_nothing() {
    let t = test_app(Options {
        compiler: CompilerMode::Fail,
        ..Default::default()
    });
    let (status, _, body) = send(&t.app, chat_request(Some("valid-token"), r#"{"message":"hi"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "LaTeX compilation failed");
    assert_eq!(body["details"], "exit status: 1");
    assert_eq!(body["latexLog"], "! Undefined control sequence.");
    let tex = body["generatedTex"].as_str().unwrap();
    assert!(tex.starts_with("\\documentclass{article}"));
    assert!(!tex.contains("```"));

    assert!(t.objects.puts.lock().unwrap().is_empty());
    assert!(records_for(&t, "user-1").await.is_empty());
}

// ── Malformed requests ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_or_blank_message_is_bad_request() {
    let t = test_app(Options::default());
    for body in [r#"{}"#, r#"{"message":"   "}"#, "not json", r#"{"message":null}"#] {
        let (status, _, json) = send(&t.app, chat_request(Some("valid-token"), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(json["error"], "Message is required");
    }
    assert_eq!(t.model.calls(), 0);
}

// ── Rate limiting ────────────────────────────────────────────────────────────

#[tokio::test]
async fn quota_exceeded_returns_429_with_headers() {
    let t = test_app(Options {
        rate_limit: Some(RateLimitConfig {
            interval_secs: 3600,
            limit: 1,
        }),
        ..Default::default()
    });

    let (first, _, _) = send(&t.app, chat_request(Some("valid-token"), r#"{"message":"a"}"#)).await;
    assert_eq!(first, StatusCode::OK);

    let (status, headers, body) = send(&t.app, chat_request(Some("valid-token"), r#"{"message":"b"}"#)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers["x-ratelimit-limit"], "1");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert!(headers.contains_key("x-ratelimit-reset"));
    assert_eq!(body["error"], "Too many requests");
    assert!(body["reset"].as_str().unwrap().ends_with('Z'));

    // Quotas are per identity.
    let (other, _, _) = send(&t.app, chat_request(Some("other-token"), r#"{"message":"c"}"#)).await;
    assert_eq!(other, StatusCode::OK);

    assert_eq!(t.model.calls(), 2);
}

// ── History ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_lists_own_records_newest_first() {
    let t = test_app(Options::default());
    for i in 0..12 {
        let body = format!(r#"{{"message":"prompt {i}"}}"#);
        let (status, _, _) = send(&t.app, chat_request(Some("valid-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
    }
    send(&t.app, chat_request(Some("other-token"), r#"{"message":"not yours"}"#)).await;

    let (status, _, page1) = send(&t.app, get("/api/generations", Some("valid-token"))).await;
    assert_eq!(status, StatusCode::OK);
    let items = page1["generations"].as_array().unwrap();
    assert_eq!(items.len(), 10);
    assert_eq!(page1["pageSize"], 10);
    assert_eq!(items[0]["prompt"], "prompt 11");
    assert!(items.iter().all(|g| g["user_id"] == "user-1"));

    let (_, _, page2) = send(&t.app, get("/api/generations?page=2", Some("valid-token"))).await;
    let items = page2["generations"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["prompt"], "prompt 0");

    let (status, _, _) = send(&t.app, get("/api/generations", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Auth callback ────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_callback_sets_cookie_and_redirects() {
    let t = test_app(Options::default());

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/auth/callback?code=good-code&redirect=/generations", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()[header::LOCATION], "/generations");
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("sb-access-token=fresh-token;"));

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/auth/callback?code=good-code", None))
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::LOCATION], "/dashboard");

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/auth/callback?code=bad-code", None))
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::LOCATION], "/login?error=auth");
    assert!(!resp.headers().contains_key(header::SET_COOKIE));
}

#[tokio::test]
async fn auth_callback_without_code_skips_exchange() {
    let t = test_app(Options::default());

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/auth/callback?redirect=/generations", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()[header::LOCATION], "/generations");
    assert!(!resp.headers().contains_key(header::SET_COOKIE));

    let resp = t
        .app
        .clone()
        .oneshot(get("/api/auth/callback", None))
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::LOCATION], "/dashboard");
}

#[tokio::test]
async fn healthz_is_ok() {
    let t = test_app(Options::default());
    let resp = t.app.clone().oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Real toolchain ───────────────────────────────────────────────────────────

/// Skip unless a LaTeX toolchain has been requested.
macro_rules! latex_skip_unless_ready {
    () => {{
        if std::env::var("LATEX_E2E").is_err() {
            println!("SKIP: set LATEX_E2E=1 (with pdflatex on PATH) to run toolchain tests");
            return;
        }
    }};
}

#[tokio::test]
async fn real_pdflatex_end_to_end() {
    latex_skip_unless_ready!();

    let scratch = tempfile::tempdir().unwrap();
    let config = ServiceConfig::default();
    let model = StubModel::new(
        "Sure!\n```latex\n\\documentclass{article}\n\\usepackage{minted}\n\\usepackage{tikz}\n\\begin{document}\n\\section{Demo}\n\\begin{lstlisting}[language=Rust]\nfn main() {}\n\\end{lstlisting}\n\\begin{tikzpicture}\\draw (0,0) -- (1,1);\\end{tikzpicture}\n\\end{document}\n```",
    );
    let compiler = LatexCompiler::new(CompilerBackend::local("pdflatex"), Duration::from_secs(120))
        .with_scratch_root(scratch.path());
    let objects = Arc::new(StubObjects::default());
    let records = Arc::new(SqliteGenerationStore::new(Database::open_in_memory().unwrap()));
    let generator = Generator::new(model, Arc::new(compiler), objects.clone(), records.clone(), &config);

    let session = Session {
        user_id: "user-1".to_string(),
        email: None,
        access_token: "valid-token".to_string(),
    };
    let pdf = generator.generate(&session, "a rust demo").await.unwrap();
    assert!(pdf.latex.contains("\\lstdefinelanguage{Rust}"));
    assert_eq!(objects.puts.lock().unwrap().len(), 1);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

