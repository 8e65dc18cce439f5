//! Generation records: one append-only row per finished request.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{Database, DatabaseError};

const TABLE: &str = "pdf_generations";

/// Outcome of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Error,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown generation status '{other}'")),
        }
    }
}

/// One row of `pdf_generations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub prompt: String,
    /// Signed retrieval URL; empty for failed generations.
    pub pdf_url: String,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn success(user_id: impl Into<String>, prompt: impl Into<String>, pdf_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            pdf_url: pdf_url.into(),
            status: GenerationStatus::Success,
            created_at: Utc::now(),
        }
    }

    pub fn error(user_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            pdf_url: String::new(),
            status: GenerationStatus::Error,
            created_at: Utc::now(),
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let id: String = row.get("id")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| invalid_row(format!("id '{id}': {e}")))?,
            user_id: row.get("user_id")?,
            prompt: row.get("prompt")?,
            pdf_url: row.get("pdf_url")?,
            status: status.parse().map_err(invalid_row)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| invalid_row(format!("created_at '{created_at}': {e}")))?
                .with_timezone(&Utc),
        })
    }
}

fn invalid_row(reason: String) -> DatabaseError {
    DatabaseError::InvalidRow {
        table: TABLE,
        reason,
    }
}

/// Append-only store of generation records.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert(&self, record: &GenerationRecord) -> Result<(), DatabaseError>;

    /// The user's records, newest first. `page` is 1-based; 0 is treated as 1.
    async fn list_for_user(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<GenerationRecord>, DatabaseError>;
}

/// Inserts a new generation row.
pub fn insert(db: &Database, record: &GenerationRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pdf_generations (id, user_id, prompt, pdf_url, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.user_id,
                record.prompt,
                record.pdf_url,
                record.status.as_str(),
                record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    })
}

/// Lists one page of a user's rows, newest first.
pub fn list_for_user(
    db: &Database,
    user_id: &str,
    page: u64,
    page_size: u64,
) -> Result<Vec<GenerationRecord>, DatabaseError> {
    let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, prompt, pdf_url, status, created_at FROM pdf_generations
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let mut rows = stmt.query(params![user_id, limit, offset])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(GenerationRecord::from_row(row)?);
        }
        Ok(records)
    })
}

/// [`GenerationStore`] over the SQLite [`Database`], run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteGenerationStore {
    db: Database,
}

impl SqliteGenerationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GenerationStore for SqliteGenerationStore {
    async fn insert(&self, record: &GenerationRecord) -> Result<(), DatabaseError> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || insert(&db, &record))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<GenerationRecord>, DatabaseError> {
        let db = self.db.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || list_for_user(&db, &user_id, page, page_size))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}
