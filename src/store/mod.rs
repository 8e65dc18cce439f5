//! Persistence: generation records in SQLite and PDFs in object storage.
//!
//! Both sit behind traits ([`GenerationStore`], [`ObjectStore`]) so the
//! orchestrator and the HTTP layer can be exercised with in-process doubles.

pub mod database;
pub mod error;
pub mod generations;
pub mod migrations;
pub mod object;

pub use database::Database;
pub use error::{DatabaseError, StorageError};
pub use generations::{GenerationRecord, GenerationStatus, GenerationStore, SqliteGenerationStore};
pub use object::{ObjectStore, S3ObjectStore};
