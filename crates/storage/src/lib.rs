//! Segments database (component C11, spec §4.11).
//!
//! A single `PostgreSQL` instance with the vector extension holds
//! everything: source rows, attributed+embedded segments, and
//! resumability checkpoints. There is no separate object store or
//! vector database — voice embeddings are cache payloads, not
//! retrieval keys, so they live alongside the rest of a segment as
//! JSON rather than in their own index.

use async_trait::async_trait;
use chaffee_common::{Segment, Source, VideoDescriptor};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

pub mod postgres;

pub use postgres::{PostgresConfig, PostgresSegmentsDatabase};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One row of `ingestion_checkpoints`, written after every phase of a
/// source's run so a crashed process can resume without reprocessing
/// phases that already succeeded.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub source_id: String,
    pub phase: String,
    pub status: chaffee_common::CheckpointStatus,
    pub error_class: Option<String>,
}

/// The segments database contract (spec §4.11). Every method re-checks
/// the connection's transaction state before doing real work, so a
/// prior failed statement can't cascade into an unrelated call.
#[async_trait]
pub trait SegmentsDatabase: Send + Sync {
    async fn upsert_source(&self, descriptor: &VideoDescriptor) -> StorageResult<Uuid>;

    async fn get_cached_voice_embeddings(&self, source_id: &str) -> StorageResult<HashMap<(i64, i64), Vec<f32>>>;

    async fn is_ingested(&self, source_id: &str) -> StorageResult<bool>;

    /// Inserts all of `segments` in a single transaction, sets
    /// `source.ingested_at`, and (non-fatally) classifies `video_type`.
    async fn insert_segments(&self, source_uuid: Uuid, segments: &[Segment]) -> StorageResult<()>;

    async fn checkpoint(&self, record: &CheckpointRecord) -> StorageResult<()>;

    async fn get_source(&self, source_id: &str) -> StorageResult<Option<Source>>;
}
