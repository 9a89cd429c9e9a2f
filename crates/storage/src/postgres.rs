//! `PostgreSQL` + pgvector implementation of [`crate::SegmentsDatabase`].
//!
//! A single `tokio_postgres::Client` behind a mutex, matching the rest
//! of the pipeline's preference for one long-lived connection per
//! process rather than a pool — `db_workers` share it and serialize on
//! the mutex for transactional work.

use crate::{CheckpointRecord, SegmentsDatabase, StorageError, StorageResult};
use async_trait::async_trait;
use chaffee_common::{classify, Segment, Source, SourceType, VideoDescriptor, VideoType};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

/// `PostgreSQL` + pgvector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub database_url: String,

    /// Dimension of `segments.text_embedding`; fixed per deployment.
    pub d_text: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "host=localhost user=postgres dbname=chaffee_ingest".to_string()),
            d_text: 384,
        }
    }
}

/// `PostgreSQL` + pgvector segments database.
pub struct PostgresSegmentsDatabase {
    client: Mutex<Client>,
}

impl PostgresSegmentsDatabase {
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls)
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {e}");
            }
        });

        let db = Self { client: Mutex::new(client) };
        db.init_schema(config.d_text).await?;
        Ok(db)
    }

    async fn init_schema(&self, d_text: usize) -> StorageResult<()> {
        let client = self.client.lock().await;

        client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS sources (
                    id UUID PRIMARY KEY,
                    source_id TEXT UNIQUE NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    url TEXT NOT NULL,
                    source_type TEXT NOT NULL,
                    video_type TEXT NOT NULL DEFAULT 'unknown',
                    duration_s DOUBLE PRECISION NOT NULL,
                    published_at TIMESTAMP WITH TIME ZONE NOT NULL,
                    ingested_at TIMESTAMP WITH TIME ZONE,
                    last_error TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0
                )
                ",
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        client
            .batch_execute(&format!(
                r"
                CREATE TABLE IF NOT EXISTS segments (
                    seg_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    source_id UUID NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                    start_s DOUBLE PRECISION NOT NULL,
                    end_s DOUBLE PRECISION NOT NULL,
                    text TEXT NOT NULL,
                    speaker_label TEXT NOT NULL,
                    speaker_confidence REAL NOT NULL,
                    text_embedding vector({d_text}) NOT NULL,
                    voice_embedding JSONB,
                    avg_logprob REAL NOT NULL,
                    compression_ratio REAL NOT NULL,
                    no_speech_prob REAL NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
                )
                "
            ))
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        client
            .batch_execute(
                r"
                CREATE TABLE IF NOT EXISTS ingestion_checkpoints (
                    source_id TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    status TEXT NOT NULL,
                    error_class TEXT,
                    ts TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
                )
                ",
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        client
            .batch_execute(
                r"
                CREATE INDEX IF NOT EXISTS idx_segments_text_embedding
                    ON segments USING ivfflat (text_embedding vector_cosine_ops) WITH (lists = 100);
                CREATE INDEX IF NOT EXISTS idx_segments_source_start ON segments(source_id, start_s);
                CREATE INDEX IF NOT EXISTS idx_segments_speaker_label ON segments(speaker_label);
                CREATE INDEX IF NOT EXISTS idx_sources_video_type ON sources(video_type);
                ",
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }

    /// Before any query: if the connection is sitting in an aborted
    /// transaction, roll it back so the next statement starts clean.
    async fn ensure_ready(client: &Client) -> StorageResult<()> {
        if let Err(e) = client.simple_query("SELECT 1").await {
            tracing::warn!("connection unhealthy ({e}), issuing rollback");
            let _ = client.batch_execute("ROLLBACK").await;
        }
        Ok(())
    }

    async fn classify_and_update(&self, source_uuid: Uuid, segments: &[Segment]) -> StorageResult<()> {
        let labels: Vec<_> = segments.iter().map(|s| s.speaker_label).collect();
        let video_type = classify(&labels);

        let client = self.client.lock().await;
        client
            .execute(
                "UPDATE sources SET video_type = $1 WHERE id = $2",
                &[&video_type_str(video_type), &source_uuid],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SegmentsDatabase for PostgresSegmentsDatabase {
    async fn upsert_source(&self, descriptor: &VideoDescriptor) -> StorageResult<Uuid> {
        let client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        let source_type = source_type_str(descriptor.source_type);

        let row = client
            .query_one(
                r"
                INSERT INTO sources (id, source_id, title, description, url, source_type, duration_s, published_at)
                VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (source_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    description = EXCLUDED.description,
                    url = EXCLUDED.url,
                    duration_s = EXCLUDED.duration_s,
                    published_at = EXCLUDED.published_at
                RETURNING id
                ",
                &[
                    &descriptor.source_id,
                    &descriptor.title,
                    &descriptor.description,
                    &descriptor.url,
                    &source_type,
                    &descriptor.duration_s,
                    &descriptor.published_at,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(row.get(0))
    }

    async fn get_cached_voice_embeddings(&self, source_id: &str) -> StorageResult<HashMap<(i64, i64), Vec<f32>>> {
        let client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        let rows = client
            .query(
                r"
                SELECT s.start_s, s.end_s, s.voice_embedding
                FROM segments s
                JOIN sources src ON src.id = s.source_id
                WHERE src.source_id = $1 AND s.voice_embedding IS NOT NULL
                ",
                &[&source_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        let mut cache = HashMap::new();
        for row in rows {
            let start_s: f64 = row.get(0);
            let end_s: f64 = row.get(1);
            let embedding_json: serde_json::Value = row.get(2);
            let embedding: Vec<f32> =
                serde_json::from_value(embedding_json).map_err(|e| StorageError::SerializationError(e.to_string()))?;
            let key = ((start_s * 1000.0).round() as i64, (end_s * 1000.0).round() as i64);
            cache.insert(key, embedding);
        }
        Ok(cache)
    }

    async fn is_ingested(&self, source_id: &str) -> StorageResult<bool> {
        let client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        let row = client
            .query_opt("SELECT ingested_at FROM sources WHERE source_id = $1", &[&source_id])
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(row.is_some_and(|r| r.get::<_, Option<chrono::DateTime<chrono::Utc>>>(0).is_some()))
    }

    async fn insert_segments(&self, source_uuid: Uuid, segments: &[Segment]) -> StorageResult<()> {
        let mut client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        let txn = client.transaction().await.map_err(|e| StorageError::PostgresError(e.to_string()))?;

        // A re-ingest (--force) re-runs the whole pipeline for a source
        // already in the table; clear its prior segments first so this
        // insert replaces rather than duplicates them (invariant 1).
        txn.execute("DELETE FROM segments WHERE source_id = $1", &[&source_uuid])
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        for seg in segments {
            let voice_embedding_json = seg
                .voice_embedding
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;

            let label = speaker_label_str(seg.speaker_label);
            let vector = Vector::from(seg.text_embedding.clone());

            txn.execute(
                r"
                INSERT INTO segments
                (source_id, start_s, end_s, text, speaker_label, speaker_confidence,
                 text_embedding, voice_embedding, avg_logprob, compression_ratio, no_speech_prob)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
                &[
                    &source_uuid,
                    &seg.start_s,
                    &seg.end_s,
                    &seg.text,
                    &label,
                    &seg.speaker_confidence,
                    &vector,
                    &voice_embedding_json,
                    &seg.asr_quality.avg_logprob,
                    &seg.asr_quality.compression_ratio,
                    &seg.asr_quality.no_speech_prob,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;
        }

        txn.execute("UPDATE sources SET ingested_at = now() WHERE id = $1", &[&source_uuid])
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        txn.commit().await.map_err(|e| StorageError::PostgresError(e.to_string()))?;
        drop(client);

        // Classification runs after commit; failure here is non-fatal,
        // the segments are already durable and video_type stays unknown.
        if let Err(e) = self.classify_and_update(source_uuid, segments).await {
            tracing::warn!(%source_uuid, error = %e, "video_type classification failed, leaving as unknown");
        }

        Ok(())
    }

    async fn checkpoint(&self, record: &CheckpointRecord) -> StorageResult<()> {
        let client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        client
            .execute(
                r"
                INSERT INTO ingestion_checkpoints (source_id, phase, status, error_class)
                VALUES ($1, $2, $3, $4)
                ",
                &[
                    &record.source_id,
                    &record.phase,
                    &checkpoint_status_str(record.status),
                    &record.error_class,
                ],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(())
    }

    async fn get_source(&self, source_id: &str) -> StorageResult<Option<Source>> {
        let client = self.client.lock().await;
        Self::ensure_ready(&client).await?;

        let row = client
            .query_opt(
                r"
                SELECT id, source_id, title, description, url, source_type, video_type,
                       duration_s, published_at, ingested_at, last_error, retry_count
                FROM sources WHERE source_id = $1
                ",
                &[&source_id],
            )
            .await
            .map_err(|e| StorageError::PostgresError(e.to_string()))?;

        Ok(row.map(|r| Source {
            id: r.get(0),
            source_id: r.get(1),
            title: r.get(2),
            description: r.get(3),
            url: r.get(4),
            source_type: parse_source_type(r.get(5)),
            video_type: parse_video_type(r.get(6)),
            duration_s: r.get(7),
            published_at: r.get(8),
            ingested_at: r.get(9),
            last_error: r.get(10),
            retry_count: r.get(11),
        }))
    }
}

fn source_type_str(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Youtube => "youtube",
        SourceType::Manual => "manual",
    }
}

fn parse_source_type(s: String) -> SourceType {
    match s.as_str() {
        "manual" => SourceType::Manual,
        _ => SourceType::Youtube,
    }
}

fn speaker_label_str(label: chaffee_common::SpeakerLabel) -> &'static str {
    use chaffee_common::SpeakerLabel;
    match label {
        SpeakerLabel::Primary => "primary",
        SpeakerLabel::Guest => "guest",
        SpeakerLabel::Unknown => "unknown",
    }
}

fn video_type_str(video_type: VideoType) -> &'static str {
    match video_type {
        VideoType::Monologue => "monologue",
        VideoType::Interview => "interview",
        VideoType::MonologueWithClips => "monologue_with_clips",
        VideoType::Unknown => "unknown",
    }
}

fn parse_video_type(s: String) -> VideoType {
    match s.as_str() {
        "monologue" => VideoType::Monologue,
        "interview" => VideoType::Interview,
        "monologue_with_clips" => VideoType::MonologueWithClips,
        _ => VideoType::Unknown,
    }
}

fn checkpoint_status_str(status: chaffee_common::CheckpointStatus) -> &'static str {
    use chaffee_common::CheckpointStatus;
    match status {
        CheckpointStatus::Success => "success",
        CheckpointStatus::PermanentFail => "permanent_fail",
        CheckpointStatus::TransientFail => "transient_fail",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_url_falls_back_to_localhost() {
        std::env::remove_var("DATABASE_URL");
        let config = PostgresConfig::default();
        assert!(config.database_url.contains("localhost"));
        assert_eq!(config.d_text, 384);
    }

    #[test]
    fn video_type_round_trips_through_its_string_form() {
        for vt in [
            VideoType::Monologue,
            VideoType::Interview,
            VideoType::MonologueWithClips,
            VideoType::Unknown,
        ] {
            assert_eq!(parse_video_type(video_type_str(vt).to_string()), vt);
        }
    }

    #[test]
    fn source_type_round_trips_through_its_string_form() {
        for st in [SourceType::Youtube, SourceType::Manual] {
            assert_eq!(parse_source_type(source_type_str(st).to_string()), st);
        }
    }
}
