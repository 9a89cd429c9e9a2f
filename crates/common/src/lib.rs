//! Shared domain types and the pipeline-wide error taxonomy.
//!
//! Every crate in the workspace depends on this one; it has no
//! dependency on any other workspace crate. Keep it that way.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can surface from any pipeline stage.
///
/// Per-video variants (everything except `Config` and `Cancelled`) are
/// caught at the orchestrator boundary and recorded against that video;
/// they never abort the run. `Config` is fatal at startup, `Cancelled`
/// is the clean-shutdown path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("audio permanently unavailable for {source_id}: {reason}")]
    AudioUnavailable { source_id: String, reason: String },

    #[error("transient audio fetch failure for {source_id}: {reason}")]
    AudioTransient { source_id: String, reason: String },

    #[error("unreadable container for {source_id}: {reason}")]
    Format { source_id: String, reason: String },

    #[error("transcription failed for {source_id}: {reason}")]
    TranscriptionFailed { source_id: String, reason: String },

    #[error("diarization failed for {source_id}, degrading to unknown: {reason}")]
    DiarizerFailed { source_id: String, reason: String },

    #[error("voice extraction failed for {source_id}: {reason}")]
    VoiceExtractFailed { source_id: String, reason: String },

    #[error("text embedding out of memory after retry for {source_id}")]
    TextEmbedOom { source_id: String },

    #[error("database connection aborted: {0}")]
    DbAborted(String),

    #[error("transaction failed for {source_id}, no segments committed: {reason}")]
    TransactionFailed { source_id: String, reason: String },

    #[error("{stage} timed out after {elapsed:?} for {source_id}")]
    Timeout {
        source_id: String,
        stage: &'static str,
        elapsed: Duration,
    },

    #[error("ingestion cancelled by user")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Whether the orchestrator should retry this video (up to `max_retries`)
    /// rather than mark it a permanent failure on first occurrence.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::AudioTransient { .. }
                | IngestError::TranscriptionFailed { .. }
                | IngestError::DbAborted(_)
                | IngestError::TransactionFailed { .. }
                | IngestError::Timeout { .. }
        )
    }

    /// The `error_class` string persisted in `ingestion_checkpoints`.
    #[must_use]
    pub fn error_class(&self) -> &'static str {
        match self {
            IngestError::Config(_) => "config",
            IngestError::SourceUnavailable(_) => "source_unavailable",
            IngestError::AudioUnavailable { .. } => "audio_unavailable",
            IngestError::AudioTransient { .. } => "audio_transient",
            IngestError::Format { .. } => "format",
            IngestError::TranscriptionFailed { .. } => "transcription_failed",
            IngestError::DiarizerFailed { .. } => "diarizer_failed",
            IngestError::VoiceExtractFailed { .. } => "voice_extract_failed",
            IngestError::TextEmbedOom { .. } => "text_embed_oom",
            IngestError::DbAborted(_) => "db_aborted",
            IngestError::TransactionFailed { .. } => "transaction_failed",
            IngestError::Timeout { .. } => "timeout",
            IngestError::Cancelled => "cancelled",
            IngestError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Where a `VideoDescriptor` came from; also `sources.source_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Youtube,
    Manual,
}

/// One candidate video yielded by a `VideoSource`, before any audio has
/// been fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub source_type: SourceType,
    pub duration_s: f64,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl VideoDescriptor {
    /// Heuristic the orchestrator uses to pass `min_speakers = max_speakers
    /// = 2` to the diarizer: title suggests a second party is present.
    #[must_use]
    pub fn looks_like_interview(&self) -> bool {
        let t = self.title.to_lowercase();
        t.contains("interview") || t.contains('|') || t.contains(" with ") || t.contains("feat.")
    }
}

/// `sources.video_type`, computed by storage after all segments of a
/// source are committed (see [`classify`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoType {
    Monologue,
    Interview,
    MonologueWithClips,
    Unknown,
}

/// `segments.speaker_label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerLabel {
    Primary,
    Guest,
    Unknown,
}

/// A persisted source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub source_type: SourceType,
    pub video_type: VideoType,
    pub duration_s: f64,
    pub published_at: chrono::DateTime<chrono::Utc>,
    pub ingested_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    pub retry_count: i32,
}

/// Per-segment ASR quality metadata, carried through from the ASR engine
/// to storage unmodified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AsrQuality {
    pub avg_logprob: f32,
    pub compression_ratio: f32,
    pub no_speech_prob: f32,
}

/// A fully attributed, embedded segment ready for a single transactional
/// batch insert. Produced by the attribution + embedding stages, consumed
/// by storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    pub speaker_label: SpeakerLabel,
    pub speaker_confidence: f32,
    pub text_embedding: Vec<f32>,
    pub voice_embedding: Option<Vec<f32>>,
    pub asr_quality: AsrQuality,
}

/// Pure function, invariant 5 / spec §4.11: `video_type` depends only on
/// the committed segment labels.
#[must_use]
pub fn classify(labels: &[SpeakerLabel]) -> VideoType {
    if labels.is_empty() {
        return VideoType::Unknown;
    }

    let total = labels.len() as f64;
    let primary = labels.iter().filter(|l| **l == SpeakerLabel::Primary).count() as f64;
    let guest = labels.iter().filter(|l| **l == SpeakerLabel::Guest).count() as f64;
    let known = primary + guest;

    if known == 0.0 {
        return VideoType::Unknown;
    }

    let distinct_known = [primary > 0.0, guest > 0.0].iter().filter(|b| **b).count();
    if distinct_known == 1 {
        return VideoType::Monologue;
    }

    let minority_share = primary.min(guest) / total;
    if minority_share > 0.15 {
        VideoType::Interview
    } else {
        VideoType::MonologueWithClips
    }
}

/// Status recorded in `ingestion_checkpoints` for a completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Success,
    PermanentFail,
    TransientFail,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(spec: &[(&str, usize)]) -> Vec<SpeakerLabel> {
        spec.iter()
            .flat_map(|(kind, n)| {
                let label = match *kind {
                    "p" => SpeakerLabel::Primary,
                    "g" => SpeakerLabel::Guest,
                    _ => SpeakerLabel::Unknown,
                };
                std::iter::repeat(label).take(*n)
            })
            .collect()
    }

    #[test]
    fn classify_empty_is_unknown() {
        assert_eq!(classify(&[]), VideoType::Unknown);
    }

    #[test]
    fn classify_all_unknown_is_unknown() {
        assert_eq!(classify(&labels(&[("u", 10)])), VideoType::Unknown);
    }

    #[test]
    fn classify_single_label_is_monologue() {
        assert_eq!(classify(&labels(&[("p", 50)])), VideoType::Monologue);
    }

    #[test]
    fn classify_above_threshold_is_interview() {
        assert_eq!(
            classify(&labels(&[("p", 80), ("g", 20)])),
            VideoType::Interview
        );
    }

    #[test]
    fn classify_at_or_below_threshold_is_monologue_with_clips() {
        assert_eq!(
            classify(&labels(&[("p", 90), ("g", 10)])),
            VideoType::MonologueWithClips
        );
    }

    #[test]
    fn classify_boundary_above_fifteen_percent() {
        assert_eq!(
            classify(&labels(&[("p", 84), ("g", 16)])),
            VideoType::Interview
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(IngestError::AudioTransient {
            source_id: "x".into(),
            reason: "flake".into()
        }
        .is_retryable());
        assert!(!IngestError::AudioUnavailable {
            source_id: "x".into(),
            reason: "members only".into()
        }
        .is_retryable());
    }

    #[test]
    fn interview_heuristic() {
        let mut d = VideoDescriptor {
            source_id: "1".into(),
            title: "A chat with a friend".into(),
            description: String::new(),
            url: String::new(),
            source_type: SourceType::Youtube,
            duration_s: 100.0,
            published_at: chrono::Utc::now(),
        };
        assert!(d.looks_like_interview());
        d.title = "Solo monologue episode 12".into();
        assert!(!d.looks_like_interview());
    }
}
