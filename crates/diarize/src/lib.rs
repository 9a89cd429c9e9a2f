//! Speaker diarizer (spec §4.6, component C6).
//!
//! Three stages, same architecture the previous PyAnnote.audio
//! replacement used: WebRTC VAD finds speech regions, an ONNX speaker
//! embedding model turns each region into a fixed-dim vector, and a
//! threshold-based agglomerative pass clusters those vectors into
//! speaker turns. Skipped entirely when the orchestrator's monologue
//! fast-path bypass fires ([`fast_path_turn`]).

mod cluster;
mod mel;
mod vad;

use chaffee_common::IngestError;
use ort::session::Session;
use ort::value::TensorRef;
use std::sync::Mutex;

pub use vad::SpeechSegment;

/// One speaker turn. Turns are non-overlapping and ordered by `start_s`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Turn {
    pub start_s: f64,
    pub end_s: f64,
    pub cluster_id: usize,
}

#[derive(Debug, Clone)]
pub struct DiarizeConfig {
    pub embedding_model_path: std::path::PathBuf,
    /// Lower values yield more (finer-grained) clusters.
    pub clustering_threshold: f32,
    /// Speech turns shorter than this are dropped.
    pub min_on_s: f32,
    /// Silence gaps shorter than this are bridged into one turn.
    pub min_off_s: f32,
    pub vad_aggressiveness: u8,
}

impl Default for DiarizeConfig {
    fn default() -> Self {
        Self {
            embedding_model_path: std::path::PathBuf::from("models/diarization/speaker_embedding.onnx"),
            clustering_threshold: 0.4,
            min_on_s: 0.0,
            min_off_s: 0.0,
            vad_aggressiveness: 3,
        }
    }
}

/// Optional speaker-count priors the orchestrator passes when a video's
/// title matches the interview heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakerPriors {
    pub min_speakers: Option<u8>,
    pub max_speakers: Option<u8>,
}

/// The synthetic turn substituted when the monologue fast-path bypasses
/// diarization entirely (spec §4.6): one speaker, the whole recording.
#[must_use]
pub fn fast_path_turn(duration_s: f64) -> Turn {
    Turn {
        start_s: 0.0,
        end_s: duration_s,
        cluster_id: 0,
    }
}

/// Process-wide ONNX session singleton for the speaker embedding model.
pub struct Diarizer {
    config: DiarizeConfig,
    session: Mutex<Option<Session>>,
}

impl Diarizer {
    #[must_use]
    pub fn new(config: DiarizeConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    fn with_session<R>(
        &self,
        source_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, IngestError>,
    ) -> Result<R, IngestError> {
        let mut guard = self.session.lock().map_err(|_| IngestError::DiarizerFailed {
            source_id: source_id.to_string(),
            reason: "embedding session mutex poisoned".to_string(),
        })?;

        if guard.is_none() {
            let session = chaffee_modelrt::create_gpu_session(&self.config.embedding_model_path)
                .map_err(|e| IngestError::DiarizerFailed {
                    source_id: source_id.to_string(),
                    reason: e.to_string(),
                })?;
            *guard = Some(session);
        }

        f(guard.as_mut().expect("just initialized"))
    }

    /// Runs the full VAD → embed → cluster pipeline over `pcm` (mono f32
    /// at 16 kHz). Returns turns sorted by `start_s`.
    pub fn diarize(
        &self,
        pcm: &[f32],
        priors: SpeakerPriors,
        source_id: &str,
    ) -> Result<Vec<Turn>, IngestError> {
        let raw_segments = vad::detect_speech_segments(
            pcm,
            16_000,
            self.config.vad_aggressiveness,
            self.config.min_on_s,
        )
        .map_err(|e| IngestError::DiarizerFailed {
            source_id: source_id.to_string(),
            reason: e,
        })?;

        let segments = vad::bridge_short_gaps(raw_segments, self.config.min_off_s);
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.with_session(source_id, |session| {
            extract_embeddings(session, &segments, source_id)
        })?;

        let labels = cluster::agglomerative_cluster(
            &embeddings,
            self.config.clustering_threshold,
            priors.min_speakers.map(usize::from),
            priors.max_speakers.map(usize::from),
        );

        let mut turns: Vec<Turn> = segments
            .iter()
            .zip(labels.iter())
            .map(|(seg, &cluster_id)| Turn {
                start_s: seg.start,
                end_s: seg.end,
                cluster_id,
            })
            .collect();
        turns.sort_by(|a, b| a.start_s.partial_cmp(&b.start_s).unwrap_or(std::cmp::Ordering::Equal));
        Ok(turns)
    }
}

const EMBEDDING_DIM: usize = 256;

fn extract_embeddings(
    session: &mut Session,
    segments: &[SpeechSegment],
    source_id: &str,
) -> Result<ndarray::Array2<f32>, IngestError> {
    let mut flat = Vec::with_capacity(segments.len() * EMBEDDING_DIM);

    for segment in segments {
        let mel = mel::compute_mel_features(&segment.samples, 16_000).map_err(|e| {
            IngestError::DiarizerFailed {
                source_id: source_id.to_string(),
                reason: format!("mel feature extraction failed: {e}"),
            }
        })?;
        let batch = mel.insert_axis(ndarray::Axis(0)).to_owned();

        let input = TensorRef::from_array_view(batch.view()).map_err(|e| {
            IngestError::DiarizerFailed {
                source_id: source_id.to_string(),
                reason: format!("tensor construction failed: {e}"),
            }
        })?;

        let outputs = session.run(ort::inputs![input]).map_err(|e| IngestError::DiarizerFailed {
            source_id: source_id.to_string(),
            reason: format!("onnx inference failed: {e}"),
        })?;

        let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            IngestError::DiarizerFailed {
                source_id: source_id.to_string(),
                reason: format!("tensor extraction failed: {e}"),
            }
        })?;

        flat.extend_from_slice(&data[0..EMBEDDING_DIM.min(data.len())]);
    }

    ndarray::Array2::from_shape_vec((segments.len(), EMBEDDING_DIM), flat).map_err(|e| {
        IngestError::DiarizerFailed {
            source_id: source_id.to_string(),
            reason: format!("embedding matrix shape mismatch: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_is_single_turn() {
        let t = fast_path_turn(120.0);
        assert_eq!(t.cluster_id, 0);
        assert_eq!(t.start_s, 0.0);
        assert_eq!(t.end_s, 120.0);
    }
}
