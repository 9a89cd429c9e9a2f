//! Voice embedder and voice profile store (spec §4.7/§4.8, components
//! C7/C8).
//!
//! The embedder turns time spans of a recording into fixed-dim speaker
//! embeddings, batched into a single padded-tensor forward pass for
//! throughput. The profile store persists the primary speaker's
//! reference embedding as a JSON-plus-binary record and answers
//! similarity queries against it.

mod mel;
mod profile;

use chaffee_common::IngestError;
use ndarray::{Array2, Array3, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::PathBuf;
use std::sync::Mutex;

pub use profile::VoiceProfile;

pub const EMBEDDING_DIM: usize = 256;
const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub embedding_model_path: PathBuf,
    /// Spans longer than this are clipped before feature extraction.
    pub max_span_s: f64,
    /// Identity of the speaker model generating embeddings, persisted
    /// into `VoiceProfile` so a profile built under one model isn't
    /// silently reused after the model changes.
    pub model_id: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            embedding_model_path: PathBuf::from("models/voice/speaker_embedding.onnx"),
            max_span_s: 60.0,
            model_id: "speaker_embedding".to_string(),
        }
    }
}

/// A `(start_s, end_s)` window into a recording's PCM to embed.
pub type Span = (f64, f64);

/// Process-wide ONNX session singleton for the voice embedding model.
/// Shares its model family with the diarizer's embedding step but is
/// loaded independently: the two run at different pipeline stages and
/// the orchestrator may not co-locate them on the same worker thread.
pub struct VoiceEmbedder {
    config: VoiceConfig,
    session: Mutex<Option<Session>>,
}

impl VoiceEmbedder {
    #[must_use]
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn with_session<R>(
        &self,
        source_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, IngestError>,
    ) -> Result<R, IngestError> {
        let mut guard = self.session.lock().map_err(|_| IngestError::VoiceExtractFailed {
            source_id: source_id.to_string(),
            reason: "embedding session mutex poisoned".to_string(),
        })?;

        if guard.is_none() {
            let session = chaffee_modelrt::create_gpu_session(&self.config.embedding_model_path)
                .map_err(|e| IngestError::VoiceExtractFailed {
                    source_id: source_id.to_string(),
                    reason: e.to_string(),
                })?;
            *guard = Some(session);
        }

        f(guard.as_mut().expect("just initialized"))
    }

    /// Embeds every span in one batched forward pass. Falls back to a
    /// sequential per-span pass if the batch inference call fails, so a
    /// single malformed span doesn't sink the whole batch.
    pub fn embed_batch(
        &self,
        pcm: &[f32],
        spans: &[Span],
        source_id: &str,
    ) -> Result<Array2<f32>, IngestError> {
        if spans.is_empty() {
            return Ok(Array2::zeros((0, EMBEDDING_DIM)));
        }

        let clipped: Vec<Span> = spans
            .iter()
            .map(|&(start, end)| (start, (end - start).min(self.config.max_span_s) + start))
            .collect();

        match self.with_session(source_id, |session| batched_forward(session, pcm, &clipped, source_id)) {
            Ok(matrix) => Ok(matrix),
            Err(batch_err) => {
                tracing::warn!(
                    source_id,
                    error = %batch_err,
                    "batched voice embedding failed, falling back to sequential"
                );
                self.embed_sequential(pcm, &clipped, source_id)
            }
        }
    }

    fn embed_sequential(
        &self,
        pcm: &[f32],
        spans: &[Span],
        source_id: &str,
    ) -> Result<Array2<f32>, IngestError> {
        let mut flat = Vec::with_capacity(spans.len() * EMBEDDING_DIM);
        for &span in spans {
            let row = self.with_session(source_id, |session| single_span_forward(session, pcm, span, source_id))?;
            flat.extend_from_slice(&row);
        }
        Array2::from_shape_vec((spans.len(), EMBEDDING_DIM), flat).map_err(|e| IngestError::VoiceExtractFailed {
            source_id: source_id.to_string(),
            reason: format!("embedding matrix shape mismatch: {e}"),
        })
    }
}

fn span_samples(pcm: &[f32], span: Span) -> &[f32] {
    let start = ((span.0.max(0.0)) * f64::from(SAMPLE_RATE)) as usize;
    let end = ((span.1.max(0.0)) * f64::from(SAMPLE_RATE)) as usize;
    let start = start.min(pcm.len());
    let end = end.min(pcm.len()).max(start);
    &pcm[start..end]
}

fn batched_forward(
    session: &mut Session,
    pcm: &[f32],
    spans: &[Span],
    source_id: &str,
) -> Result<Array2<f32>, IngestError> {
    let mut features = Vec::with_capacity(spans.len());
    for &span in spans {
        let samples = span_samples(pcm, span);
        let mel = mel::compute_mel_features(samples, SAMPLE_RATE).map_err(|e| IngestError::VoiceExtractFailed {
            source_id: source_id.to_string(),
            reason: format!("mel feature extraction failed: {e}"),
        })?;
        features.push(mel);
    }

    let max_frames = features.iter().map(|m| m.nrows()).max().unwrap_or(0);
    let n_mels = features.first().map(|m| m.ncols()).unwrap_or(80);

    let mut padded = Array3::<f32>::zeros((spans.len(), max_frames, n_mels));
    for (i, mel) in features.iter().enumerate() {
        let mut row = padded.index_axis_mut(Axis(0), i);
        row.slice_mut(ndarray::s![0..mel.nrows(), ..]).assign(mel);
    }

    let input = TensorRef::from_array_view(padded.view()).map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("tensor construction failed: {e}"),
    })?;

    let outputs = session.run(ort::inputs![input]).map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("onnx batch inference failed: {e}"),
    })?;

    let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("tensor extraction failed: {e}"),
    })?;

    Array2::from_shape_vec((spans.len(), EMBEDDING_DIM), data[..spans.len() * EMBEDDING_DIM].to_vec())
        .map_err(|e| IngestError::VoiceExtractFailed {
            source_id: source_id.to_string(),
            reason: format!("embedding matrix shape mismatch: {e}"),
        })
    // `outputs` and the intermediate tensors drop here, releasing GPU memory
    // before the caller moves on to the next batch.
}

fn single_span_forward(
    session: &mut Session,
    pcm: &[f32],
    span: Span,
    source_id: &str,
) -> Result<Vec<f32>, IngestError> {
    let samples = span_samples(pcm, span);
    let mel = mel::compute_mel_features(samples, SAMPLE_RATE).map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("mel feature extraction failed: {e}"),
    })?;
    let batch = mel.insert_axis(Axis(0)).to_owned();

    let input = TensorRef::from_array_view(batch.view()).map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("tensor construction failed: {e}"),
    })?;

    let outputs = session.run(ort::inputs![input]).map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("onnx inference failed: {e}"),
    })?;

    let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| IngestError::VoiceExtractFailed {
        source_id: source_id.to_string(),
        reason: format!("tensor extraction failed: {e}"),
    })?;

    Ok(data[0..EMBEDDING_DIM.min(data.len())].to_vec())
}

/// Cosine similarity between two equal-length vectors. Returns 0 if
/// either is zero-norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spans_produce_empty_matrix() {
        let embedder = VoiceEmbedder::new(VoiceConfig::default());
        let matrix = embedder.embed_batch(&[], &[], "vid1").unwrap();
        assert_eq!(matrix.shape(), &[0, EMBEDDING_DIM]);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        let a = vec![0.0f32, 0.0];
        let b = vec![1.0f32, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
