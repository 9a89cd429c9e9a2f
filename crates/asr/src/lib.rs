//! ASR engine (spec §4.5, component C5), backed by whisper.cpp.
//!
//! Produces time-coded segments with per-word timestamps from 16 kHz
//! mono PCM. Decoding is deterministic (greedy, temperature 0); VAD
//! filtering is off by default. Segments whose `no_speech_prob` exceeds
//! [`AsrConfig::no_speech_threshold`] are dropped before they ever reach
//! the caller.

use chaffee_common::IngestError;
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// A single word with its timestamp, extracted from whisper.cpp's
/// per-token timing data.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Word {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

/// One ASR segment. `avg_logprob` and `compression_ratio` are quality
/// signals carried through to storage unmodified; they are not used to
/// filter segments here (only `no_speech_prob` is).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AsrSegment {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    pub avg_logprob: f32,
    pub compression_ratio: f32,
    pub no_speech_prob: f32,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub model_path: PathBuf,
    pub language: Option<String>,
    pub num_threads: usize,
    pub beam_size: u8,
    pub no_speech_threshold: f32,
    pub word_timestamps: bool,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/whisper/ggml-large-v3.bin"),
            language: Some("en".to_string()),
            num_threads: num_cpus::get_physical(),
            beam_size: 1,
            no_speech_threshold: 0.9,
            word_timestamps: true,
        }
    }
}

/// Process-wide ASR model singleton, lazily loaded on first use and
/// never reloaded (spec §5: "model objects are process-wide singletons").
/// A `Mutex` serializes `create_state`/`full` calls; only `asr_workers`
/// (typically 1) ever contend on it.
pub struct AsrEngine {
    config: AsrConfig,
    context: Arc<OnceCell<Mutex<WhisperContext>>>,
}

impl AsrEngine {
    #[must_use]
    pub fn new(config: AsrConfig) -> Self {
        Self {
            config,
            context: Arc::new(OnceCell::new()),
        }
    }

    fn get_or_load(&self) -> Result<&Mutex<WhisperContext>, IngestError> {
        self.context.get_or_try_init(|| {
            if !self.config.model_path.exists() {
                return Err(IngestError::TranscriptionFailed {
                    source_id: String::new(),
                    reason: format!(
                        "whisper model not found at {}",
                        self.config.model_path.display()
                    ),
                });
            }

            tracing::info!(path = %self.config.model_path.display(), "loading whisper model");

            let path_str = self.config.model_path.to_str().ok_or_else(|| {
                IngestError::TranscriptionFailed {
                    source_id: String::new(),
                    reason: "model path is not valid UTF-8".to_string(),
                }
            })?;

            let context =
                WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
                    .map_err(|e| IngestError::TranscriptionFailed {
                        source_id: String::new(),
                        reason: e.to_string(),
                    })?;

            Ok(Mutex::new(context))
        })
    }

    fn build_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.config.num_threads as i32);
        if let Some(lang) = &self.config.language {
            params.set_language(Some(lang.as_str()));
        }
        params.set_translate(false);
        params.set_token_timestamps(self.config.word_timestamps);
        params.set_temperature(0.0);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params
    }

    /// Transcribes `pcm` (mono f32 at 16 kHz) into segments, dropping
    /// anything the model considers non-speech.
    pub fn transcribe(&self, pcm: &[f32], source_id: &str) -> Result<Vec<AsrSegment>, IngestError> {
        let context_mutex = self.get_or_load()?;
        let context = context_mutex.lock().map_err(|_| IngestError::TranscriptionFailed {
            source_id: source_id.to_string(),
            reason: "whisper context mutex poisoned".to_string(),
        })?;

        let mut state = context.create_state().map_err(|e| IngestError::TranscriptionFailed {
            source_id: source_id.to_string(),
            reason: format!("failed to create whisper state: {e}"),
        })?;

        let params = self.build_params();
        state.full(params, pcm).map_err(|e| IngestError::TranscriptionFailed {
            source_id: source_id.to_string(),
            reason: format!("whisper full() failed: {e}"),
        })?;

        let mut segments = Vec::with_capacity(state.full_n_segments() as usize);
        for seg in state.as_iter() {
            let no_speech_prob = seg.no_speech_probability();
            if no_speech_prob > self.config.no_speech_threshold {
                continue;
            }

            let text = seg.to_string().trim().to_string();
            if text.is_empty() {
                continue;
            }

            let words = if self.config.word_timestamps {
                extract_words(&seg)
            } else {
                Vec::new()
            };

            let avg_logprob = average_token_logprob(&seg);
            let compression_ratio = gzip_compression_ratio(&text);

            segments.push(AsrSegment {
                start_s: seg.start_timestamp() as f64 / 100.0,
                end_s: seg.end_timestamp() as f64 / 100.0,
                text,
                avg_logprob,
                compression_ratio,
                no_speech_prob,
                words,
            });
        }

        Ok(segments)
    }
}

fn extract_words(segment: &whisper_rs::WhisperSegment) -> Vec<Word> {
    let mut words = Vec::with_capacity(segment.n_tokens() as usize);
    for idx in 0..segment.n_tokens() {
        let Some(token) = segment.get_token(idx) else {
            continue;
        };
        let text = token.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with("[_") || trimmed.starts_with("<|") {
            continue;
        }
        let data = token.token_data();
        words.push(Word {
            start_s: data.t0 as f64 / 100.0,
            end_s: data.t1 as f64 / 100.0,
            text: trimmed.to_string(),
        });
    }
    words
}

/// Mean of `ln(p)` over non-special tokens, whisper.cpp's usual quality
/// signal in the absence of a direct `avg_logprob` field.
fn average_token_logprob(segment: &whisper_rs::WhisperSegment) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for idx in 0..segment.n_tokens() {
        let Some(token) = segment.get_token(idx) else {
            continue;
        };
        let p = token.token_data().p;
        if p > 0.0 {
            sum += f64::from(p).ln();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / f64::from(count)) as f32
    }
}

/// `len(text) / len(gzip(text))`, the compression-ratio heuristic used
/// to flag hallucinated repetitive output (high ratio = too compressible).
fn gzip_compression_ratio(text: &str) -> f32 {
    if text.is_empty() {
        return 1.0;
    }
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    if encoder.write_all(text.as_bytes()).is_err() {
        return 1.0;
    }
    let compressed = match encoder.finish() {
        Ok(c) => c,
        Err(_) => return 1.0,
    };
    if compressed.is_empty() {
        return 1.0;
    }
    text.len() as f32 / compressed.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_ratio_of_empty_text_is_one() {
        assert_eq!(gzip_compression_ratio(""), 1.0);
    }

    #[test]
    fn repetitive_text_compresses_better_than_varied_text() {
        let repetitive = "the the the the the the the the the the the the the the the the";
        let varied = "quick brown fox jumps over the lazy dog near the riverbank at dawn";
        assert!(gzip_compression_ratio(repetitive) > gzip_compression_ratio(varied));
    }

    #[test]
    fn missing_model_file_is_transcription_failed() {
        let engine = AsrEngine::new(AsrConfig {
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..AsrConfig::default()
        });
        let err = engine.transcribe(&[0.0f32; 16000], "v1").unwrap_err();
        assert!(matches!(err, IngestError::TranscriptionFailed { .. }));
    }
}
