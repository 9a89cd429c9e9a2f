//! Audio loading (spec §4.4, component C4).
//!
//! Opens an arbitrary container and yields mono PCM at a fixed 16 kHz
//! sample rate. Two decode paths exist and must be behaviorally
//! equivalent: a fast native path for already-conformant WAV files, and a
//! general FFmpeg-backed path for everything else (and for WAV files
//! that don't already match the target format). Long recordings are
//! read in bounded chunks so a multi-hour stream never needs to be
//! materialized in RAM at once.

use chaffee_common::IngestError;
use std::path::Path;

mod general;
mod wav_fast_path;

pub use general::GeneralDecoder;
pub use wav_fast_path::WavFastPathReader;

/// Fixed output sample rate for the whole pipeline downstream of C4.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Above this duration, callers should consume [`PcmSource`] chunk by
/// chunk instead of calling [`load_mono_pcm_16k`].
pub const DEFAULT_CHUNK_THRESHOLD_S: f64 = 1800.0;

/// Samples per chunk at the target rate, derived from the threshold.
fn chunk_threshold_samples(chunk_threshold_s: f64) -> usize {
    (chunk_threshold_s * f64::from(TARGET_SAMPLE_RATE)) as usize
}

/// A lazily-decoded, chunked stream of mono f32 PCM at 16 kHz. Each item
/// is one chunk of up to `chunk_threshold_s` seconds of audio.
pub enum PcmSource {
    WavFastPath(WavFastPathReader),
    General(Box<GeneralDecoder>),
}

impl Iterator for PcmSource {
    type Item = Result<Vec<f32>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            PcmSource::WavFastPath(r) => r.next(),
            PcmSource::General(d) => d.next(),
        }
    }
}

/// Opens `path` and selects a decode path. The WAV fast path is used only
/// when the file is already 16 kHz mono PCM; every other container (and
/// every non-conformant WAV) goes through the general FFmpeg decoder.
/// Both paths produce the same chunk size and sample format.
pub fn open(path: &Path, chunk_threshold_s: f64) -> Result<PcmSource, IngestError> {
    let chunk_samples = chunk_threshold_samples(chunk_threshold_s);

    if path.extension().and_then(|e| e.to_str()) == Some("wav") {
        match wav_fast_path::WavFastPathReader::open(path, chunk_samples) {
            Ok(reader) => return Ok(PcmSource::WavFastPath(reader)),
            Err(wav_fast_path::FastPathRejected::NotConformant) => {
                tracing::debug!(?path, "wav not conformant to 16kHz mono, falling back");
            }
            Err(wav_fast_path::FastPathRejected::Error(e)) => return Err(e),
        }
    }

    Ok(PcmSource::General(Box::new(general::GeneralDecoder::open(
        path,
        chunk_samples,
    )?)))
}

/// Convenience for short recordings and tests: decodes the whole file
/// into a single `Vec<f32>`. Internally still chunks, it just
/// concatenates before returning.
pub fn load_mono_pcm_16k(path: &Path) -> Result<Vec<f32>, IngestError> {
    let mut out = Vec::new();
    for chunk in open(path, f64::MAX)? {
        out.extend(chunk?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_threshold_converts_seconds_to_samples() {
        assert_eq!(chunk_threshold_samples(1.0), 16_000);
        assert_eq!(chunk_threshold_samples(0.5), 8_000);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_mono_pcm_16k(Path::new("/nonexistent/audio.wav")).unwrap_err();
        assert!(matches!(err, IngestError::Io(_) | IngestError::Format { .. }));
    }
}
