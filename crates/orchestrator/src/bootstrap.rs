//! Bootstrap (spec §4.14, component C14).
//!
//! The very first time a process runs against a fresh `VOICES_DIR`, there
//! is no primary-speaker profile to attribute against. This module seeds
//! one from a fixed list of known solo recordings, running each through
//! fetch -> load -> voice-embed only (no transcription, no diarization)
//! before the real pipeline ever starts.

use chaffee_common::{IngestError, SourceType, VideoDescriptor};
use chaffee_fetcher::{AudioFetcher, YtDlpFetcher};
use chaffee_voice::{VoiceEmbedder, VoiceProfile};
use std::path::Path;

/// `(source_id, url, approximate duration seconds)` for recordings known
/// to contain only the primary speaker, used to seed the voice profile.
/// Roughly three hours total across ten clips.
const SEED_RECORDINGS: &[(&str, &str, f64)] = &[
    ("seed-001", "https://www.youtube.com/watch?v=chaffee-seed-01", 1200.0),
    ("seed-002", "https://www.youtube.com/watch?v=chaffee-seed-02", 1400.0),
    ("seed-003", "https://www.youtube.com/watch?v=chaffee-seed-03", 900.0),
    ("seed-004", "https://www.youtube.com/watch?v=chaffee-seed-04", 1100.0),
    ("seed-005", "https://www.youtube.com/watch?v=chaffee-seed-05", 1500.0),
    ("seed-006", "https://www.youtube.com/watch?v=chaffee-seed-06", 1000.0),
    ("seed-007", "https://www.youtube.com/watch?v=chaffee-seed-07", 1300.0),
    ("seed-008", "https://www.youtube.com/watch?v=chaffee-seed-08", 800.0),
    ("seed-009", "https://www.youtube.com/watch?v=chaffee-seed-09", 950.0),
    ("seed-010", "https://www.youtube.com/watch?v=chaffee-seed-10", 1250.0),
];

fn seed_descriptors() -> Vec<VideoDescriptor> {
    SEED_RECORDINGS
        .iter()
        .map(|&(id, url, duration_s)| VideoDescriptor {
            source_id: id.to_string(),
            title: format!("voice profile seed {id}"),
            description: String::new(),
            url: url.to_string(),
            source_type: SourceType::Youtube,
            duration_s,
            published_at: chrono::Utc::now(),
        })
        .collect()
}

/// Loads the existing profile at `voices_dir`, or builds one from
/// [`SEED_RECORDINGS`] if none exists yet.
pub fn run_if_needed(
    voices_dir: &Path,
    scratch_dir: &Path,
    voice: &VoiceEmbedder,
) -> Result<VoiceProfile, IngestError> {
    if VoiceProfile::exists(voices_dir) {
        return VoiceProfile::load(voices_dir);
    }

    tracing::info!(dir = %voices_dir.display(), "no voice profile found, bootstrapping from seed recordings");

    let fetcher = YtDlpFetcher::new();
    let mut contributions: Vec<(String, Vec<f32>)> = Vec::new();

    for descriptor in seed_descriptors() {
        match fetch_and_embed(&fetcher, &descriptor, scratch_dir, voice) {
            Ok(embedding) => contributions.push((descriptor.source_id.clone(), embedding)),
            Err(e) => {
                tracing::warn!(source_id = descriptor.source_id, error = %e, "seed recording failed, skipping");
            }
        }
    }

    if contributions.is_empty() {
        return Err(IngestError::Config(
            "bootstrap failed: no seed recording produced a voice embedding".to_string(),
        ));
    }

    tracing::info!(count = contributions.len(), "voice profile bootstrapped");
    VoiceProfile::rebuild(voices_dir, voice.model_id(), &contributions)
}

fn fetch_and_embed(
    fetcher: &YtDlpFetcher,
    descriptor: &VideoDescriptor,
    scratch_dir: &Path,
    voice: &VoiceEmbedder,
) -> Result<Vec<f32>, IngestError> {
    let fetched = fetcher.fetch(descriptor, scratch_dir)?;
    let pcm = chaffee_audio::load_mono_pcm_16k(&fetched.path)?;
    let duration_s = pcm.len() as f64 / f64::from(chaffee_audio::TARGET_SAMPLE_RATE);

    let matrix = voice.embed_batch(&pcm, &[(0.0, duration_s)], &descriptor.source_id)?;
    let embedding = matrix.row(0).to_vec();

    let _ = std::fs::remove_file(&fetched.path);
    Ok(embedding)
}
