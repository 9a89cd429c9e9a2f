//! Per-video stage pipeline: the strict C4 -> C5 -> C6 -> C9 -> C10 -> C11
//! order run serially on one ASR worker thread (spec §4.12 phase 3, §5
//! ordering guarantees). Everything in here is process-wide singletons
//! shared across videos; only the audio buffer and its derived segments
//! are per-video state.

use crate::metrics::{duration_secs, VideoMetrics};
use chaffee_attribution::{AttributionConfig, Attributor};
use chaffee_common::{IngestError, VideoDescriptor};
use chaffee_diarize::{fast_path_turn, Diarizer, SpeakerPriors, Turn};
use chaffee_storage::SegmentsDatabase;
use chaffee_textembed::TextEmbedder;
use chaffee_voice::{VoiceEmbedder, VoiceProfile};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use uuid::Uuid;

/// The process-wide model singletons a pipeline run needs. Cloning is
/// cheap (every field is an `Arc`), so a fresh clone is handed to each
/// timed/cancellable video attempt.
#[derive(Clone)]
pub struct PipelineResources {
    pub asr: Arc<chaffee_asr::AsrEngine>,
    pub diarizer: Arc<Diarizer>,
    pub voice: Arc<VoiceEmbedder>,
    pub profile: Arc<VoiceProfile>,
    pub textembed: Arc<TextEmbedder>,
    pub db: Arc<dyn SegmentsDatabase>,
    pub attribution_config: AttributionConfig,
}

pub struct VideoOutcome {
    pub metrics: VideoMetrics,
}

/// Runs C4 through C11 for one already-fetched video, on the calling
/// thread. `handle` bridges the otherwise-synchronous pipeline into the
/// storage crate's async client.
pub fn process_video(
    resources: &PipelineResources,
    handle: &Handle,
    descriptor: &VideoDescriptor,
    audio_path: &Path,
    source_uuid: Uuid,
) -> Result<VideoOutcome, IngestError> {
    let total_start = Instant::now();
    let source_id = descriptor.source_id.as_str();

    // C4: audio loading.
    let pcm = chaffee_audio::load_mono_pcm_16k(audio_path)?;
    let duration_s = (pcm.len() as f64 / f64::from(chaffee_audio::TARGET_SAMPLE_RATE)).max(descriptor.duration_s);

    let voice_cache = handle
        .block_on(resources.db.get_cached_voice_embeddings(source_id))
        .map_err(|e| IngestError::VoiceExtractFailed {
            source_id: source_id.to_string(),
            reason: e.to_string(),
        })?;

    // C5: transcription.
    let asr_start = Instant::now();
    let asr_segments = resources.asr.transcribe(&pcm, source_id)?;
    let asr_wall_s = duration_secs(asr_start.elapsed());

    // C9 setup: the attributor's own fast-path probe decides whether
    // diarization can be skipped at all (spec §4.6), so it runs ahead of
    // C6 rather than after it.
    let attributor = Attributor::new(resources.attribution_config.clone(), resources.voice.as_ref(), resources.profile.as_ref());
    let fast_path_similarity = attributor.probe_fast_path(&pcm, duration_s, source_id)?;

    // C6: diarization, skipped only when the probe above actually clears
    // chaffee_min_sim, not merely because the fast-path flags are
    // enabled; degrades to one synthetic turn on failure (§7,
    // DiarizerFailed) rather than aborting the video.
    let diarize_start = Instant::now();
    let turns = resolve_turns(resources, descriptor, &pcm, duration_s, source_id, fast_path_similarity);
    let diarize_wall_s = duration_secs(diarize_start.elapsed());

    // C9: speaker attribution, reusing the probe above so its labelling
    // decision agrees with the diarizer-skip decision.
    let voice_embed_start = Instant::now();
    let outcome = attributor.attribute(&asr_segments, &turns, &pcm, duration_s, &voice_cache, source_id, fast_path_similarity)?;
    let voice_embed_wall_s = duration_secs(voice_embed_start.elapsed());

    // C10: text embedding.
    let text_embed_start = Instant::now();
    let texts: Vec<String> = outcome.segments.iter().map(|s| s.text.clone()).collect();
    let embeddings = resources.textembed.encode(&texts, source_id)?;
    let text_embed_wall_s = duration_secs(text_embed_start.elapsed());

    let mut segments = outcome.segments;
    for (seg, row) in segments.iter_mut().zip(embeddings.outer_iter()) {
        seg.text_embedding = row.to_vec();
    }

    let (cache_hits, cache_misses) = count_cache_usage(&segments, &voice_cache);

    // C11: persistence, one transaction for the whole source.
    let db_start = Instant::now();
    handle
        .block_on(resources.db.insert_segments(source_uuid, &segments))
        .map_err(|e| IngestError::TransactionFailed {
            source_id: source_id.to_string(),
            reason: e.to_string(),
        })?;
    let db_wall_s = duration_secs(db_start.elapsed());

    let metrics = VideoMetrics {
        source_id: source_id.to_string(),
        audio_duration_s: duration_s,
        asr_wall_s,
        diarize_wall_s,
        voice_embed_wall_s,
        text_embed_wall_s,
        db_wall_s,
        total_wall_s: duration_secs(total_start.elapsed()),
        fast_path_used: outcome.fast_path_used,
        heterogeneous_cluster_count: outcome.heterogeneous_cluster_count,
        segments_written: segments.len(),
        voice_cache_hits: cache_hits,
        voice_cache_misses: cache_misses,
    };

    Ok(VideoOutcome { metrics })
}

fn resolve_turns(
    resources: &PipelineResources,
    descriptor: &VideoDescriptor,
    pcm: &[f32],
    duration_s: f64,
    source_id: &str,
    fast_path_similarity: Option<f32>,
) -> Vec<Turn> {
    if fast_path_similarity.is_some_and(|sim| sim >= resources.attribution_config.chaffee_min_sim) {
        return vec![fast_path_turn(duration_s)];
    }

    let priors = if descriptor.looks_like_interview() {
        SpeakerPriors {
            min_speakers: Some(2),
            max_speakers: Some(2),
        }
    } else {
        SpeakerPriors::default()
    };

    match resources.diarizer.diarize(pcm, priors, source_id) {
        Ok(turns) if !turns.is_empty() => turns,
        Ok(_) => vec![fast_path_turn(duration_s)],
        Err(e) => {
            tracing::warn!(source_id, error = %e, "diarization failed, degrading to one synthetic turn");
            vec![fast_path_turn(duration_s)]
        }
    }
}

fn count_cache_usage(
    segments: &[chaffee_common::Segment],
    cache: &std::collections::HashMap<(i64, i64), Vec<f32>>,
) -> (usize, usize) {
    let mut hits = 0usize;
    let mut misses = 0usize;
    for seg in segments {
        let key = ((seg.start_s * 1000.0).round() as i64, (seg.end_s * 1000.0).round() as i64);
        if cache.contains_key(&key) {
            hits += 1;
        } else {
            misses += 1;
        }
    }
    (hits, misses)
}
