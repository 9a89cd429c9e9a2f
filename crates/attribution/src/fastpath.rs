//! Step 2: the monologue fast path. Probes a handful of evenly spaced
//! spans against the primary voice profile; if the average similarity
//! clears the threshold, every segment is labeled primary without ever
//! running the clusterer.
//!
//! The spec calls for a "small random sample of spans"; sampling is
//! deterministic here (evenly spaced across the recording) so a fast-path
//! decision is reproducible between runs on the same audio.

use chaffee_common::IngestError;
use chaffee_voice::{VoiceEmbedder, VoiceProfile};

const PROBE_SPAN_S: f64 = 5.0;

pub fn probe_similarity(
    voice: &VoiceEmbedder,
    profile: &VoiceProfile,
    pcm: &[f32],
    duration_s: f64,
    k: usize,
    source_id: &str,
) -> Result<f32, IngestError> {
    if duration_s <= 0.0 || k == 0 {
        return Ok(0.0);
    }

    let spans = evenly_spaced_spans(duration_s, k);
    let embeddings = voice.embed_batch(pcm, &spans, source_id)?;

    if embeddings.nrows() == 0 {
        return Ok(0.0);
    }

    let sims: Vec<f32> = embeddings
        .axis_iter(ndarray::Axis(0))
        .map(|row| profile.similarity(row.as_slice().unwrap_or(&[])))
        .collect();
    Ok(sims.iter().sum::<f32>() / sims.len() as f32)
}

fn evenly_spaced_spans(duration_s: f64, k: usize) -> Vec<(f64, f64)> {
    let n = k.max(1);
    (0..n)
        .map(|i| {
            let center = duration_s * (i as f64 + 0.5) / n as f64;
            ((center - PROBE_SPAN_S / 2.0).max(0.0), (center + PROBE_SPAN_S / 2.0).min(duration_s))
        })
        .filter(|(s, e)| e > s)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_probes_nothing() {
        let spans = evenly_spaced_spans(0.0, 10);
        assert!(spans.is_empty());
    }

    #[test]
    fn spans_stay_within_duration_bounds() {
        let spans = evenly_spaced_spans(20.0, 10);
        for (start, end) in &spans {
            assert!(*start >= 0.0);
            assert!(*end <= 20.0);
        }
    }
}
