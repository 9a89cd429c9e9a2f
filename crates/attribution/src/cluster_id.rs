//! Steps 3 and 4: cluster-level speaker ID, with a per-segment fallback
//! for clusters whose probed similarities disagree too much to trust a
//! single cluster-wide label.

use crate::pool::{span_key, EmbeddedSpan, SpanKey};
use chaffee_common::IngestError;
use chaffee_voice::{VoiceEmbedder, VoiceProfile};
use std::collections::HashMap;

pub struct ProbeResult {
    pub sim_mean: f32,
    pub sim_min: f32,
    pub sim_max: f32,
    pub embedded: Vec<EmbeddedSpan>,
}

/// Embeds `spans`, preferring cache hits over a fresh (batched) forward
/// pass for whatever misses. Returns one embedding per input span, in
/// the same order.
pub fn embed_spans_with_cache(
    spans: &[(f64, f64)],
    pcm: &[f32],
    cache: &HashMap<SpanKey, Vec<f32>>,
    voice: &VoiceEmbedder,
    source_id: &str,
) -> Result<Vec<Vec<f32>>, IngestError> {
    let mut resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(spans.len());
    let mut misses = Vec::new();

    for &(start, end) in spans {
        if let Some(cached) = cache.get(&span_key(start, end)) {
            resolved.push(Some(cached.clone()));
        } else {
            resolved.push(None);
            misses.push((start, end));
        }
    }

    if !misses.is_empty() {
        let embedded = voice.embed_batch(pcm, &misses, source_id)?;
        let mut rows = embedded.axis_iter(ndarray::Axis(0));
        for slot in &mut resolved {
            if slot.is_none() {
                let row = rows.next().expect("one row per miss");
                *slot = Some(row.to_vec());
            }
        }
    }

    Ok(resolved.into_iter().map(|o| o.expect("every span resolved")).collect())
}

/// Step 3: probes up to `k` spans from `turns`, computing per-span
/// similarity to the primary voice profile.
pub fn probe_cluster(
    turns: &[(f64, f64)],
    pcm: &[f32],
    cache: &HashMap<SpanKey, Vec<f32>>,
    voice: &VoiceEmbedder,
    profile: &VoiceProfile,
    k: usize,
    source_id: &str,
) -> Result<ProbeResult, IngestError> {
    let sample = sample_spans(turns, k);
    let embeddings = embed_spans_with_cache(&sample, pcm, cache, voice, source_id)?;

    let sims: Vec<f32> = embeddings.iter().map(|e| profile.similarity(e)).collect();
    let sim_mean = sims.iter().sum::<f32>() / sims.len().max(1) as f32;
    let sim_min = sims.iter().copied().fold(f32::INFINITY, f32::min);
    let sim_max = sims.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let embedded = sample
        .iter()
        .zip(embeddings.iter())
        .map(|(&(start, end), emb)| EmbeddedSpan {
            start_s: start,
            end_s: end,
            embedding: emb.clone(),
        })
        .collect();

    Ok(ProbeResult {
        sim_mean,
        sim_min: if sim_min.is_finite() { sim_min } else { 0.0 },
        sim_max: if sim_max.is_finite() { sim_max } else { 0.0 },
        embedded,
    })
}

/// Takes an evenly-spaced subset of `turns`, capped at `k`.
fn sample_spans(turns: &[(f64, f64)], k: usize) -> Vec<(f64, f64)> {
    if turns.len() <= k {
        return turns.to_vec();
    }
    (0..k)
        .map(|i| turns[i * turns.len() / k])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_spans_caps_at_k() {
        let turns: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, i as f64 + 1.0)).collect();
        let sampled = sample_spans(&turns, 5);
        assert_eq!(sampled.len(), 5);
    }

    #[test]
    fn sample_spans_returns_all_when_fewer_than_k() {
        let turns = vec![(0.0, 1.0), (1.0, 2.0)];
        let sampled = sample_spans(&turns, 10);
        assert_eq!(sampled.len(), 2);
    }
}
