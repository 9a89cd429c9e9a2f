//! Speaker attributor (spec §4.9, component C9) — the heart of
//! correctness. Turns aligned ASR segments and diarized turns into final
//! speaker labels, running the monologue fast path when it applies and
//! falling back to per-segment identification for clusters whose probed
//! similarity is too inconsistent to trust as a whole.

mod align;
mod cluster_id;
mod fastpath;
mod pool;
mod smoothing;

use chaffee_asr::AsrSegment;
use chaffee_common::{AsrQuality, IngestError, Segment, SpeakerLabel};
use chaffee_diarize::Turn;
use chaffee_voice::{VoiceEmbedder, VoiceProfile};
use pool::{span_key, EmbeddedSpan, SpanKey};
use std::collections::HashMap;

const NEAR_WINDOW_S: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct AttributionConfig {
    pub assume_monologue: bool,
    pub fast_path_enabled: bool,
    pub chaffee_min_sim: f32,
    pub variance_probe_k: usize,
    pub variance_split_range: f32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            assume_monologue: true,
            fast_path_enabled: true,
            chaffee_min_sim: 0.62,
            variance_probe_k: 10,
            variance_split_range: 0.5,
        }
    }
}

pub struct AttributionOutcome {
    pub segments: Vec<Segment>,
    pub fast_path_used: bool,
    pub heterogeneous_cluster_count: usize,
}

pub struct Attributor<'a> {
    config: AttributionConfig,
    voice: &'a VoiceEmbedder,
    profile: &'a VoiceProfile,
}

impl<'a> Attributor<'a> {
    #[must_use]
    pub fn new(config: AttributionConfig, voice: &'a VoiceEmbedder, profile: &'a VoiceProfile) -> Self {
        Self { config, voice, profile }
    }

    /// Runs the monologue fast-path probe (§4.9 step 2) on its own,
    /// ahead of the rest of attribution, so a caller can decide whether
    /// diarization is needed at all before running it (§4.6: diarization
    /// is only skipped once this probe actually clears `chaffee_min_sim`,
    /// not merely because the fast-path flags are enabled). Returns
    /// `None` when the fast path isn't enabled/assumed, in which case the
    /// caller must diarize unconditionally.
    pub fn probe_fast_path(&self, pcm: &[f32], duration_s: f64, source_id: &str) -> Result<Option<f32>, IngestError> {
        if !(self.config.fast_path_enabled && self.config.assume_monologue) {
            return Ok(None);
        }
        let sim = fastpath::probe_similarity(self.voice, self.profile, pcm, duration_s, self.config.variance_probe_k, source_id)?;
        Ok(Some(sim))
    }

    /// `fast_path_similarity` should be the result of a prior
    /// [`Self::probe_fast_path`] call so the diarizer-skip decision and
    /// this labelling decision agree; pass `None` to have this probe the
    /// fast path itself instead.
    pub fn attribute(
        &self,
        asr_segments: &[AsrSegment],
        turns: &[Turn],
        pcm: &[f32],
        duration_s: f64,
        voice_cache: &HashMap<SpanKey, Vec<f32>>,
        source_id: &str,
        fast_path_similarity: Option<f32>,
    ) -> Result<AttributionOutcome, IngestError> {
        let aligned = align::split_at_turn_boundaries(asr_segments, turns);

        if self.config.fast_path_enabled && self.config.assume_monologue {
            let sim = match fast_path_similarity {
                Some(sim) => sim,
                None => fastpath::probe_similarity(
                    self.voice,
                    self.profile,
                    pcm,
                    duration_s,
                    self.config.variance_probe_k,
                    source_id,
                )?,
            };
            if sim >= self.config.chaffee_min_sim {
                tracing::info!(source_id, similarity = sim, "monologue fast path taken");
                let segments = aligned
                    .iter()
                    .map(|seg| to_segment(seg, SpeakerLabel::Primary, sim))
                    .collect();
                return Ok(AttributionOutcome {
                    segments,
                    fast_path_used: true,
                    heterogeneous_cluster_count: 0,
                });
            }
        }

        match self.attribute_by_clusters(&aligned, turns, pcm, voice_cache, source_id) {
            Ok((segments, heterogeneous_cluster_count)) => Ok(AttributionOutcome {
                segments,
                fast_path_used: false,
                heterogeneous_cluster_count,
            }),
            Err(e) => {
                tracing::warn!(source_id, error = %e, "voice embedder failed, degrading all segments to unknown");
                let segments = aligned.iter().map(|seg| to_segment(seg, SpeakerLabel::Unknown, 0.0)).collect();
                Ok(AttributionOutcome {
                    segments,
                    fast_path_used: false,
                    heterogeneous_cluster_count: 0,
                })
            }
        }
    }

    fn attribute_by_clusters(
        &self,
        aligned: &[AsrSegment],
        turns: &[Turn],
        pcm: &[f32],
        voice_cache: &HashMap<SpanKey, Vec<f32>>,
        source_id: &str,
    ) -> Result<(Vec<Segment>, usize), IngestError> {
        let cluster_ids = assign_cluster_ids(aligned, turns);
        let mut pool: Vec<EmbeddedSpan> = Vec::new();
        let mut label_for: HashMap<usize, (SpeakerLabel, f32)> = HashMap::new();
        let mut heterogeneous: Vec<usize> = Vec::new();

        let mut by_cluster: HashMap<usize, Vec<(f64, f64)>> = HashMap::new();
        for (seg, &cid) in aligned.iter().zip(cluster_ids.iter()) {
            by_cluster.entry(cid).or_default().push((seg.start_s, seg.end_s));
        }
        let turns_by_cluster: HashMap<usize, Vec<(f64, f64)>> = {
            let mut m: HashMap<usize, Vec<(f64, f64)>> = HashMap::new();
            for t in turns {
                m.entry(t.cluster_id).or_default().push((t.start_s, t.end_s));
            }
            m
        };

        for (&cid, turn_spans) in &turns_by_cluster {
            let probe = cluster_id::probe_cluster(
                turn_spans,
                pcm,
                voice_cache,
                self.voice,
                self.profile,
                self.config.variance_probe_k,
                source_id,
            )?;
            pool.extend(probe.embedded.iter().cloned());

            if (probe.sim_max - probe.sim_min) > self.config.variance_split_range {
                heterogeneous.push(cid);
            } else {
                let label = if probe.sim_mean >= self.config.chaffee_min_sim {
                    SpeakerLabel::Primary
                } else {
                    SpeakerLabel::Guest
                };
                label_for.insert(cid, (label, probe.sim_mean));
            }
        }

        let mut per_segment_label: HashMap<usize, (SpeakerLabel, f32)> = HashMap::new();
        for cid in heterogeneous {
            let Some(spans) = by_cluster.get(&cid) else { continue };
            let embeddings = cluster_id::embed_spans_with_cache(spans, pcm, voice_cache, self.voice, source_id)?;
            for (idx, ((start, end), emb)) in spans.iter().zip(embeddings.iter()).enumerate() {
                let sim = self.profile.similarity(emb);
                let label = if sim >= self.config.chaffee_min_sim {
                    SpeakerLabel::Primary
                } else {
                    SpeakerLabel::Guest
                };
                pool.push(EmbeddedSpan {
                    start_s: *start,
                    end_s: *end,
                    embedding: emb.clone(),
                });
                per_segment_label.insert(segment_key(cid, idx), (label, sim));
            }
        }

        let mut segments = Vec::with_capacity(aligned.len());
        let mut heterogeneous_idx: HashMap<usize, usize> = HashMap::new();
        for (seg, &cid) in aligned.iter().zip(cluster_ids.iter()) {
            let (label, confidence) = if let Some(&(label, confidence)) = label_for.get(&cid) {
                (label, confidence)
            } else {
                let idx = heterogeneous_idx.entry(cid).or_insert(0);
                let key = segment_key(cid, *idx);
                *idx += 1;
                per_segment_label.get(&key).copied().unwrap_or((SpeakerLabel::Unknown, 0.0))
            };
            segments.push(to_segment(seg, label, confidence));
        }

        let heterogeneous_cluster_count = heterogeneous_idx.len();
        smoothing::smooth(&mut segments);
        attach_voice_embeddings(&mut segments, &pool, voice_cache);
        Ok((segments, heterogeneous_cluster_count))
    }
}

fn segment_key(cluster_id: usize, idx: usize) -> usize {
    cluster_id * 1_000_003 + idx
}

fn assign_cluster_ids(segments: &[AsrSegment], turns: &[Turn]) -> Vec<usize> {
    segments
        .iter()
        .map(|seg| {
            let mid = (seg.start_s + seg.end_s) / 2.0;
            find_covering_turn(turns, mid)
                .or_else(|| find_nearest_turn(turns, mid))
                .map_or(0, |t| t.cluster_id)
        })
        .collect()
}

fn find_covering_turn(turns: &[Turn], t: f64) -> Option<&Turn> {
    turns.iter().find(|turn| t >= turn.start_s && t < turn.end_s)
}

fn find_nearest_turn(turns: &[Turn], t: f64) -> Option<&Turn> {
    turns.iter().min_by(|a, b| {
        let da = dist_to_turn(a, t);
        let db = dist_to_turn(b, t);
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn dist_to_turn(turn: &Turn, t: f64) -> f64 {
    if t < turn.start_s {
        turn.start_s - t
    } else if t > turn.end_s {
        t - turn.end_s
    } else {
        0.0
    }
}

fn to_segment(seg: &AsrSegment, label: SpeakerLabel, confidence: f32) -> Segment {
    Segment {
        start_s: seg.start_s,
        end_s: seg.end_s,
        text: seg.text.clone(),
        speaker_label: label,
        speaker_confidence: confidence,
        text_embedding: Vec::new(),
        voice_embedding: None,
        asr_quality: AsrQuality {
            avg_logprob: seg.avg_logprob,
            compression_ratio: seg.compression_ratio,
            no_speech_prob: seg.no_speech_prob,
        },
    }
}

fn attach_voice_embeddings(segments: &mut [Segment], pool: &[EmbeddedSpan], cache: &HashMap<SpanKey, Vec<f32>>) {
    let mut full_pool: Vec<EmbeddedSpan> = pool.to_vec();
    for (&(start_ms, end_ms), emb) in cache {
        full_pool.push(EmbeddedSpan {
            start_s: start_ms as f64 / 1000.0,
            end_s: end_ms as f64 / 1000.0,
            embedding: emb.clone(),
        });
    }

    for seg in segments {
        if let Some(cached) = cache.get(&span_key(seg.start_s, seg.end_s)) {
            seg.voice_embedding = Some(cached.clone());
            continue;
        }
        seg.voice_embedding = pool::attach(&full_pool, seg.start_s, seg.end_s, NEAR_WINDOW_S);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_covering_turn_matches_containing_window() {
        let turns = vec![
            Turn {
                start_s: 0.0,
                end_s: 5.0,
                cluster_id: 0,
            },
            Turn {
                start_s: 5.0,
                end_s: 10.0,
                cluster_id: 1,
            },
        ];
        assert_eq!(find_covering_turn(&turns, 7.0).unwrap().cluster_id, 1);
    }

    #[test]
    fn find_nearest_turn_used_for_gaps() {
        let turns = vec![
            Turn {
                start_s: 0.0,
                end_s: 5.0,
                cluster_id: 0,
            },
            Turn {
                start_s: 20.0,
                end_s: 25.0,
                cluster_id: 1,
            },
        ];
        assert_eq!(find_nearest_turn(&turns, 6.0).unwrap().cluster_id, 0);
    }
}
