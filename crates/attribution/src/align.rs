//! Step 1: split ASR segments at turn boundaries using word timestamps.

use chaffee_asr::{AsrSegment, Word};
use chaffee_diarize::Turn;

/// Splits every ASR segment that crosses a turn boundary into one piece
/// per side of the boundary. Quality metadata (`avg_logprob`,
/// `compression_ratio`, `no_speech_prob`) is copied to every piece
/// unmodified — it describes the whole recognition window, not a time
/// slice of it.
pub fn split_at_turn_boundaries(segments: &[AsrSegment], turns: &[Turn]) -> Vec<AsrSegment> {
    let boundaries = turn_boundaries(turns);
    let mut out = Vec::with_capacity(segments.len());
    for seg in segments {
        out.extend(split_segment(seg, &boundaries));
    }
    out
}

fn turn_boundaries(turns: &[Turn]) -> Vec<f64> {
    let mut starts: Vec<f64> = turns.iter().skip(1).map(|t| t.start_s).collect();
    starts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    starts.dedup();
    starts
}

fn split_segment(seg: &AsrSegment, boundaries: &[f64]) -> Vec<AsrSegment> {
    let relevant: Vec<f64> = boundaries
        .iter()
        .copied()
        .filter(|&b| b > seg.start_s && b < seg.end_s)
        .collect();

    if relevant.is_empty() || seg.words.is_empty() {
        return vec![seg.clone()];
    }

    let mut pieces = Vec::with_capacity(relevant.len() + 1);
    let mut word_start = 0;
    let mut piece_start_s = seg.start_s;

    for &boundary in &relevant {
        let split_at = seg.words[word_start..]
            .iter()
            .position(|w| w.start_s >= boundary)
            .map_or(seg.words.len(), |i| word_start + i);

        if split_at > word_start {
            pieces.push(build_piece(seg, &seg.words[word_start..split_at], piece_start_s, boundary));
            piece_start_s = boundary;
            word_start = split_at;
        }
    }

    if word_start < seg.words.len() {
        pieces.push(build_piece(seg, &seg.words[word_start..], piece_start_s, seg.end_s));
    }

    if pieces.is_empty() {
        vec![seg.clone()]
    } else {
        pieces
    }
}

fn build_piece(seg: &AsrSegment, words: &[Word], start_s: f64, end_s: f64) -> AsrSegment {
    let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
    AsrSegment {
        start_s,
        end_s,
        text,
        avg_logprob: seg.avg_logprob,
        compression_ratio: seg.compression_ratio,
        no_speech_prob: seg.no_speech_prob,
        words: words.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(start: f64, end: f64, text: &str) -> Word {
        Word {
            start_s: start,
            end_s: end,
            text: text.to_string(),
        }
    }

    fn segment(start: f64, end: f64, words: Vec<Word>) -> AsrSegment {
        let text = words.iter().map(|w| w.text.clone()).collect::<Vec<_>>().join(" ");
        AsrSegment {
            start_s: start,
            end_s: end,
            text,
            avg_logprob: -0.2,
            compression_ratio: 1.5,
            no_speech_prob: 0.01,
            words,
        }
    }

    #[test]
    fn segment_not_crossing_a_boundary_is_unchanged() {
        let seg = segment(0.0, 5.0, vec![word(0.0, 1.0, "hi"), word(1.0, 2.0, "there")]);
        let turns = vec![Turn {
            start_s: 0.0,
            end_s: 10.0,
            cluster_id: 0,
        }];
        let out = split_at_turn_boundaries(&[seg], &turns);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn segment_crossing_a_boundary_splits_in_two() {
        let seg = segment(
            0.0,
            5.0,
            vec![
                word(0.0, 1.0, "hello"),
                word(1.0, 2.0, "world"),
                word(3.0, 4.0, "goodbye"),
                word(4.0, 5.0, "now"),
            ],
        );
        let turns = vec![
            Turn {
                start_s: 0.0,
                end_s: 2.5,
                cluster_id: 0,
            },
            Turn {
                start_s: 2.5,
                end_s: 5.0,
                cluster_id: 1,
            },
        ];
        let out = split_at_turn_boundaries(&[seg], &turns);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "hello world");
        assert_eq!(out[1].text, "goodbye now");
        assert_eq!(out[1].start_s, 2.5);
    }
}
