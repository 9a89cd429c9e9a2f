//! Step 5: temporal smoothing of isolated short segments. A brief
//! interjection sandwiched between two same-labeled neighbors of close
//! confidence is almost always a misattributed aside, not a real
//! speaker change.

use chaffee_common::Segment;

const MAX_SMOOTHED_DURATION_S: f64 = 60.0;
const CONFIDENCE_MARGIN: f32 = 0.05;

/// Mutates `segments` in place. Segments are assumed sorted by
/// `start_s`. The first and last segments are never touched.
pub fn smooth(segments: &mut [Segment]) {
    if segments.len() < 3 {
        return;
    }

    let mut relabel = Vec::new();
    for i in 1..segments.len() - 1 {
        let (prev, cur, next) = (&segments[i - 1], &segments[i], &segments[i + 1]);
        let duration = cur.end_s - cur.start_s;

        if duration >= MAX_SMOOTHED_DURATION_S {
            continue;
        }
        if prev.speaker_label != next.speaker_label || cur.speaker_label == prev.speaker_label {
            continue;
        }
        let margin_prev = (cur.speaker_confidence - prev.speaker_confidence).abs();
        let margin_next = (cur.speaker_confidence - next.speaker_confidence).abs();
        if margin_prev <= CONFIDENCE_MARGIN && margin_next <= CONFIDENCE_MARGIN {
            relabel.push((i, prev.speaker_label));
        }
    }

    for (i, label) in relabel {
        segments[i].speaker_label = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaffee_common::{AsrQuality, SpeakerLabel};

    fn seg(start: f64, end: f64, label: SpeakerLabel, confidence: f32) -> Segment {
        Segment {
            start_s: start,
            end_s: end,
            text: "x".to_string(),
            speaker_label: label,
            speaker_confidence: confidence,
            text_embedding: vec![],
            voice_embedding: None,
            asr_quality: AsrQuality {
                avg_logprob: -0.1,
                compression_ratio: 1.0,
                no_speech_prob: 0.01,
            },
        }
    }

    #[test]
    fn relabels_short_isolated_segment_between_matching_neighbors() {
        let mut segs = vec![
            seg(0.0, 10.0, SpeakerLabel::Primary, 0.8),
            seg(10.0, 15.0, SpeakerLabel::Guest, 0.78),
            seg(15.0, 25.0, SpeakerLabel::Primary, 0.81),
        ];
        smooth(&mut segs);
        assert_eq!(segs[1].speaker_label, SpeakerLabel::Primary);
    }

    #[test]
    fn leaves_long_segment_alone_even_if_isolated() {
        let mut segs = vec![
            seg(0.0, 10.0, SpeakerLabel::Primary, 0.8),
            seg(10.0, 80.0, SpeakerLabel::Guest, 0.78),
            seg(80.0, 90.0, SpeakerLabel::Primary, 0.81),
        ];
        smooth(&mut segs);
        assert_eq!(segs[1].speaker_label, SpeakerLabel::Guest);
    }

    #[test]
    fn never_smooths_first_or_last_segment() {
        let mut segs = vec![
            seg(0.0, 5.0, SpeakerLabel::Guest, 0.8),
            seg(5.0, 15.0, SpeakerLabel::Primary, 0.8),
            seg(15.0, 20.0, SpeakerLabel::Guest, 0.8),
        ];
        smooth(&mut segs);
        assert_eq!(segs[0].speaker_label, SpeakerLabel::Guest);
        assert_eq!(segs[2].speaker_label, SpeakerLabel::Guest);
    }

    #[test]
    fn large_confidence_margin_blocks_smoothing() {
        let mut segs = vec![
            seg(0.0, 10.0, SpeakerLabel::Primary, 0.9),
            seg(10.0, 15.0, SpeakerLabel::Guest, 0.5),
            seg(15.0, 25.0, SpeakerLabel::Primary, 0.9),
        ];
        smooth(&mut segs);
        assert_eq!(segs[1].speaker_label, SpeakerLabel::Guest);
    }
}
