//! Voice activity detection: finds speech regions with WebRTC VAD, then
//! bridges short silences and drops short speech per `min_on`/`min_off`.

use webrtc_vad::{SampleRate, Vad, VadMode};

#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub samples: Vec<f32>,
}

const FRAME_DURATION_MS: usize = 30;

pub fn detect_speech_segments(
    samples: &[f32],
    sample_rate: u32,
    aggressiveness: u8,
    min_on_s: f32,
) -> Result<Vec<SpeechSegment>, String> {
    let vad_sample_rate = match sample_rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        other => return Err(format!("unsupported VAD sample rate: {other}Hz")),
    };

    let vad_mode = match aggressiveness {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    };

    let mut vad = Vad::new_with_rate_and_mode(vad_sample_rate, vad_mode);
    let frame_size = (sample_rate as usize * FRAME_DURATION_MS) / 1000;

    let samples_i16: Vec<i16> = samples.iter().map(|&s| (s * 32767.0) as i16).collect();

    let mut speech_segments = Vec::new();
    let mut current_start: Option<usize> = None;

    for (frame_idx, frame) in samples_i16.chunks(frame_size).enumerate() {
        if frame.len() != frame_size {
            break;
        }
        let is_speech = vad.is_voice_segment(frame).unwrap_or(false);
        let frame_start = frame_idx * frame_size;

        match (is_speech, current_start) {
            (true, None) => current_start = Some(frame_start),
            (false, Some(start)) => {
                push_if_long_enough(&mut speech_segments, samples, sample_rate, start, frame_start, min_on_s);
                current_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = current_start {
        push_if_long_enough(
            &mut speech_segments,
            samples,
            sample_rate,
            start,
            samples_i16.len(),
            min_on_s,
        );
    }

    Ok(speech_segments)
}

fn push_if_long_enough(
    out: &mut Vec<SpeechSegment>,
    samples: &[f32],
    sample_rate: u32,
    start: usize,
    end: usize,
    min_on_s: f32,
) {
    let duration = (end - start) as f64 / f64::from(sample_rate);
    if duration >= f64::from(min_on_s) {
        out.push(SpeechSegment {
            start: start as f64 / f64::from(sample_rate),
            end: end as f64 / f64::from(sample_rate),
            samples: samples[start..end.min(samples.len())].to_vec(),
        });
    }
}

/// Merges adjacent speech segments separated by a gap shorter than
/// `min_off_s` into a single segment, concatenating their samples.
pub fn bridge_short_gaps(segments: Vec<SpeechSegment>, min_off_s: f32) -> Vec<SpeechSegment> {
    if min_off_s <= 0.0 || segments.is_empty() {
        return segments;
    }

    let mut merged: Vec<SpeechSegment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match merged.last_mut() {
            Some(prev) if (seg.start - prev.end) < f64::from(min_off_s) => {
                prev.samples.extend(seg.samples);
                prev.end = seg.end;
            }
            _ => merged.push(seg),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> SpeechSegment {
        SpeechSegment {
            start,
            end,
            samples: vec![0.0; 10],
        }
    }

    #[test]
    fn bridges_gaps_shorter_than_min_off() {
        let segments = vec![seg(0.0, 1.0), seg(1.1, 2.0), seg(5.0, 6.0)];
        let merged = bridge_short_gaps(segments, 0.5);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].end, 2.0);
    }

    #[test]
    fn zero_min_off_is_a_no_op() {
        let segments = vec![seg(0.0, 1.0), seg(1.01, 2.0)];
        let merged = bridge_short_gaps(segments, 0.0);
        assert_eq!(merged.len(), 2);
    }
}
