//! Per-span log-mel features feeding the speaker embedding model. Same
//! filterbank math as the diarizer's; kept as a separate copy because the
//! two crates pad and batch spans differently (fixed-length padded batch
//! here vs. one segment at a time there).

use fftw::array::AlignedVec;
use fftw::plan::*;
use fftw::types::*;
use ndarray::Array2;

const FRAME_LENGTH_MS: usize = 25;
const FRAME_SHIFT_MS: usize = 10;
const N_MELS: usize = 80;

pub fn compute_mel_features(audio: &[f32], sample_rate: u32) -> Result<Array2<f32>, String> {
    let sample_rate = sample_rate as usize;
    let frame_length = (sample_rate * FRAME_LENGTH_MS) / 1000;
    let frame_shift = (sample_rate * FRAME_SHIFT_MS) / 1000;
    let fft_size = frame_length.next_power_of_two();

    let mut plan: C2CPlan32 = C2CPlan::aligned(&[fft_size], Sign::Forward, Flag::MEASURE)
        .map_err(|e| format!("failed to create FFTW plan: {e}"))?;

    let n_frames = if audio.len() > frame_length {
        (audio.len() - frame_length) / frame_shift + 1
    } else {
        1
    };

    let window: Vec<f32> = (0..frame_length)
        .map(|i| 0.54 - 0.46 * ((2.0 * std::f32::consts::PI * i as f32) / (frame_length as f32 - 1.0)).cos())
        .collect();

    let mut spectrogram = Vec::with_capacity(n_frames * (fft_size / 2));
    let mut input = AlignedVec::new(fft_size);
    let mut output = AlignedVec::new(fft_size);

    for frame_idx in 0..n_frames {
        let start = frame_idx * frame_shift;
        let end = (start + frame_length).min(audio.len());

        for i in 0..fft_size {
            input[i] = c32::new(0.0, 0.0);
        }
        for (i, &sample) in audio[start..end].iter().enumerate() {
            if i < window.len() {
                input[i] = c32::new(sample * window[i], 0.0);
            }
        }

        plan.c2c(&mut input, &mut output)
            .map_err(|e| format!("FFT computation failed: {e}"))?;

        for complex_val in output.iter().take(fft_size / 2) {
            let magnitude = complex_val.norm();
            spectrogram.push(magnitude * magnitude);
        }
    }

    let filterbank = mel_filterbank(N_MELS, fft_size / 2, sample_rate);
    let mel_spec = apply_filterbank(&spectrogram, &filterbank, n_frames, fft_size / 2);
    let log_mel: Vec<f32> = mel_spec.iter().map(|x| x.max(1e-10).ln()).collect();

    Array2::from_shape_vec((n_frames, N_MELS), log_mel)
        .map_err(|e| format!("failed to shape mel features: {e}"))
}

fn mel_filterbank(n_mels: usize, n_fft_bins: usize, sample_rate: usize) -> Vec<f32> {
    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0);

    let nyquist = (sample_rate / 2) as f32;
    let mel_low = hz_to_mel(0.0);
    let mel_high = hz_to_mel(nyquist);

    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_low + (mel_high - mel_low) * (i as f32) / (n_mels + 1) as f32)
        .map(mel_to_hz)
        .collect();

    let bin_points: Vec<f32> = mel_points.iter().map(|hz| hz * (n_fft_bins as f32) / nyquist).collect();

    let mut filterbank = vec![0.0f32; n_mels * n_fft_bins];
    for mel_idx in 0..n_mels {
        let left = bin_points[mel_idx];
        let center = bin_points[mel_idx + 1];
        let right = bin_points[mel_idx + 2];

        for bin_idx in 0..n_fft_bins {
            let freq_bin = bin_idx as f32;
            let weight = if freq_bin >= left && freq_bin <= center {
                (freq_bin - left) / (center - left)
            } else if freq_bin > center && freq_bin <= right {
                (right - freq_bin) / (right - center)
            } else {
                0.0
            };
            filterbank[mel_idx * n_fft_bins + bin_idx] = weight;
        }
    }
    filterbank
}

fn apply_filterbank(spectrogram: &[f32], filterbank: &[f32], n_frames: usize, n_fft_bins: usize) -> Vec<f32> {
    let n_mels = filterbank.len() / n_fft_bins;
    let mut mel_spec = vec![0.0f32; n_frames * n_mels];

    for frame_idx in 0..n_frames {
        for mel_idx in 0..n_mels {
            let mut sum = 0.0f32;
            for bin_idx in 0..n_fft_bins {
                sum += spectrogram[frame_idx * n_fft_bins + bin_idx] * filterbank[mel_idx * n_fft_bins + bin_idx];
            }
            mel_spec[frame_idx * n_mels + mel_idx] = sum;
        }
    }
    mel_spec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_expected_shape() {
        let audio = vec![0.1f32; 16_000];
        let features = compute_mel_features(&audio, 16_000).unwrap();
        assert_eq!(features.ncols(), N_MELS);
        assert!(features.nrows() > 0);
    }
}
