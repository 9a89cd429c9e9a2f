//! General decode path: demuxes via FFmpeg, decodes the best audio
//! stream, and resamples to mono 16 kHz f32. Handles every container the
//! fast path doesn't, and every WAV that isn't already conformant.

use chaffee_common::IngestError;
use ffmpeg_next as ffmpeg;
use std::path::Path;

pub struct GeneralDecoder {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::codec::decoder::Audio,
    resampler: ffmpeg::software::resampling::Context,
    stream_index: usize,
    chunk_samples: usize,
    pending: Vec<f32>,
    packets_exhausted: bool,
    decoder_flushed: bool,
}

fn fmt_err(path: &Path, e: impl std::fmt::Display) -> IngestError {
    IngestError::Format {
        source_id: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl GeneralDecoder {
    pub fn open(path: &Path, chunk_samples: usize) -> Result<Self, IngestError> {
        ffmpeg::init().map_err(|e| fmt_err(path, format!("ffmpeg init failed: {e}")))?;

        let input = ffmpeg::format::input(path).map_err(|e| fmt_err(path, e))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or_else(|| fmt_err(path, "no audio stream"))?;
        let stream_index = stream.index();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| fmt_err(path, e))?;
        let decoder = context.decoder().audio().map_err(|e| fmt_err(path, e))?;

        let resampler = ffmpeg::software::resampling::Context::get(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            ffmpeg::channel_layout::ChannelLayout::MONO,
            crate::TARGET_SAMPLE_RATE,
        )
        .map_err(|e| fmt_err(path, e))?;

        Ok(Self {
            input,
            decoder,
            resampler,
            stream_index,
            chunk_samples,
            pending: Vec::new(),
            packets_exhausted: false,
            decoder_flushed: false,
        })
    }

    fn drain_decoder_frame(&mut self, path_hint: &str) -> Result<(), IngestError> {
        let mut decoded = ffmpeg::frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut resampled = ffmpeg::frame::Audio::empty();
            self.resampler
                .run(&decoded, &mut resampled)
                .map_err(|e| IngestError::Format {
                    source_id: path_hint.to_string(),
                    reason: format!("resample failed: {e}"),
                })?;
            let samples: &[f32] = if resampled.samples() > 0 {
                ffmpeg::util::frame::audio::Audio::plane(&resampled, 0)
            } else {
                &[]
            };
            self.pending.extend_from_slice(samples);
        }
        Ok(())
    }

    fn pull_more(&mut self) -> Result<(), IngestError> {
        if !self.packets_exhausted {
            let stream_index = self.stream_index;
            let mut packets = self.input.packets();
            match packets.next() {
                Some((stream, packet)) if stream.index() == stream_index => {
                    drop(packets);
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| IngestError::Format {
                            source_id: String::new(),
                            reason: format!("decode send_packet failed: {e}"),
                        })?;
                    self.drain_decoder_frame("")?;
                }
                Some(_) => {
                    // packet from a different stream (e.g. video); ignore and
                    // let the caller retry on the next pull
                }
                None => {
                    drop(packets);
                    self.packets_exhausted = true;
                }
            }
        } else if !self.decoder_flushed {
            self.decoder_flushed = true;
            self.decoder.send_eof().ok();
            self.drain_decoder_frame("")?;
        }
        Ok(())
    }
}

impl Iterator for GeneralDecoder {
    type Item = Result<Vec<f32>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending.len() >= self.chunk_samples {
                let rest = self.pending.split_off(self.chunk_samples);
                let chunk = std::mem::replace(&mut self.pending, rest);
                return Some(Ok(chunk));
            }

            if self.packets_exhausted && self.decoder_flushed {
                if self.pending.is_empty() {
                    return None;
                }
                let chunk = std::mem::take(&mut self.pending);
                return Some(Ok(chunk));
            }

            if let Err(e) = self.pull_more() {
                return Some(Err(e));
            }
        }
    }
}
