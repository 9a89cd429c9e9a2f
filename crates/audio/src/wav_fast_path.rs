//! Fast path for WAV files that are already 16 kHz mono PCM: reads
//! samples directly with `hound`, no FFmpeg process or demux overhead.

use chaffee_common::IngestError;
use std::path::Path;

pub enum FastPathRejected {
    /// File opened fine but isn't 16 kHz mono PCM; caller should fall
    /// back to the general decoder.
    NotConformant,
    /// Genuine I/O or format error; not recoverable by falling back.
    Error(IngestError),
}

pub struct WavFastPathReader {
    reader: hound::WavReader<std::io::BufReader<std::fs::File>>,
    chunk_samples: usize,
    done: bool,
}

impl WavFastPathReader {
    pub fn open(path: &Path, chunk_samples: usize) -> Result<Self, FastPathRejected> {
        let reader = hound::WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io_err) => FastPathRejected::Error(IngestError::Io(io_err)),
            other => FastPathRejected::Error(IngestError::Format {
                source_id: path.display().to_string(),
                reason: other.to_string(),
            }),
        })?;

        let spec = reader.spec();
        let conformant = spec.sample_rate == crate::TARGET_SAMPLE_RATE
            && spec.channels == 1
            && spec.sample_format == hound::SampleFormat::Int
            && spec.bits_per_sample == 16;

        if !conformant {
            return Err(FastPathRejected::NotConformant);
        }

        Ok(Self {
            reader,
            chunk_samples,
            done: false,
        })
    }
}

impl Iterator for WavFastPathReader {
    type Item = Result<Vec<f32>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_samples.min(1 << 20));
        for sample in self.reader.samples::<i16>().by_ref().take(self.chunk_samples) {
            match sample {
                Ok(s) => chunk.push(f32::from(s) / f32::from(i16::MAX)),
                Err(hound::Error::IoError(io_err)) => return Some(Err(IngestError::Io(io_err))),
                Err(other) => {
                    return Some(Err(IngestError::Format {
                        source_id: String::new(),
                        reason: other.to_string(),
                    }))
                }
            }
        }

        if chunk.len() < self.chunk_samples {
            self.done = true;
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_conformant_wav(path: &Path, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: crate::TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_conformant_wav_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        let samples: Vec<i16> = (0..100).map(|i| (i * 10) as i16).collect();
        write_conformant_wav(&path, &samples);

        let mut reader = WavFastPathReader::open(&path, 30).unwrap();
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.len(), 30);
        let mut total = first.len();
        for chunk in reader {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 100);
    }

    #[test]
    fn rejects_non_conformant_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        match WavFastPathReader::open(&path, 1024) {
            Err(FastPathRejected::NotConformant) => {}
            _ => panic!("expected NotConformant"),
        }
    }
}
