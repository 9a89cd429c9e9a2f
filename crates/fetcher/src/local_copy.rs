//! Fetches audio for manually-ingested sources: `descriptor.url` is
//! already a local filesystem path, so this just copies it into scratch.

use crate::{AudioFetcher, FetchedAudio};
use chaffee_common::{IngestError, VideoDescriptor};
use std::path::{Path, PathBuf};

pub struct LocalFileFetcher;

impl AudioFetcher for LocalFileFetcher {
    fn fetch(
        &self,
        descriptor: &VideoDescriptor,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, IngestError> {
        let source_path = PathBuf::from(&descriptor.url);
        if !source_path.exists() {
            return Err(IngestError::AudioUnavailable {
                source_id: descriptor.source_id.clone(),
                reason: format!("source file does not exist: {}", source_path.display()),
            });
        }

        let container = source_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();

        std::fs::create_dir_all(scratch_dir).map_err(IngestError::Io)?;
        let dest = scratch_dir.join(format!("{}.{}", descriptor.source_id, container));
        std::fs::copy(&source_path, &dest).map_err(|e| IngestError::AudioTransient {
            source_id: descriptor.source_id.clone(),
            reason: format!("copy failed: {e}"),
        })?;

        Ok(FetchedAudio {
            path: dest,
            container,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaffee_common::SourceType;

    fn descriptor(url: &str) -> VideoDescriptor {
        VideoDescriptor {
            source_id: "v1".into(),
            title: "t".into(),
            description: String::new(),
            url: url.to_string(),
            source_type: SourceType::Manual,
            duration_s: 10.0,
            published_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn missing_source_is_unavailable() {
        let fetcher = LocalFileFetcher;
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher
            .fetch(&descriptor("/nonexistent/path.wav"), dir.path())
            .unwrap_err();
        assert!(matches!(err, IngestError::AudioUnavailable { .. }));
    }

    #[test]
    fn copies_existing_file() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("clip.wav");
        std::fs::write(&src_path, b"RIFF....WAVEfmt ").unwrap();

        let fetcher = LocalFileFetcher;
        let scratch = tempfile::tempdir().unwrap();
        let fetched = fetcher
            .fetch(&descriptor(src_path.to_str().unwrap()), scratch.path())
            .unwrap();
        assert_eq!(fetched.container, "wav");
        assert!(fetched.path.exists());
    }
}
