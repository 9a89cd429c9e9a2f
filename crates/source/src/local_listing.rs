//! Local-listing video source: reads a JSON-lines manifest from disk. Used
//! for manual ingestion runs and in tests, where hitting a real listing
//! endpoint is undesirable.

use crate::VideoSource;
use chaffee_common::{IngestError, Result, VideoDescriptor};
use std::collections::VecDeque;
use std::path::Path;

pub struct LocalListingSource {
    remaining: VecDeque<VideoDescriptor>,
}

impl LocalListingSource {
    /// Reads every line of `path` as one JSON-encoded `VideoDescriptor`.
    /// A malformed line yields `SourceUnavailable` and fuses the source;
    /// descriptors already parsed from earlier lines are unaffected.
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut remaining = VecDeque::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let descriptor: VideoDescriptor = serde_json::from_str(line).map_err(|e| {
                IngestError::SourceUnavailable(format!(
                    "manifest {}:{}: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            remaining.push_back(descriptor);
        }
        Ok(Self { remaining })
    }

    /// Builds directly from an in-memory list, for tests and for the
    /// `--video-ids` restricted-set path where descriptors were already
    /// resolved by an upstream lookup.
    pub fn from_descriptors(descriptors: Vec<VideoDescriptor>) -> Self {
        Self {
            remaining: descriptors.into(),
        }
    }
}

impl VideoSource for LocalListingSource {
    fn next_descriptor(&mut self) -> Option<Result<VideoDescriptor>> {
        self.remaining.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaffee_common::SourceType;
    use std::io::Write;

    #[test]
    fn reads_manifest_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let d = VideoDescriptor {
            source_id: "abc".into(),
            title: "t".into(),
            description: String::new(),
            url: "https://example.invalid/abc".into(),
            source_type: SourceType::Manual,
            duration_s: 120.0,
            published_at: chrono::Utc::now(),
        };
        writeln!(file, "{}", serde_json::to_string(&d).unwrap()).unwrap();
        let mut src = LocalListingSource::from_manifest(file.path()).unwrap();
        let first = src.next_descriptor().unwrap().unwrap();
        assert_eq!(first.source_id, "abc");
        assert!(src.next_descriptor().is_none());
    }

    #[test]
    fn malformed_line_is_source_unavailable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let err = LocalListingSource::from_manifest(file.path()).unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable(_)));
    }
}
