//! Video source adapters (spec §4.2, component C2).
//!
//! A [`VideoSource`] is a lazy, finite, non-restartable sequence of
//! [`VideoDescriptor`]s. It is consumed exactly once, by Phase 1 of the
//! orchestrator. On an upstream error it yields `SourceUnavailable` and is
//! then exhausted — callers keep whatever was already yielded.

use chaffee_common::{IngestError, Result, VideoDescriptor};
use std::path::{Path, PathBuf};

mod local_listing;
mod youtube;

pub use local_listing::LocalListingSource;
pub use youtube::YoutubeChannelSource;

/// A single-pass source of candidate videos. Implementations own whatever
/// pagination/cursor state the underlying listing needs; `next_descriptor`
/// is the only way to advance it.
pub trait VideoSource: Send {
    /// Returns the next descriptor, `None` once the source is exhausted
    /// (either naturally or after a fatal upstream error).
    fn next_descriptor(&mut self) -> Option<Result<VideoDescriptor>>;
}

/// Adapts any `VideoSource` into a standard [`Iterator`], for use with
/// `for` loops and iterator adapters in the orchestrator's prefilter.
pub struct SourceIter<S: VideoSource> {
    inner: S,
    exhausted: bool,
}

impl<S: VideoSource> SourceIter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            exhausted: false,
        }
    }
}

impl<S: VideoSource> Iterator for SourceIter<S> {
    type Item = Result<VideoDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.inner.next_descriptor() {
            Some(Err(e)) => {
                // A source-level error fuses the sequence: the spec allows
                // callers to keep whatever was already yielded, but no
                // further descriptors are attempted.
                self.exhausted = true;
                Some(Err(e))
            }
            Some(Ok(d)) => Some(Ok(d)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

/// Predicate the orchestrator supplies, backed by storage, answering
/// "has this `source_id` already been ingested or permanently failed".
/// Kept as a plain closure so this crate never depends on `chaffee-storage`.
pub type KnownPredicate<'a> = Box<dyn FnMut(&str) -> bool + Send + 'a>;

/// Wraps any `VideoSource` to drop descriptors the predicate reports as
/// already known, unless `force` is set (in which case everything passes
/// through). This implements the "not present in DB and not in
/// permanent-failure list unless force=true" filter from spec §4.2 without
/// requiring C2 to understand the storage schema.
pub struct FilteredSource<'a, S: VideoSource> {
    inner: S,
    is_known: KnownPredicate<'a>,
    force: bool,
}

impl<'a, S: VideoSource> FilteredSource<'a, S> {
    pub fn new(inner: S, is_known: KnownPredicate<'a>, force: bool) -> Self {
        Self {
            inner,
            is_known,
            force,
        }
    }
}

impl<'a, S: VideoSource> VideoSource for FilteredSource<'a, S> {
    fn next_descriptor(&mut self) -> Option<Result<VideoDescriptor>> {
        loop {
            match self.inner.next_descriptor()? {
                Ok(d) => {
                    if self.force || !(self.is_known)(&d.source_id) {
                        return Some(Ok(d));
                    }
                    // known and not forced: skip silently, try the next one
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Reads a file of newline-delimited video ids (`--video-ids-file`) into a
/// plain `Vec`, for restricting any source to an explicit allowlist.
pub fn read_video_ids_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Scratch-dir-relative default location for a local listing manifest,
/// used by tests and the `local-listing` CLI source kind.
pub fn default_manifest_path(scratch_dir: &Path) -> PathBuf {
    scratch_dir.join("manifest.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaffee_common::SourceType;

    struct FixedSource {
        items: Vec<Result<VideoDescriptor>>,
    }

    impl VideoSource for FixedSource {
        fn next_descriptor(&mut self) -> Option<Result<VideoDescriptor>> {
            if self.items.is_empty() {
                None
            } else {
                Some(self.items.remove(0))
            }
        }
    }

    fn descriptor(id: &str) -> VideoDescriptor {
        VideoDescriptor {
            source_id: id.to_string(),
            title: "title".to_string(),
            description: String::new(),
            url: format!("https://example.invalid/{id}"),
            source_type: SourceType::Youtube,
            duration_s: 600.0,
            published_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn fuses_after_error() {
        let src = FixedSource {
            items: vec![
                Ok(descriptor("a")),
                Err(IngestError::SourceUnavailable("rate limited".into())),
                Ok(descriptor("b")),
            ],
        };
        let collected: Vec<_> = SourceIter::new(src).collect();
        assert_eq!(collected.len(), 2);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }

    #[test]
    fn filters_known_unless_forced() {
        let src = FixedSource {
            items: vec![Ok(descriptor("a")), Ok(descriptor("b"))],
        };
        let mut seen = Vec::new();
        let known: KnownPredicate = Box::new(|id| id == "a");
        let mut filtered = FilteredSource::new(src, known, false);
        while let Some(Ok(d)) = filtered.next_descriptor() {
            seen.push(d.source_id);
        }
        assert_eq!(seen, vec!["b".to_string()]);
    }

    #[test]
    fn force_bypasses_filter() {
        let src = FixedSource {
            items: vec![Ok(descriptor("a"))],
        };
        let known: KnownPredicate = Box::new(|_| true);
        let mut filtered = FilteredSource::new(src, known, true);
        assert!(filtered.next_descriptor().unwrap().is_ok());
    }
}
