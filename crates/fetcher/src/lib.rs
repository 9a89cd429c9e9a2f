//! Audio fetchers (spec §4.3, component C3).
//!
//! An [`AudioFetcher`] takes a descriptor and writes one audio file to
//! `scratch_dir/{id}.{ext}`, reporting the observed container format.
//! Every failure is classified before it leaves this crate; nothing here
//! panics or propagates a bare `io::Error` to the caller.

use chaffee_common::{IngestError, VideoDescriptor};
use std::path::{Path, PathBuf};
use std::process::Command;

mod local_copy;
mod ytdlp;

pub use local_copy::LocalFileFetcher;
pub use ytdlp::YtDlpFetcher;

/// Result of a successful fetch: where the file landed and what container
/// it turned out to be, as reported by the fetcher (not yet verified by
/// the audio loader).
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub container: String,
}

pub trait AudioFetcher: Send + Sync {
    /// Downloads (or copies) the audio for `descriptor` into `scratch_dir`.
    ///
    /// Errors are always one of `AudioTransient` (network flake, worth a
    /// retry), `AudioUnavailable` (permanent: members-only, deleted,
    /// geo-blocked) or `Format` (permanent: container the loader cannot
    /// read). Never returns a bare `io::Error`.
    fn fetch(
        &self,
        descriptor: &VideoDescriptor,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, IngestError>;
}

/// Runs `cmd` and classifies non-zero exit / spawn failure as transient
/// (network-shaped) unless `stderr` matches a known permanent pattern.
/// Shared by every subprocess-backed fetcher.
fn classify_subprocess_failure(source_id: &str, stderr: &str) -> IngestError {
    let lower = stderr.to_lowercase();
    let permanent_markers = [
        "private video",
        "members-only",
        "members only",
        "video unavailable",
        "account associated with this video has been terminated",
        "this video is not available",
        "copyright",
        "removed by the uploader",
    ];
    if permanent_markers.iter().any(|m| lower.contains(m)) {
        IngestError::AudioUnavailable {
            source_id: source_id.to_string(),
            reason: stderr.lines().next().unwrap_or(stderr).to_string(),
        }
    } else {
        IngestError::AudioTransient {
            source_id: source_id.to_string(),
            reason: stderr.lines().next().unwrap_or(stderr).to_string(),
        }
    }
}

pub(crate) fn run_subprocess(mut cmd: Command, source_id: &str) -> Result<(), IngestError> {
    let output = cmd.output().map_err(|e| IngestError::AudioTransient {
        source_id: source_id.to_string(),
        reason: format!("failed to spawn: {e}"),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_subprocess_failure(source_id, &stderr));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_only_is_permanent() {
        let err = classify_subprocess_failure("v1", "ERROR: This video is members-only content");
        assert!(matches!(err, IngestError::AudioUnavailable { .. }));
    }

    #[test]
    fn unrecognized_stderr_is_transient() {
        let err = classify_subprocess_failure("v1", "ERROR: connection reset by peer");
        assert!(matches!(err, IngestError::AudioTransient { .. }));
    }
}
