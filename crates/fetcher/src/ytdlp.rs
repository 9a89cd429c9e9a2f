//! Fetches audio via the `yt-dlp` CLI, extracting best audio and
//! remuxing to a container the audio loader already understands.

use crate::{run_subprocess, AudioFetcher, FetchedAudio};
use chaffee_common::{IngestError, VideoDescriptor};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct YtDlpFetcher {
    binary: PathBuf,
    container: String,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            container: "m4a".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioFetcher for YtDlpFetcher {
    fn fetch(
        &self,
        descriptor: &VideoDescriptor,
        scratch_dir: &Path,
    ) -> Result<FetchedAudio, IngestError> {
        std::fs::create_dir_all(scratch_dir).map_err(IngestError::Io)?;
        let output_path = scratch_dir.join(format!("{}.{}", descriptor.source_id, self.container));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-x")
            .arg("--audio-format")
            .arg(&self.container)
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(&output_path)
            .arg(&descriptor.url);

        run_subprocess(cmd, &descriptor.source_id)?;

        if !output_path.exists() {
            return Err(IngestError::Format {
                source_id: descriptor.source_id.clone(),
                reason: "yt-dlp reported success but produced no output file".to_string(),
            });
        }

        Ok(FetchedAudio {
            path: output_path,
            container: self.container.clone(),
        })
    }
}
