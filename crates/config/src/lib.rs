//! Typed, immutable pipeline configuration (spec §4.1).
//!
//! A [`Config`] is built once at startup from environment variables with
//! CLI-flag overrides layered on top, validated, and then handed out as a
//! read-only `Arc` to every worker. Nothing after `Config::load` mutates
//! it; if a value needs to change, restart the process.

use chaffee_common::IngestError;
use std::path::PathBuf;

/// `asr_compute`: numeric precision used by the ASR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrCompute {
    Int8Float16,
    Float16,
    Float32,
}

impl std::str::FromStr for AsrCompute {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int8_float16" => Ok(Self::Int8Float16),
            "float16" => Ok(Self::Float16),
            "float32" => Ok(Self::Float32),
            other => Err(IngestError::Config(format!(
                "unrecognized asr_compute {other:?}"
            ))),
        }
    }
}

/// `text_embedding_device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl std::str::FromStr for Device {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            other => Err(IngestError::Config(format!(
                "unrecognized device {other:?}, expected cpu or gpu"
            ))),
        }
    }
}

/// `--source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    ExternalApi,
    LocalListing,
}

impl std::str::FromStr for SourceKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external-api" => Ok(Self::ExternalApi),
            "local-listing" => Ok(Self::LocalListing),
            other => Err(IngestError::Config(format!(
                "unrecognized --source {other:?}, expected external-api or local-listing"
            ))),
        }
    }
}

/// The full recognized option set from spec §4.1 / §6. Every field has a
/// name matching its env var (upper-snake-case) so [`Config::from_env`]
/// can be read as a 1:1 mapping of the spec's table.
#[derive(Debug, Clone)]
pub struct Config {
    // Concurrency
    pub asr_workers: usize,
    pub io_workers: usize,
    pub db_workers: usize,

    // ASR
    pub asr_model_id: String,
    pub asr_compute: AsrCompute,

    // Diarization
    pub diarizer_clustering_threshold: f32,
    pub diarizer_min_on: f32,
    pub diarizer_min_off: f32,

    // Speaker / voice embedding
    pub speaker_model_id: String,
    pub voice_batch: usize,
    pub chaffee_min_sim: f32,
    pub variance_split_range: f32,
    pub variance_probe_k: usize,

    // Text embedding
    pub text_embedding_model_id: String,
    pub d_text: usize,
    pub text_embedding_batch: usize,
    pub text_embedding_device: Device,

    // Fast-path
    pub fast_path_enabled: bool,
    pub assume_monologue: bool,

    // Source filters
    pub skip_shorts: bool,
    pub force: bool,
    pub days_back: Option<u32>,
    pub limit: Option<usize>,
    pub limit_unprocessed: bool,
    pub newest_first: bool,
    pub video_ids: Vec<String>,
    pub dry_run: bool,
    pub source_kind: SourceKind,
    pub youtube_channel_id: String,
    pub youtube_api_endpoint: String,

    // Storage / scratch
    pub database_url: String,
    pub voices_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub cleanup_after: bool,

    // Retry / timeouts
    pub max_retries: u32,
    pub per_video_timeout_s: u64,
    pub grace_period_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asr_workers: 1,
            io_workers: 12,
            db_workers: 4,
            asr_model_id: "distil-large-v3".to_string(),
            asr_compute: AsrCompute::Int8Float16,
            diarizer_clustering_threshold: 0.4,
            diarizer_min_on: 0.0,
            diarizer_min_off: 0.0,
            speaker_model_id: "ecapa-tdnn".to_string(),
            voice_batch: 8,
            chaffee_min_sim: 0.62,
            variance_split_range: 0.5,
            variance_probe_k: 10,
            text_embedding_model_id: "bge-small-en".to_string(),
            d_text: 384,
            text_embedding_batch: 64,
            text_embedding_device: Device::Gpu,
            fast_path_enabled: true,
            assume_monologue: true,
            skip_shorts: true,
            force: false,
            days_back: None,
            limit: None,
            limit_unprocessed: false,
            newest_first: false,
            video_ids: Vec::new(),
            dry_run: false,
            source_kind: SourceKind::ExternalApi,
            youtube_channel_id: String::new(),
            youtube_api_endpoint: "https://www.googleapis.com/youtube/v3".to_string(),
            database_url: "postgres://localhost/chaffee".to_string(),
            voices_dir: PathBuf::from("voices"),
            scratch_dir: std::env::temp_dir().join("chaffee-scratch"),
            cleanup_after: true,
            max_retries: 3,
            per_video_timeout_s: 3600,
            grace_period_s: 60,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, IngestError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| IngestError::Config(format!("invalid value for {key}: {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, IngestError> {
    match std::env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(IngestError::Config(format!(
                "invalid boolean for {key}: {other:?}"
            ))),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load from environment variables, falling back to [`Default`] for
    /// anything unset. CLI flags are applied afterwards by the caller
    /// (`crates/cli`) via the builder-style `with_*` methods below, then
    /// [`Config::validate`] must be called before use.
    pub fn from_env() -> Result<Self, IngestError> {
        let defaults = Self::default();

        Ok(Self {
            asr_workers: env_parse("ASR_WORKERS", defaults.asr_workers)?,
            io_workers: env_parse("IO_WORKERS", defaults.io_workers)?,
            db_workers: env_parse("DB_WORKERS", defaults.db_workers)?,
            asr_model_id: env_str("ASR_MODEL", &defaults.asr_model_id),
            asr_compute: env_str("ASR_COMPUTE", "int8_float16").parse()?,
            diarizer_clustering_threshold: env_parse(
                "PYANNOTE_CLUSTERING_THRESHOLD",
                defaults.diarizer_clustering_threshold,
            )?,
            speaker_model_id: defaults.speaker_model_id.clone(),
            voice_batch: env_parse("VOICE_BATCH", defaults.voice_batch)?,
            chaffee_min_sim: env_parse("CHAFFEE_MIN_SIM", defaults.chaffee_min_sim)?,
            text_embedding_model_id: env_str(
                "TEXT_EMBEDDING_MODEL",
                &defaults.text_embedding_model_id,
            ),
            text_embedding_batch: env_parse(
                "TEXT_EMBEDDING_BATCH",
                defaults.text_embedding_batch,
            )?,
            text_embedding_device: env_str("TEXT_EMBEDDING_DEVICE", "gpu").parse()?,
            fast_path_enabled: env_bool("FAST_PATH_ENABLED", defaults.fast_path_enabled)?,
            assume_monologue: env_bool("ASSUME_MONOLOGUE", defaults.assume_monologue)?,
            youtube_channel_id: env_str("YOUTUBE_CHANNEL_ID", &defaults.youtube_channel_id),
            youtube_api_endpoint: env_str(
                "YOUTUBE_API_ENDPOINT",
                &defaults.youtube_api_endpoint,
            ),
            database_url: env_str("DATABASE_URL", &defaults.database_url),
            voices_dir: PathBuf::from(env_str(
                "VOICES_DIR",
                defaults.voices_dir.to_string_lossy().as_ref(),
            )),
            scratch_dir: PathBuf::from(env_str(
                "SCRATCH_DIR",
                defaults.scratch_dir.to_string_lossy().as_ref(),
            )),
            cleanup_after: env_bool("CLEANUP_AFTER", defaults.cleanup_after)?,
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            ..defaults
        })
    }

    /// Applies a `--source` CLI override.
    #[must_use]
    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = kind;
        self
    }

    /// Applies a `--video-ids` / `--video-ids-file` CLI override.
    #[must_use]
    pub fn with_video_ids(mut self, ids: Vec<String>) -> Self {
        self.video_ids = ids;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_days_back(mut self, days_back: Option<u32>) -> Self {
        self.days_back = days_back;
        self
    }

    #[must_use]
    pub fn with_newest_first(mut self, newest_first: bool) -> Self {
        self.newest_first = newest_first;
        self
    }

    #[must_use]
    pub fn with_skip_shorts(mut self, skip_shorts: bool) -> Self {
        self.skip_shorts = skip_shorts;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_limit_unprocessed(mut self, limit_unprocessed: bool) -> Self {
        self.limit_unprocessed = limit_unprocessed;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_scratch_dir(mut self, scratch_dir: PathBuf) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    /// Rejects nonsensical combinations before any worker starts (spec
    /// §7: `ConfigError` is fail-fast, exit code 2).
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.asr_workers == 0 {
            return Err(IngestError::Config("asr_workers must be >= 1".into()));
        }
        if self.io_workers == 0 {
            return Err(IngestError::Config("io_workers must be >= 1".into()));
        }
        if self.db_workers == 0 {
            return Err(IngestError::Config("db_workers must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.chaffee_min_sim) {
            return Err(IngestError::Config(
                "chaffee_min_sim must be in [0, 1]".into(),
            ));
        }
        if self.d_text == 0 {
            return Err(IngestError::Config("d_text must be > 0".into()));
        }
        if self.text_embedding_batch < 8 {
            return Err(IngestError::Config(
                "text_embedding_batch must be >= 8 (the OOM-recovery floor)".into(),
            ));
        }
        if matches!(self.source_kind, SourceKind::ExternalApi)
            && self.youtube_channel_id.is_empty()
            && self.video_ids.is_empty()
        {
            return Err(IngestError::Config(
                "--source external-api requires YOUTUBE_CHANNEL_ID or --video-ids".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_asr_workers() {
        let mut c = Config::default();
        c.asr_workers = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_similarity() {
        let mut c = Config::default();
        c.chaffee_min_sim = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn asr_compute_parses_known_values() {
        assert_eq!("int8_float16".parse::<AsrCompute>().unwrap(), AsrCompute::Int8Float16);
        assert!("bogus".parse::<AsrCompute>().is_err());
    }
}
