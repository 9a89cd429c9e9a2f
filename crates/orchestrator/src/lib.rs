//! Pipeline orchestrator (spec §4.12-§4.15, components C12-C15).
//!
//! Three phases, run with native OS threads rather than cooperative tasks
//! (spec §5): a prefilter narrows a video source down to candidates worth
//! fetching, a pool of `io_workers` downloads audio with the ASR queue's
//! bounded capacity as the only backpressure valve, and a pool of
//! `asr_workers` (normally one, to keep a single GPU resident) runs the
//! strict per-video stage order and persists the result. [`chaffee_storage`]
//! is the one async dependency in the whole pipeline; every worker thread
//! bridges into it through a borrowed [`tokio::runtime::Handle`].

mod bootstrap;
mod metrics;
mod pipeline;

pub use metrics::{MetricsAggregator, RunSummary, VideoMetrics};
pub use pipeline::PipelineResources;

use chaffee_asr::{AsrConfig, AsrEngine};
use chaffee_common::{CheckpointStatus, IngestError, VideoDescriptor};
use chaffee_config::{Config, SourceKind};
use chaffee_diarize::{DiarizeConfig, Diarizer};
use chaffee_fetcher::{AudioFetcher, LocalFileFetcher, YtDlpFetcher};
use chaffee_source::{
    default_manifest_path, FilteredSource, KnownPredicate, LocalListingSource, SourceIter, VideoSource,
    YoutubeChannelSource,
};
use chaffee_storage::{CheckpointRecord, SegmentsDatabase};
use chaffee_textembed::{TextEmbedConfig, TextEmbedder};
use chaffee_voice::{VoiceConfig, VoiceEmbedder};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use uuid::Uuid;

const SHORTS_THRESHOLD_S: f64 = 60.0;

fn asr_config(config: &Config) -> AsrConfig {
    AsrConfig {
        model_path: PathBuf::from(format!("models/whisper/{}.bin", config.asr_model_id)),
        ..AsrConfig::default()
    }
}

fn diarize_config(config: &Config) -> DiarizeConfig {
    DiarizeConfig {
        clustering_threshold: config.diarizer_clustering_threshold,
        min_on_s: config.diarizer_min_on,
        min_off_s: config.diarizer_min_off,
        ..DiarizeConfig::default()
    }
}

fn voice_config(config: &Config) -> VoiceConfig {
    VoiceConfig {
        embedding_model_path: PathBuf::from(format!("models/voice/{}.onnx", config.speaker_model_id)),
        model_id: config.speaker_model_id.clone(),
        ..VoiceConfig::default()
    }
}

fn text_embed_config(config: &Config) -> TextEmbedConfig {
    TextEmbedConfig {
        model_path: PathBuf::from(format!("models/text/{}.onnx", config.text_embedding_model_id)),
        tokenizer_path: PathBuf::from(format!("models/text/{}_tokenizer.json", config.text_embedding_model_id)),
        device: match config.text_embedding_device {
            chaffee_config::Device::Cpu => chaffee_textembed::Device::Cpu,
            chaffee_config::Device::Gpu => chaffee_textembed::Device::Gpu,
        },
        dim: config.d_text,
        max_length: 256,
    }
}

fn attribution_config(config: &Config) -> chaffee_attribution::AttributionConfig {
    chaffee_attribution::AttributionConfig {
        assume_monologue: config.assume_monologue,
        fast_path_enabled: config.fast_path_enabled,
        chaffee_min_sim: config.chaffee_min_sim,
        variance_probe_k: config.variance_probe_k,
        variance_split_range: config.variance_split_range,
    }
}

/// Owns every process-wide model singleton plus the storage handle, and
/// drives the three-phase run described in spec §4.12.
pub struct Orchestrator {
    config: Arc<Config>,
    db: Arc<dyn SegmentsDatabase>,
    resources: PipelineResources,
}

impl Orchestrator {
    /// Builds every model singleton and, if `config.voices_dir` has no
    /// profile yet, runs the bootstrap seed pipeline (component C14)
    /// before returning. Heavier model weights are loaded lazily on
    /// first real use; only the voice embedder is exercised here.
    pub fn new(config: Arc<Config>, db: Arc<dyn SegmentsDatabase>) -> Result<Self, IngestError> {
        let voice = Arc::new(VoiceEmbedder::new(voice_config(&config)));
        let profile = Arc::new(bootstrap::run_if_needed(&config.voices_dir, &config.scratch_dir, &voice)?);

        let resources = PipelineResources {
            asr: Arc::new(AsrEngine::new(asr_config(&config))),
            diarizer: Arc::new(Diarizer::new(diarize_config(&config))),
            voice,
            profile,
            textembed: Arc::new(TextEmbedder::new(text_embed_config(&config))),
            db: Arc::clone(&db),
            attribution_config: attribution_config(&config),
        };

        Ok(Self { config, db, resources })
    }

    /// Runs prefilter, fetch, and ASR+attribution+embed+persist to
    /// completion (or until SIGINT requests a drain), returning the
    /// aggregate run summary. Exit-code mapping is the caller's job.
    pub fn run(&self, rt: &Runtime) -> Result<RunSummary, IngestError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        install_signal_handler(rt, Arc::clone(&shutdown));

        let accepted = self.prefilter(rt)?;
        tracing::info!(count = accepted.len(), "prefilter accepted candidates");

        if self.config.dry_run {
            for d in &accepted {
                tracing::info!(source_id = %d.source_id, title = %d.title, "dry run: would ingest");
            }
            return Ok(RunSummary {
                videos_skipped: accepted.len(),
                ..RunSummary::default()
            });
        }

        let aggregator = Arc::new(MetricsAggregator::new());
        self.fetch_and_process(rt, accepted, &shutdown, &aggregator);

        let aggregator = Arc::try_unwrap(aggregator).unwrap_or_else(|_| {
            tracing::warn!("metrics aggregator still referenced at run end, summary may be incomplete");
            MetricsAggregator::new()
        });
        Ok(aggregator.finish())
    }

    fn wrap_filtered<S: VideoSource + 'static>(&self, source: S, rt: &Runtime) -> FilteredSource<'static, S> {
        let db = Arc::clone(&self.db);
        let handle = rt.handle().clone();
        let is_known: KnownPredicate<'static> =
            Box::new(move |id: &str| handle.block_on(db.is_ingested(id)).unwrap_or(false));
        FilteredSource::new(source, is_known, self.config.force)
    }

    fn prefilter(&self, rt: &Runtime) -> Result<Vec<VideoDescriptor>, IngestError> {
        let iter: Box<dyn Iterator<Item = chaffee_common::Result<VideoDescriptor>>> = match self.config.source_kind {
            SourceKind::LocalListing => {
                let manifest = default_manifest_path(&self.config.scratch_dir);
                let source = LocalListingSource::from_manifest(&manifest)?;
                Box::new(SourceIter::new(self.wrap_filtered(source, rt)))
            }
            SourceKind::ExternalApi => {
                let source = YoutubeChannelSource::new(
                    self.config.youtube_api_endpoint.clone(),
                    self.config.youtube_channel_id.clone(),
                    self.config.newest_first,
                );
                Box::new(SourceIter::new(self.wrap_filtered(source, rt)))
            }
        };

        Ok(self.collect_accepted(iter))
    }

    fn collect_accepted(
        &self,
        iter: Box<dyn Iterator<Item = chaffee_common::Result<VideoDescriptor>>>,
    ) -> Vec<VideoDescriptor> {
        let allow: Option<HashSet<String>> = if self.config.video_ids.is_empty() {
            None
        } else {
            Some(self.config.video_ids.iter().cloned().collect())
        };
        let cutoff = self
            .config
            .days_back
            .map(|d| chrono::Utc::now() - chrono::Duration::days(i64::from(d)));

        let mut accepted = Vec::new();
        let mut seen = 0usize;

        for item in iter {
            let descriptor = match item {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "video source reported an error, stopping enumeration");
                    break;
                }
            };
            seen += 1;

            if let Some(allow) = &allow {
                if !allow.contains(&descriptor.source_id) {
                    continue;
                }
            }
            if self.config.skip_shorts && descriptor.duration_s < SHORTS_THRESHOLD_S {
                continue;
            }
            if let Some(cutoff) = cutoff {
                if descriptor.published_at < cutoff {
                    continue;
                }
            }

            accepted.push(descriptor);

            if let Some(limit) = self.config.limit {
                let count = if self.config.limit_unprocessed { accepted.len() } else { seen };
                if count >= limit {
                    break;
                }
            }
        }

        accepted
    }

    fn fetch_and_process(
        &self,
        rt: &Runtime,
        accepted: Vec<VideoDescriptor>,
        shutdown: &Arc<AtomicBool>,
        aggregator: &Arc<MetricsAggregator>,
    ) {
        let queue = Arc::new(Mutex::new(VecDeque::from(accepted)));
        let (asr_tx, asr_rx) = sync_channel::<FetchedVideo>(2 * self.config.asr_workers.max(1));
        let asr_rx = Arc::new(Mutex::new(asr_rx));

        let io_handles: Vec<_> = (0..self.config.io_workers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let tx = asr_tx.clone();
                let shutdown = Arc::clone(shutdown);
                let config = Arc::clone(&self.config);
                let db = Arc::clone(&self.db);
                let handle = rt.handle().clone();
                thread::spawn(move || fetch_worker(&queue, &tx, &shutdown, &config, db.as_ref(), &handle))
            })
            .collect();
        drop(asr_tx);

        let asr_handles: Vec<_> = (0..self.config.asr_workers)
            .map(|_| {
                let rx = Arc::clone(&asr_rx);
                let shutdown = Arc::clone(shutdown);
                let config = Arc::clone(&self.config);
                let resources = self.resources.clone();
                let aggregator = Arc::clone(aggregator);
                let handle = rt.handle().clone();
                thread::spawn(move || asr_worker(&rx, &shutdown, &config, &resources, &aggregator, &handle))
            })
            .collect();

        for h in io_handles {
            let _ = h.join();
        }
        for h in asr_handles {
            let _ = h.join();
        }
    }
}

type FetchedVideo = (VideoDescriptor, PathBuf, Uuid);

fn install_signal_handler(rt: &Runtime, shutdown: Arc<AtomicBool>) {
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, draining in-flight videos");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
}

fn fetch_worker(
    queue: &Mutex<VecDeque<VideoDescriptor>>,
    tx: &SyncSender<FetchedVideo>,
    shutdown: &AtomicBool,
    config: &Config,
    db: &dyn SegmentsDatabase,
    handle: &Handle,
) {
    let remote_fetcher = YtDlpFetcher::new();
    let local_fetcher = LocalFileFetcher;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let descriptor = {
            let mut q = queue.lock().expect("fetch queue poisoned");
            q.pop_front()
        };
        let Some(descriptor) = descriptor else { break };

        let source_uuid = match handle.block_on(db.upsert_source(&descriptor)) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(source_id = %descriptor.source_id, error = %e, "failed to upsert source");
                continue;
            }
        };

        let fetch_result = match descriptor.source_type {
            chaffee_common::SourceType::Manual => local_fetcher.fetch(&descriptor, &config.scratch_dir),
            chaffee_common::SourceType::Youtube => remote_fetcher.fetch(&descriptor, &config.scratch_dir),
        };

        match fetch_result {
            Ok(fetched) => {
                if tx.send((descriptor, fetched.path, source_uuid)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(source_id = %descriptor.source_id, error = %e, "audio fetch failed");
                let status = if e.is_retryable() {
                    CheckpointStatus::TransientFail
                } else {
                    CheckpointStatus::PermanentFail
                };
                let record = CheckpointRecord {
                    source_id: descriptor.source_id.clone(),
                    phase: "fetch".to_string(),
                    status,
                    error_class: Some(e.error_class().to_string()),
                };
                let _ = handle.block_on(db.checkpoint(&record));
            }
        }
    }
}

fn asr_worker(
    rx: &Mutex<Receiver<FetchedVideo>>,
    shutdown: &AtomicBool,
    config: &Config,
    resources: &PipelineResources,
    aggregator: &MetricsAggregator,
    handle: &Handle,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let item = {
            let rx = rx.lock().expect("asr queue poisoned");
            rx.recv()
        };
        let Ok((descriptor, audio_path, source_uuid)) = item else { break };

        let timeout = Duration::from_secs(config.per_video_timeout_s);
        let result = run_with_timeout(&descriptor.source_id, timeout, {
            let resources = resources.clone();
            let descriptor = descriptor.clone();
            let audio_path = audio_path.clone();
            let handle = handle.clone();
            move || pipeline::process_video(&resources, &handle, &descriptor, &audio_path, source_uuid)
        });

        if config.cleanup_after {
            let _ = std::fs::remove_file(&audio_path);
        }

        match result {
            Ok(outcome) => {
                aggregator.record_video(&outcome.metrics);
                let record = CheckpointRecord {
                    source_id: descriptor.source_id.clone(),
                    phase: "ingest".to_string(),
                    status: CheckpointStatus::Success,
                    error_class: None,
                };
                let _ = handle.block_on(resources.db.checkpoint(&record));
            }
            Err(e) => {
                let retryable = e.is_retryable();
                if retryable {
                    aggregator.record_transient_failure();
                } else {
                    aggregator.record_permanent_failure();
                }
                let record = CheckpointRecord {
                    source_id: descriptor.source_id.clone(),
                    phase: "ingest".to_string(),
                    status: if retryable {
                        CheckpointStatus::TransientFail
                    } else {
                        CheckpointStatus::PermanentFail
                    },
                    error_class: Some(e.error_class().to_string()),
                };
                let _ = handle.block_on(resources.db.checkpoint(&record));
                tracing::error!(source_id = %descriptor.source_id, error = %e, "video ingestion failed");
            }
        }
    }
}

/// Runs `f` on a detached thread and waits up to `timeout`. On timeout the
/// thread is left to finish in the background (Rust has no safe
/// preemption); the caller treats the video as a failed attempt and moves
/// on to the next item in the queue.
fn run_with_timeout<F, T>(source_id: &str, timeout: Duration, f: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).unwrap_or_else(|_| {
        Err(IngestError::Timeout {
            source_id: source_id.to_string(),
            stage: "pipeline",
            elapsed: timeout,
        })
    })
}
