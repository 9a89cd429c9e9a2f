//! Metrics & logging (spec §4.13, component C13): one structured record
//! per video plus an aggregate run summary, with warnings when the
//! reference-GPU targets (RTF ≤ 0.22, throughput 40-50 audio-hours per
//! wall-hour) are missed by more than half.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

const TARGET_RTF: f64 = 0.22;
const TARGET_THROUGHPUT_LOW: f64 = 40.0;
const TARGET_THROUGHPUT_HIGH: f64 = 50.0;

/// One video's worth of stage timings and pipeline counters, logged as a
/// structured record and folded into the run-level [`RunSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct VideoMetrics {
    pub source_id: String,
    pub audio_duration_s: f64,
    pub asr_wall_s: f64,
    pub diarize_wall_s: f64,
    pub voice_embed_wall_s: f64,
    pub text_embed_wall_s: f64,
    pub db_wall_s: f64,
    pub total_wall_s: f64,
    pub fast_path_used: bool,
    pub heterogeneous_cluster_count: usize,
    pub segments_written: usize,
    pub voice_cache_hits: usize,
    pub voice_cache_misses: usize,
}

impl VideoMetrics {
    #[must_use]
    pub fn rtf(&self) -> f64 {
        if self.audio_duration_s <= 0.0 {
            0.0
        } else {
            self.total_wall_s / self.audio_duration_s
        }
    }

    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.voice_cache_hits + self.voice_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.voice_cache_hits as f64 / total as f64
        }
    }
}

pub fn duration_secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Aggregate counters for the whole run, printed as a summary line at
/// exit and on SIGINT.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub videos_succeeded: usize,
    pub videos_permanent_failed: usize,
    pub videos_transient_failed: usize,
    pub videos_skipped: usize,
    pub total_audio_hours: f64,
    pub total_wall_hours: f64,
    pub fast_path_count: usize,
    pub heterogeneous_cluster_count: usize,
    pub segments_written: usize,
}

impl RunSummary {
    #[must_use]
    pub fn aggregate_rtf(&self) -> f64 {
        if self.total_audio_hours <= 0.0 {
            0.0
        } else {
            self.total_wall_hours / self.total_audio_hours
        }
    }

    #[must_use]
    pub fn throughput_audio_hours_per_wall_hour(&self) -> f64 {
        if self.total_wall_hours <= 0.0 {
            0.0
        } else {
            self.total_audio_hours / self.total_wall_hours
        }
    }
}

/// Collects per-video metrics as they arrive from `asr_workers` running
/// concurrently, and folds them into one [`RunSummary`] at the end.
#[derive(Default)]
pub struct MetricsAggregator {
    summary: Mutex<RunSummary>,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `metrics` as a structured record and folds it into the
    /// running aggregate.
    pub fn record_video(&self, metrics: &VideoMetrics) {
        let rtf = metrics.rtf();
        tracing::info!(
            source_id = metrics.source_id,
            audio_duration_s = metrics.audio_duration_s,
            asr_wall_s = metrics.asr_wall_s,
            diarize_wall_s = metrics.diarize_wall_s,
            voice_embed_wall_s = metrics.voice_embed_wall_s,
            text_embed_wall_s = metrics.text_embed_wall_s,
            db_wall_s = metrics.db_wall_s,
            total_wall_s = metrics.total_wall_s,
            rtf,
            fast_path_used = metrics.fast_path_used,
            heterogeneous_cluster_count = metrics.heterogeneous_cluster_count,
            segments_written = metrics.segments_written,
            cache_hit_rate = metrics.cache_hit_rate(),
            "video ingested"
        );

        if rtf > TARGET_RTF * 1.5 {
            tracing::warn!(
                source_id = metrics.source_id,
                rtf,
                target = TARGET_RTF,
                "RTF exceeded target by more than 50%"
            );
        }

        let mut summary = self.summary.lock().expect("metrics mutex poisoned");
        summary.videos_succeeded += 1;
        summary.total_audio_hours += metrics.audio_duration_s / 3600.0;
        summary.total_wall_hours += metrics.total_wall_s / 3600.0;
        summary.fast_path_count += usize::from(metrics.fast_path_used);
        summary.heterogeneous_cluster_count += metrics.heterogeneous_cluster_count;
        summary.segments_written += metrics.segments_written;
    }

    pub fn record_permanent_failure(&self) {
        self.summary.lock().expect("metrics mutex poisoned").videos_permanent_failed += 1;
    }

    pub fn record_transient_failure(&self) {
        self.summary.lock().expect("metrics mutex poisoned").videos_transient_failed += 1;
    }

    pub fn record_skip(&self) {
        self.summary.lock().expect("metrics mutex poisoned").videos_skipped += 1;
    }

    /// Consumes the aggregator, logging a final warning if run-level
    /// throughput missed the reference-GPU target by more than half.
    #[must_use]
    pub fn finish(self) -> RunSummary {
        let summary = self.summary.into_inner().expect("metrics mutex poisoned");
        let throughput = summary.throughput_audio_hours_per_wall_hour();
        if summary.total_wall_hours > 0.0 && throughput < TARGET_THROUGHPUT_LOW * 0.5 {
            tracing::warn!(
                throughput,
                target_low = TARGET_THROUGHPUT_LOW,
                target_high = TARGET_THROUGHPUT_HIGH,
                "run throughput missed target by more than 50%"
            );
        }
        tracing::info!(
            videos_succeeded = summary.videos_succeeded,
            videos_permanent_failed = summary.videos_permanent_failed,
            videos_transient_failed = summary.videos_transient_failed,
            videos_skipped = summary.videos_skipped,
            aggregate_rtf = summary.aggregate_rtf(),
            throughput,
            "run complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VideoMetrics {
        VideoMetrics {
            source_id: "v1".to_string(),
            audio_duration_s: 600.0,
            asr_wall_s: 60.0,
            diarize_wall_s: 10.0,
            voice_embed_wall_s: 5.0,
            text_embed_wall_s: 5.0,
            db_wall_s: 1.0,
            total_wall_s: 81.0,
            fast_path_used: true,
            heterogeneous_cluster_count: 0,
            segments_written: 42,
            voice_cache_hits: 8,
            voice_cache_misses: 2,
        }
    }

    #[test]
    fn rtf_is_wall_over_audio() {
        let m = sample();
        assert!((m.rtf() - (81.0 / 600.0)).abs() < 1e-9);
    }

    #[test]
    fn cache_hit_rate_divides_correctly() {
        let m = sample();
        assert!((m.cache_hit_rate() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn aggregator_folds_multiple_videos() {
        let agg = MetricsAggregator::new();
        agg.record_video(&sample());
        agg.record_video(&sample());
        agg.record_permanent_failure();
        let summary = agg.finish();
        assert_eq!(summary.videos_succeeded, 2);
        assert_eq!(summary.videos_permanent_failed, 1);
        assert_eq!(summary.segments_written, 84);
    }
}
