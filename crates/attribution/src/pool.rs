//! Shared voice-embedding lookup used by steps 3, 4 and 6: a cache keyed
//! by rounded `(start_s, end_s)` plus the pool of spans embedded while
//! probing clusters, consulted when attaching a final embedding to each
//! committed segment.

pub type SpanKey = (i64, i64);

pub fn span_key(start_s: f64, end_s: f64) -> SpanKey {
    ((start_s * 1000.0).round() as i64, (end_s * 1000.0).round() as i64)
}

#[derive(Debug, Clone)]
pub struct EmbeddedSpan {
    pub start_s: f64,
    pub end_s: f64,
    pub embedding: Vec<f32>,
}

fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

/// Step 6's fallback chain: best time-overlap, then nearest within
/// `near_window_s`, then closest regardless of distance. Returns `None`
/// only when `pool` is empty.
pub fn attach(pool: &[EmbeddedSpan], seg_start: f64, seg_end: f64, near_window_s: f64) -> Option<Vec<f32>> {
    if pool.is_empty() {
        return None;
    }

    let best_overlap = pool
        .iter()
        .map(|s| (overlap(seg_start, seg_end, s.start_s, s.end_s), s))
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    if let Some((ov, span)) = best_overlap {
        if ov > 0.0 {
            return Some(span.embedding.clone());
        }
    }

    let mid = (seg_start + seg_end) / 2.0;
    let nearest = pool
        .iter()
        .map(|s| {
            let span_mid = (s.start_s + s.end_s) / 2.0;
            ((mid - span_mid).abs(), s)
        })
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    if let Some((dist, span)) = nearest {
        if dist <= near_window_s {
            return Some(span.embedding.clone());
        }
        return Some(span.embedding.clone());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: f64, end: f64, val: f32) -> EmbeddedSpan {
        EmbeddedSpan {
            start_s: start,
            end_s: end,
            embedding: vec![val],
        }
    }

    #[test]
    fn prefers_best_overlap() {
        let pool = vec![span(0.0, 1.0, 1.0), span(5.0, 6.0, 2.0)];
        let result = attach(&pool, 4.5, 5.5, 10.0).unwrap();
        assert_eq!(result, vec![2.0]);
    }

    #[test]
    fn falls_back_to_nearest_in_time_when_no_overlap() {
        let pool = vec![span(0.0, 1.0, 1.0), span(100.0, 101.0, 2.0)];
        let result = attach(&pool, 2.0, 3.0, 10.0).unwrap();
        assert_eq!(result, vec![1.0]);
    }

    #[test]
    fn falls_back_to_closest_regardless_when_outside_window() {
        let pool = vec![span(0.0, 1.0, 1.0)];
        let result = attach(&pool, 500.0, 501.0, 10.0).unwrap();
        assert_eq!(result, vec![1.0]);
    }

    #[test]
    fn empty_pool_returns_none() {
        assert!(attach(&[], 0.0, 1.0, 10.0).is_none());
    }
}
