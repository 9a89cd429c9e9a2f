//! Threshold-based agglomerative clustering over speaker embeddings.
//!
//! Unlike k-means, the number of clusters is not fixed up front: the
//! merge threshold directly controls granularity (spec §4.6 — "a lower
//! value yields more clusters"). `min_speakers`/`max_speakers` act as
//! hard floors/ceilings on top of the threshold-driven result.

use ndarray::{Array1, Array2, Axis};

struct Cluster {
    members: Vec<usize>,
    centroid: Array1<f32>,
}

fn euclidean(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn recompute_centroid(embeddings: &Array2<f32>, members: &[usize]) -> Array1<f32> {
    let dim = embeddings.ncols();
    let mut sum = Array1::<f32>::zeros(dim);
    for &idx in members {
        sum = sum + embeddings.index_axis(Axis(0), idx);
    }
    sum / members.len() as f32
}

/// Returns one cluster id per row of `embeddings`, in input order. Ids
/// are contiguous starting at 0, assigned in order of first appearance.
pub fn agglomerative_cluster(
    embeddings: &Array2<f32>,
    threshold: f32,
    min_speakers: Option<usize>,
    max_speakers: Option<usize>,
) -> Vec<usize> {
    let n = embeddings.nrows();
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![0];
    }

    let mut clusters: Vec<Cluster> = (0..n)
        .map(|i| Cluster {
            members: vec![i],
            centroid: embeddings.index_axis(Axis(0), i).to_owned(),
        })
        .collect();

    loop {
        if clusters.len() <= 1 {
            break;
        }
        let floor = min_speakers.unwrap_or(1).max(1);
        let ceiling = max_speakers.unwrap_or(usize::MAX);

        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let d = euclidean(&clusters[i].centroid, &clusters[j].centroid);
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }

        let Some((i, j, dist)) = best else { break };

        let must_merge_for_ceiling = clusters.len() > ceiling;
        let allowed_by_floor = clusters.len() > floor;
        let within_threshold = dist < threshold;

        if !must_merge_for_ceiling && (!allowed_by_floor || !within_threshold) {
            break;
        }

        let removed = clusters.remove(j);
        clusters[i].members.extend(removed.members);
        clusters[i].centroid = recompute_centroid(embeddings, &clusters[i].members);
    }

    let mut labels = vec![0usize; n];
    for (cluster_id, cluster) in clusters.iter().enumerate() {
        for &idx in &cluster.members {
            labels[idx] = cluster_id;
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn single_segment_is_one_cluster() {
        let e = array![[1.0f32, 0.0]];
        assert_eq!(agglomerative_cluster(&e, 0.5, None, None), vec![0]);
    }

    #[test]
    fn tight_threshold_keeps_distinct_far_points_separate() {
        let e = array![[0.0f32, 0.0], [0.0, 0.0], [10.0, 10.0]];
        let labels = agglomerative_cluster(&e, 0.5, None, None);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn max_speakers_forces_merge_past_threshold() {
        let e = array![[0.0f32], [5.0], [10.0]];
        let labels = agglomerative_cluster(&e, 0.1, None, Some(1));
        assert!(labels.iter().all(|&l| l == labels[0]));
    }

    #[test]
    fn min_speakers_prevents_merging_below_floor() {
        let e = array![[0.0f32], [0.01], [0.02]];
        let labels = agglomerative_cluster(&e, 10.0, Some(2), None);
        let distinct: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(distinct.len(), 2);
    }
}
