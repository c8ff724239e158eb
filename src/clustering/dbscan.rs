// DBSCAN over cosine distance.
//
// Points are visited in input order and clusters are numbered in the order
// they are discovered, so a fixed input order gives a fixed result. Border
// points reachable from two clusters go to whichever claims them first.
//
// O(n²) neighbour search. Evaluation corpora are thousands of comments, not
// millions, so a spatial index isn't worth it yet.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Maximum cosine distance between neighbours (0 = identical direction).
    pub eps: f64,
    /// Neighbourhood size (including the point itself) for a core point.
    pub min_samples: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: 0.35,
            min_samples: 3,
        }
    }
}

/// Cosine distance in [0, 2]. A zero vector is at distance 1 from everything.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    let denom = mag_a * mag_b;
    if denom < f64::EPSILON {
        1.0
    } else {
        1.0 - (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Label each point with a cluster index, or `None` for noise.
pub fn dbscan(points: &[Vec<f64>], params: &ClusterParams) -> Vec<Option<usize>> {
    let n = points.len();
    let min_samples = params.min_samples.max(1);

    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| cosine_distance(&points[i], &points[j]) <= params.eps)
                .collect()
        })
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0usize;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        if neighbours[i].len() < min_samples {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut frontier: Vec<usize> = neighbours[i].clone();
        let mut cursor = 0;
        while cursor < frontier.len() {
            let j = frontier[cursor];
            cursor += 1;

            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            if neighbours[j].len() >= min_samples {
                frontier.extend(neighbours[j].iter().copied());
            }
        }
    }

    labels
}
