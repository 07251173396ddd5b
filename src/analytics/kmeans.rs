//! Seeded k-means (k-means++ initialization, Lloyd iterations)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Narrow clustering capability used by the wallet segmenter
pub trait Clusterer: Send + Sync {
    /// Assign every point a cluster id in `0..k`. Returns one label per point.
    fn cluster(&self, points: &[Vec<f64>], k: usize) -> Vec<usize>;
}

/// Deterministic k-means: fixed seed, `n_init` restarts, lowest inertia wins
#[derive(Debug, Clone)]
pub struct KMeans {
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iter: 300,
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

impl KMeans {
    /// k-means++ seeding: each new centroid drawn with probability proportional to D(x)^2
    fn init_centroids(&self, points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut centroids = Vec::with_capacity(k);
        centroids.push(points[rng.gen_range(0..points.len())].clone());

        while centroids.len() < k {
            let distances: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
            let total: f64 = distances.iter().sum();

            let next = if total <= 0.0 {
                rng.gen_range(0..points.len())
            } else {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = points.len() - 1;
                for (i, d) in distances.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            };

            centroids.push(points[next].clone());
        }

        centroids
    }

    /// One full Lloyd run. Returns (labels, inertia).
    fn run_once(&self, points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> (Vec<usize>, f64) {
        let dims = points[0].len();
        let mut centroids = self.init_centroids(points, k, rng);
        let mut labels = vec![usize::MAX; points.len()];

        for _ in 0..self.max_iter {
            let mut changed = false;
            for (i, p) in points.iter().enumerate() {
                let (label, _) = nearest(p, &centroids);
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
            }

            if !changed {
                break;
            }

            let mut sums = vec![vec![0.0; dims]; k];
            let mut counts = vec![0usize; k];
            for (p, &label) in points.iter().zip(&labels) {
                counts[label] += 1;
                for (s, v) in sums[label].iter_mut().zip(p) {
                    *s += v;
                }
            }

            // Empty clusters keep their previous centroid
            for (c, (sum, count)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
                if count > 0 {
                    *c = sum.into_iter().map(|s| s / count as f64).collect();
                }
            }
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &label)| squared_distance(p, &centroids[label]))
            .sum();

        (labels, inertia)
    }
}

impl Clusterer for KMeans {
    fn cluster(&self, points: &[Vec<f64>], k: usize) -> Vec<usize> {
        if points.is_empty() || k == 0 {
            return Vec::new();
        }

        let k = k.min(points.len());
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<(Vec<usize>, f64)> = None;

        for _ in 0..self.n_init.max(1) {
            let (labels, inertia) = self.run_once(points, k, &mut rng);
            match &best {
                Some((_, best_inertia)) if *best_inertia <= inertia => {}
                _ => best = Some((labels, inertia)),
            }
        }

        best.map(|(labels, _)| labels).unwrap_or_default()
    }
}
