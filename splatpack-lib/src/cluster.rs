//! Mini-batch k-means over spherical-harmonics vectors.
//!
//! Centroids start from evenly strided rows (the input is spatially sorted, so
//! this spreads them over the scene). Nearest-centroid searches run in
//! parallel; centroid updates are applied sequentially in batch order so the
//! result only depends on the seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::error::PackError;
use crate::structures::{InputSplat, SH_DIM, SH_TERMS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeans {
    pub k: usize,
    pub batch_size: usize,
    /// Number of batch samples, as a fraction of the dataset size.
    pub passes: f32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct Clustering {
    pub dim: usize,
    /// `k * dim` centroid components.
    pub centroids: Vec<f32>,
    /// Nearest centroid of every input vector.
    pub labels: Vec<u32>,
}

impl Clustering {
    pub fn centroid(&self, i: usize) -> &[f32] {
        &self.centroids[i * self.dim..(i + 1) * self.dim]
    }
}

#[inline]
fn distance_sq(a: &[f32], b: &[f32], limit: f32) -> f32 {
    let mut d = 0.0;
    for (x, y) in a.chunks(8).zip(b.chunks(8)) {
        for (p, q) in x.iter().zip(y) {
            let t = p - q;
            d += t * t;
        }
        if d >= limit {
            break;
        }
    }
    d
}

/// Index of the closest centroid; the lowest index wins ties.
#[inline]
fn nearest(centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (i, c) in centroids.chunks_exact(dim).enumerate() {
        let d = distance_sq(v, c, best_d);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

impl KMeans {
    pub fn iterations(&self, n: usize) -> usize {
        ((self.passes * n as f32) / self.batch_size as f32)
            .ceil()
            .max(1.0) as usize
    }

    /// Clusters `data` (rows of `dim` floats). Requires `0 < k < rows`.
    pub fn run(
        &self,
        data: &[f32],
        dim: usize,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Clustering, PackError> {
        let n = if dim == 0 { 0 } else { data.len() / dim };
        if self.k == 0 || self.k >= n {
            return Err(PackError::InvalidSettings(format!(
                "k-means needs 0 < k < rows, got k = {} for {} rows",
                self.k, n
            )));
        }
        if self.batch_size == 0 {
            return Err(PackError::InvalidSettings(
                "k-means batch size must be positive".to_string(),
            ));
        }
        let row = |i: usize| &data[i * dim..(i + 1) * dim];

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let offset = rng.gen_range(0..n / self.k);
        let mut centroids = Vec::with_capacity(self.k * dim);
        for j in 0..self.k {
            centroids.extend_from_slice(row(j * n / self.k + offset));
        }

        let iterations = self.iterations(n);
        let mut counts = vec![0u32; self.k];
        let mut batch = Vec::with_capacity(self.batch_size);
        for it in 0..iterations {
            batch.clear();
            batch.extend((0..self.batch_size).map(|_| rng.gen_range(0..n)));

            let assigned: Vec<usize> = batch
                .par_iter()
                .map(|&i| nearest(&centroids, dim, row(i)))
                .collect();

            for (&i, &c) in batch.iter().zip(&assigned) {
                counts[c] += 1;
                let eta = 1.0 / counts[c] as f32;
                let centroid = &mut centroids[c * dim..(c + 1) * dim];
                for (m, x) in centroid.iter_mut().zip(row(i)) {
                    *m += eta * (x - *m);
                }
            }

            progress((it + 1) as f32 / (iterations + 1) as f32);
        }
        debug!(k = self.k, n, iterations, "k-means batches done");

        let labels = (0..n)
            .into_par_iter()
            .with_min_len(256)
            .map(|i| nearest(&centroids, dim, row(i)) as u32)
            .collect();
        progress(1.0);

        Ok(Clustering {
            dim,
            centroids,
            labels,
        })
    }
}

/// Shared SH table plus the per-splat index into it.
#[derive(Debug, Clone)]
pub struct ShClusters {
    pub table: Vec<[[f32; 3]; SH_TERMS]>,
    pub indices: Vec<u16>,
}

/// Replaces every splat's SH coefficients by the nearest of `params.k`
/// centroids.
pub fn cluster_sh(
    splats: &[InputSplat],
    params: &KMeans,
    progress: &mut dyn FnMut(f32),
) -> Result<ShClusters, PackError> {
    let data: Vec<f32> = splats
        .par_iter()
        .flat_map_iter(|s| s.sh_vector())
        .collect();

    let clustering = params.run(&data, SH_DIM, progress)?;

    let table = (0..params.k)
        .map(|i| {
            let c = clustering.centroid(i);
            std::array::from_fn(|t| [c[t * 3], c[t * 3 + 1], c[t * 3 + 2]])
        })
        .collect();
    let indices = clustering.labels.iter().map(|&l| l as u16).collect();

    Ok(ShClusters { table, indices })
}
