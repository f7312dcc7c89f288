//! Per-chunk quantization envelopes.
//!
//! Each run of [`CHUNK_SIZE`] reordered splats gets its own min/max for every
//! attribute, and the splats are rewritten in place relative to it.

use rayon::prelude::*;

use crate::common::{saturate, scale_precision_shape, square_centered01, RANGE_EPSILON};
use crate::structures::{ChunkInfo, InputSplat, CHUNK_SIZE};

/// Chunks handed to one worker at a time.
const CHUNKS_PER_TASK: usize = 8;

#[derive(Clone, Copy)]
struct Envelope<const D: usize> {
    min: [f32; D],
    max: [f32; D],
}

impl<const D: usize> Envelope<D> {
    fn new() -> Self {
        Self {
            min: [f32::INFINITY; D],
            max: [f32::NEG_INFINITY; D],
        }
    }

    #[inline]
    fn include(&mut self, v: [f32; D]) {
        for i in 0..D {
            self.min[i] = self.min[i].min(v[i]);
            self.max[i] = self.max[i].max(v[i]);
        }
    }

    fn widen(mut self) -> Self {
        for i in 0..D {
            self.max[i] = self.max[i].max(self.min[i] + RANGE_EPSILON);
        }
        self
    }

    #[inline]
    fn normalize(&self, v: [f32; D]) -> [f32; D] {
        std::array::from_fn(|i| {
            let range = self.max[i] - self.min[i];
            if range > 0.0 {
                saturate((v[i] - self.min[i]) / range)
            } else {
                0.0
            }
        })
    }

    fn pair(&self) -> ([f32; D], [f32; D]) {
        (self.min, self.max)
    }
}

/// Applies the precision-shaping remaps: scale to the 1/8th power and the
/// centered-square opacity curve.
#[inline]
pub fn shape_splat(s: &mut InputSplat) {
    s.scale = s.scale.map(scale_precision_shape);
    s.opacity = square_centered01(s.opacity);
}

#[inline]
fn color(s: &InputSplat) -> [f32; 4] {
    [s.dc0[0], s.dc0[1], s.dc0[2], s.opacity]
}

fn quantize_chunk(chunk: &mut [InputSplat]) -> ChunkInfo {
    let mut pos = Envelope::<3>::new();
    let mut scale = Envelope::<3>::new();
    let mut col = Envelope::<4>::new();
    let mut sh = Envelope::<3>::new();

    for s in chunk.iter_mut() {
        shape_splat(s);
        pos.include(s.pos);
        scale.include(s.scale);
        col.include(color(s));
        for term in &s.sh {
            sh.include(*term);
        }
    }

    let (pos, scale, col, sh) = (pos.widen(), scale.widen(), col.widen(), sh.widen());

    for s in chunk.iter_mut() {
        s.pos = pos.normalize(s.pos);
        s.scale = scale.normalize(s.scale);
        let c = col.normalize(color(s));
        s.dc0 = [c[0], c[1], c[2]];
        s.opacity = c[3];
        for term in s.sh.iter_mut() {
            *term = sh.normalize(*term);
        }
    }

    ChunkInfo::new(pos.pair(), scale.pair(), col.pair(), sh.pair())
}

/// Computes one [`ChunkInfo`] per chunk and normalizes every splat into
/// `[0, 1]` relative to its chunk.
pub fn quantize_chunks(splats: &mut [InputSplat]) -> Vec<ChunkInfo> {
    splats
        .par_chunks_mut(CHUNK_SIZE)
        .with_min_len(CHUNKS_PER_TASK)
        .map(quantize_chunk)
        .collect()
}

pub fn chunk_count(splat_count: usize) -> usize {
    splat_count.div_ceil(CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::SH_TERMS;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_splats(n: usize, seed: u64) -> Vec<InputSplat> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut sh = [[0.0; 3]; SH_TERMS];
                for t in sh.iter_mut() {
                    *t = [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)];
                }
                InputSplat {
                    pos: [rng.gen_range(-50.0..50.0), rng.gen_range(-5.0..5.0), rng.gen()],
                    rot: [1.0, 0.0, 0.0, 0.0],
                    scale: [rng.gen_range(1e-4..2.0), rng.gen_range(1e-4..2.0), rng.gen_range(1e-4..2.0)],
                    dc0: [rng.gen(), rng.gen(), rng.gen()],
                    opacity: rng.gen(),
                    sh,
                }
            })
            .collect()
    }

    #[test]
    fn one_envelope_per_started_chunk() {
        let mut splats = random_splats(300, 1);
        let chunks = quantize_chunks(&mut splats);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunk_count(300), 2);
        assert_eq!(chunk_count(256), 1);
        assert_eq!(chunk_count(257), 2);
    }

    #[test]
    fn normalized_values_stay_in_unit_range() {
        let mut splats = random_splats(1000, 2);
        quantize_chunks(&mut splats);
        let unit = |v: f32| (0.0..=1.0).contains(&v);
        for s in &splats {
            assert!(s.pos.iter().all(|&v| unit(v)));
            assert!(s.scale.iter().all(|&v| unit(v)));
            assert!(s.dc0.iter().all(|&v| unit(v)));
            assert!(unit(s.opacity));
            assert!(s.sh.iter().flatten().all(|&v| unit(v)));
        }
    }

    #[test]
    fn envelope_tracks_chunk_extremes() {
        let original = random_splats(256, 3);
        let mut splats = original.clone();
        let chunks = quantize_chunks(&mut splats);

        let min_x = original.iter().map(|s| s.pos[0]).fold(f32::INFINITY, f32::min);
        let max_x = original.iter().map(|s| s.pos[0]).fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(chunks[0].pos_range(0), (min_x, max_x));

        let max_scale = original
            .iter()
            .map(|s| s.scale[1].powf(0.125))
            .fold(f32::NEG_INFINITY, f32::max);
        let (_, hi) = chunks[0].scale_range(1);
        assert!((hi - max_scale).abs() < 1e-3);

        // the splat at the minimum maps to zero, the one at the maximum to one
        let i_min = original.iter().position(|s| s.pos[0] == min_x).unwrap();
        let i_max = original.iter().position(|s| s.pos[0] == max_x).unwrap();
        assert_eq!(splats[i_min].pos[0], 0.0);
        assert_eq!(splats[i_max].pos[0], 1.0);
    }

    #[test]
    fn degenerate_ranges_are_widened() {
        let mut splats = vec![InputSplat::at([2.0, 2.0, 2.0]); 10];
        let chunks = quantize_chunks(&mut splats);
        let (lo, hi) = chunks[0].pos_range(0);
        assert_eq!(lo, 2.0);
        assert_eq!(hi, 2.0 + RANGE_EPSILON);
        assert!(splats.iter().all(|s| s.pos == [0.0; 3]));
        assert!(splats.iter().all(|s| s.pos.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn sh_envelope_is_shared_across_terms() {
        let mut s = InputSplat::default();
        s.sh[0] = [-2.0, 0.0, 0.0];
        s.sh[14] = [3.0, 0.0, 0.0];
        let mut t = InputSplat::default();
        t.sh[7] = [0.5, 1.0, -1.0];
        let mut splats = vec![s, t];
        let chunks = quantize_chunks(&mut splats);
        assert_eq!(chunks[0].sh_range(0), (-2.0, 3.0));
        assert_eq!(chunks[0].sh_range(1), (0.0, 1.0));
        assert_eq!(chunks[0].sh_range(2), (-1.0, 0.0));
        assert_eq!(splats[0].sh[0][0], 0.0);
        assert_eq!(splats[0].sh[14][0], 1.0);
        assert_eq!(splats[1].sh[7][0], 0.5);
    }

    #[test]
    fn opacity_is_shaped_before_bounds() {
        let mut a = InputSplat::default();
        a.opacity = 0.25;
        let mut b = InputSplat::default();
        b.opacity = 1.0;
        let mut splats = vec![a, b];
        let chunks = quantize_chunks(&mut splats);
        let (lo, hi) = chunks[0].color_range(3);
        assert_eq!(lo, square_centered01(0.25));
        assert_eq!(hi, 1.0);
    }
}
