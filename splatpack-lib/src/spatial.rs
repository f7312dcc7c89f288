//! Global bounds and Morton (Z-order) reordering.

use rayon::prelude::*;

use crate::structures::InputSplat;

/// Largest per-axis coordinate fed into the Morton code (21 bits).
const MORTON_SCALE: f32 = ((1u32 << 21) - 1) as f32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    const EMPTY: Bounds = Bounds {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    fn include(mut self, p: [f32; 3]) -> Self {
        for a in 0..3 {
            self.min[a] = self.min[a].min(p[a]);
            self.max[a] = self.max[a].max(p[a]);
        }
        self
    }

    fn union(self, other: Bounds) -> Self {
        Bounds {
            min: std::array::from_fn(|a| self.min[a].min(other.min[a])),
            max: std::array::from_fn(|a| self.max[a].max(other.max[a])),
        }
    }
}

/// Componentwise min/max of all positions.
pub fn calculate_bounds(splats: &[InputSplat]) -> Bounds {
    splats
        .par_iter()
        .fold(|| Bounds::EMPTY, |b, s| b.include(s.pos))
        .reduce(|| Bounds::EMPTY, Bounds::union)
}

/// Spreads the low 21 bits of `v` so that bit `i` lands on bit `3 * i`.
#[inline]
fn spread_bits_by_3(v: u64) -> u64 {
    let mut x = v & 0x1F_FFFF;
    x = (x | x << 32) & 0x001F_0000_0000_FFFF;
    x = (x | x << 16) & 0x001F_0000_FF00_00FF;
    x = (x | x << 8) & 0x100F_00F0_0F00_F00F;
    x = (x | x << 4) & 0x10C3_0C30_C30C_30C3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

#[inline]
pub fn morton_encode3(q: [u32; 3]) -> u64 {
    spread_bits_by_3(q[0] as u64)
        | (spread_bits_by_3(q[1] as u64) << 1)
        | (spread_bits_by_3(q[2] as u64) << 2)
}

/// Quantizes `pos` into the 21-bit lattice spanned by `bounds`.
#[inline]
pub fn quantize_position(pos: [f32; 3], bounds: &Bounds) -> [u32; 3] {
    std::array::from_fn(|a| {
        let extent = bounds.max[a] - bounds.min[a];
        if extent > 0.0 {
            ((pos[a] - bounds.min[a]) / extent * MORTON_SCALE)
                .floor()
                .clamp(0.0, MORTON_SCALE) as u32
        } else {
            0
        }
    })
}

#[inline]
pub fn morton_code(pos: [f32; 3], bounds: &Bounds) -> u64 {
    morton_encode3(quantize_position(pos, bounds))
}

/// Permutes `splats` into ascending Morton order. Splats sharing a code keep
/// their input order.
pub fn reorder_morton(splats: Vec<InputSplat>, bounds: &Bounds) -> Vec<InputSplat> {
    let mut keys: Vec<(u64, u32)> = splats
        .par_iter()
        .enumerate()
        .map(|(i, s)| (morton_code(s.pos, bounds), i as u32))
        .collect();
    // (code, index) pairs are unique, so the unstable sort is a total order.
    keys.par_sort_unstable();

    keys.par_iter().map(|&(_, i)| splats[i as usize]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn naive_morton(q: [u32; 3]) -> u64 {
        let mut code = 0u64;
        for bit in 0..21 {
            for (axis, v) in q.iter().enumerate() {
                code |= (((*v as u64) >> bit) & 1) << (3 * bit + axis);
            }
        }
        code
    }

    #[test]
    fn morton_matches_bitwise_definition() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let q = [
                rng.gen_range(0..1u32 << 21),
                rng.gen_range(0..1u32 << 21),
                rng.gen_range(0..1u32 << 21),
            ];
            assert_eq!(morton_encode3(q), naive_morton(q));
        }
        let top = (1u32 << 21) - 1;
        assert_eq!(morton_encode3([top; 3]), (1u64 << 63) - 1);
    }

    #[test]
    fn bounds_cover_all_positions() {
        let splats = vec![
            InputSplat::at([1.0, -2.0, 3.0]),
            InputSplat::at([-4.0, 5.0, 0.5]),
            InputSplat::at([0.0, 0.0, 9.0]),
        ];
        let b = calculate_bounds(&splats);
        assert_eq!(b.min, [-4.0, -2.0, 0.5]);
        assert_eq!(b.max, [1.0, 5.0, 9.0]);
    }

    #[test]
    fn single_point_bounds_collapse() {
        let splats = vec![InputSplat::at([1.0, 2.0, 3.0])];
        let b = calculate_bounds(&splats);
        assert_eq!(b.min, [1.0, 2.0, 3.0]);
        assert_eq!(b.max, [1.0, 2.0, 3.0]);
        assert_eq!(quantize_position([1.0, 2.0, 3.0], &b), [0, 0, 0]);
    }

    #[test]
    fn quantization_hits_lattice_corners() {
        let b = Bounds {
            min: [0.0; 3],
            max: [1.0; 3],
        };
        assert_eq!(quantize_position([0.0; 3], &b), [0; 3]);
        assert_eq!(quantize_position([1.0; 3], &b), [(1 << 21) - 1; 3]);
    }

    #[test]
    fn identical_positions_keep_input_order() {
        let mut a = InputSplat::at([0.5, 0.5, 0.5]);
        a.opacity = 0.1;
        let mut b = InputSplat::at([0.5, 0.5, 0.5]);
        b.opacity = 0.9;
        let far = InputSplat::at([0.0, 0.0, 0.0]);
        let splats = vec![a, far, b, InputSplat::at([1.0, 1.0, 1.0])];

        let bounds = calculate_bounds(&splats);
        let sorted = reorder_morton(splats, &bounds);
        let opacities: Vec<f32> = sorted
            .iter()
            .filter(|s| s.pos == [0.5, 0.5, 0.5])
            .map(|s| s.opacity)
            .collect();
        assert_eq!(opacities, vec![0.1, 0.9]);
        assert_eq!(sorted[0].pos, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn order_is_a_function_of_positions() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let splats: Vec<InputSplat> = (0..2000)
            .map(|_| InputSplat::at([rng.gen(), rng.gen(), rng.gen::<f32>() * 10.0]))
            .collect();
        let mut shuffled = splats.clone();
        shuffled.shuffle(&mut rng);

        let b1 = calculate_bounds(&splats);
        let b2 = calculate_bounds(&shuffled);
        assert_eq!(b1, b2);

        let s1 = reorder_morton(splats, &b1);
        let s2 = reorder_morton(shuffled, &b2);
        assert_eq!(s1, s2);

        let codes: Vec<u64> = s1.iter().map(|s| morton_code(s.pos, &b1)).collect();
        assert!(codes.windows(2).all(|w| w[0] <= w[1]));
    }
}
