use serde::{Deserialize, Serialize};
use zerocopy::byteorder::little_endian::{F32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::common::{pack_half2, unpack_half2};
use crate::format::{ColorFormat, ShFormat, VectorFormat};

pub const FORMAT_VERSION: u32 = 1;
pub const CHUNK_SIZE: usize = 256;
pub const SH_TERMS: usize = 15;
pub const SH_DIM: usize = SH_TERMS * 3;

/// One Gaussian splat as handed over by the input reader.
///
/// `rot` is stored as (w, x, y, z), `scale` is linear and `opacity` is in
/// `[0, 1]`. `sh[t]` holds the RGB triplet of higher-order term `t + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSplat {
    pub pos: [f32; 3],
    pub rot: [f32; 4],
    pub scale: [f32; 3],
    pub dc0: [f32; 3],
    pub opacity: f32,
    pub sh: [[f32; 3]; SH_TERMS],
}

impl Default for InputSplat {
    fn default() -> Self {
        Self {
            pos: [0.0; 3],
            rot: [1.0, 0.0, 0.0, 0.0],
            scale: [1.0; 3],
            dc0: [0.5; 3],
            opacity: 1.0,
            sh: [[0.0; 3]; SH_TERMS],
        }
    }
}

impl InputSplat {
    pub fn at(pos: [f32; 3]) -> Self {
        Self {
            pos,
            ..Self::default()
        }
    }

    /// The 45 SH coefficients flattened term-major (term 1 RGB, term 2 RGB, ...).
    pub fn sh_vector(&self) -> [f32; SH_DIM] {
        let mut out = [0.0; SH_DIM];
        for (dst, src) in out.chunks_exact_mut(3).zip(self.sh.iter()) {
            dst.copy_from_slice(src);
        }
        out
    }
}

/// Quantization envelope of one 256-splat chunk, exactly as laid out on disk.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ChunkInfo {
    pub col_r: U32,
    pub col_g: U32,
    pub col_b: U32,
    pub col_a: U32,
    pub pos_x: [F32; 2],
    pub pos_y: [F32; 2],
    pub pos_z: [F32; 2],
    pub scl_x: U32,
    pub scl_y: U32,
    pub scl_z: U32,
    pub sh_r: U32,
    pub sh_g: U32,
    pub sh_b: U32,
}

const _: () = assert!(size_of::<ChunkInfo>() == 64);

#[inline]
fn half_range(min: f32, max: f32) -> U32 {
    U32::new(pack_half2(min, max))
}

impl ChunkInfo {
    pub const SIZE: usize = size_of::<Self>();

    pub(crate) fn new(
        pos: ([f32; 3], [f32; 3]),
        scale: ([f32; 3], [f32; 3]),
        color: ([f32; 4], [f32; 4]),
        sh: ([f32; 3], [f32; 3]),
    ) -> Self {
        let pair = |lo: f32, hi: f32| [F32::new(lo), F32::new(hi)];
        Self {
            col_r: half_range(color.0[0], color.1[0]),
            col_g: half_range(color.0[1], color.1[1]),
            col_b: half_range(color.0[2], color.1[2]),
            col_a: half_range(color.0[3], color.1[3]),
            pos_x: pair(pos.0[0], pos.1[0]),
            pos_y: pair(pos.0[1], pos.1[1]),
            pos_z: pair(pos.0[2], pos.1[2]),
            scl_x: half_range(scale.0[0], scale.1[0]),
            scl_y: half_range(scale.0[1], scale.1[1]),
            scl_z: half_range(scale.0[2], scale.1[2]),
            sh_r: half_range(sh.0[0], sh.1[0]),
            sh_g: half_range(sh.0[1], sh.1[1]),
            sh_b: half_range(sh.0[2], sh.1[2]),
        }
    }

    pub fn pos_range(&self, axis: usize) -> (f32, f32) {
        let p = [&self.pos_x, &self.pos_y, &self.pos_z][axis];
        (p[0].get(), p[1].get())
    }

    pub fn scale_range(&self, axis: usize) -> (f32, f32) {
        unpack_half2([self.scl_x, self.scl_y, self.scl_z][axis].get())
    }

    pub fn color_range(&self, channel: usize) -> (f32, f32) {
        unpack_half2([self.col_r, self.col_g, self.col_b, self.col_a][channel].get())
    }

    pub fn sh_range(&self, channel: usize) -> (f32, f32) {
        unpack_half2([self.sh_r, self.sh_g, self.sh_b][channel].get())
    }
}

/// Views a chunk buffer as its records; `None` if the length is not a whole
/// number of records.
pub fn chunks_from_bytes(bytes: &[u8]) -> Option<&[ChunkInfo]> {
    <[ChunkInfo]>::ref_from_bytes(bytes).ok()
}

/// Pass-through camera metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub pos: [f32; 3],
    pub axis_x: [f32; 3],
    pub axis_y: [f32; 3],
    pub axis_z: [f32; 3],
    pub fov: f32,
}

/// The metadata record persisted next to the buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub format_version: u32,
    pub splat_count: u32,
    pub pos_format: VectorFormat,
    pub scale_format: VectorFormat,
    pub color_format: ColorFormat,
    pub sh_format: ShFormat,
    /// Number of entries in the SH buffer (centroids when clustered).
    pub sh_count: u32,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cameras: Option<Vec<Camera>>,
    pub data_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_file: Option<String>,
    pub pos_file: String,
    pub other_file: String,
    pub color_file: String,
    pub sh_file: String,
}
