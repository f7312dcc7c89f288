//! Per-splat format encoders.
//!
//! Each encoder fills a fixed-size record per splat. Work is split into
//! static ranges of [`SPLATS_PER_TASK`] splats that write disjoint slices of
//! the output.

use rayon::prelude::*;
use zerocopy::IntoBytes;

use crate::common::pack_smallest3_rotation;
use crate::format::{encode_quat_norm10, ShFormat, VectorFormat};
use crate::structures::{ChunkInfo, InputSplat, SH_TERMS};

pub const SPLATS_PER_TASK: usize = 4096;

/// Buffers are stored padded to this many bytes.
pub const BUFFER_ALIGNMENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl EncodedBuffer {
    fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0; len.next_multiple_of(BUFFER_ALIGNMENT)],
            len,
        }
    }

    fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::zeroed(data.len());
        buf.bytes[..data.len()].copy_from_slice(data);
        buf
    }

    /// The records without trailing alignment padding.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The bytes as persisted, padded to [`BUFFER_ALIGNMENT`].
    pub fn padded(&self) -> &[u8] {
        &self.bytes
    }
}

fn encode_records<F>(count: usize, record_size: usize, encode: F) -> EncodedBuffer
where
    F: Fn(usize, &mut [u8]) + Sync,
{
    let len = count * record_size;
    let mut buf = EncodedBuffer::zeroed(len);
    buf.bytes[..len]
        .par_chunks_mut(record_size * SPLATS_PER_TASK)
        .enumerate()
        .for_each(|(task, dst)| {
            let first = task * SPLATS_PER_TASK;
            for (j, record) in dst.chunks_exact_mut(record_size).enumerate() {
                encode(first + j, record);
            }
        });
    buf
}

pub fn encode_chunks(chunks: &[ChunkInfo]) -> EncodedBuffer {
    EncodedBuffer::from_slice(chunks.as_bytes())
}

pub fn encode_positions(splats: &[InputSplat], format: VectorFormat) -> EncodedBuffer {
    encode_records(splats.len(), format.byte_size(), |i, out| {
        format.encode(splats[i].pos, out)
    })
}

pub const fn other_record_size(scale_format: VectorFormat, with_sh_index: bool) -> usize {
    4 + scale_format.byte_size() + if with_sh_index { 2 } else { 0 }
}

/// Rotation, scale and the optional SH cluster index.
pub fn encode_other(
    splats: &[InputSplat],
    scale_format: VectorFormat,
    sh_indices: Option<&[u16]>,
) -> EncodedBuffer {
    let record_size = other_record_size(scale_format, sh_indices.is_some());
    let scale_end = 4 + scale_format.byte_size();
    encode_records(splats.len(), record_size, |i, out| {
        let s = &splats[i];
        let rot = encode_quat_norm10(pack_smallest3_rotation(s.rot));
        out[0..4].copy_from_slice(&rot.to_le_bytes());
        scale_format.encode(s.scale, &mut out[4..scale_end]);
        if let Some(indices) = sh_indices {
            out[scale_end..scale_end + 2].copy_from_slice(&indices[i].to_le_bytes());
        }
    })
}

/// RGBA as four little-endian floats regardless of the color format tag.
pub fn encode_colors(splats: &[InputSplat]) -> EncodedBuffer {
    encode_records(splats.len(), 16, |i, out| {
        let s = &splats[i];
        let rgba = [s.dc0[0], s.dc0[1], s.dc0[2], s.opacity];
        for (dst, v) in out.chunks_exact_mut(4).zip(rgba) {
            dst.copy_from_slice(&v.to_le_bytes());
        }
    })
}

/// Per-splat SH records at the precision of `format`.
pub fn encode_sh(splats: &[InputSplat], format: ShFormat) -> EncodedBuffer {
    encode_records(splats.len(), format.record_size(), |i, out| {
        format.encode(&splats[i].sh, out)
    })
}

/// Cluster centroids as half precision records.
pub fn encode_sh_table(table: &[[[f32; 3]; SH_TERMS]]) -> EncodedBuffer {
    let format = ShFormat::Float16;
    encode_records(table.len(), format.record_size(), |i, out| {
        format.encode(&table[i], out)
    })
}
