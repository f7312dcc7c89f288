//! Format selectors and their bit-exact encodings.
//!
//! Every packed encoding expects its input already mapped into `[0, 1]` and
//! saturates before quantizing. A `b`-bit field stores `trunc(v * (2^b - 0.5))`,
//! so decoding is off by less than one step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{half_bits, half_to_float, saturate};
use crate::error::PackError;
use crate::structures::SH_TERMS;

/// SH records carry one padding slot after the 15 terms.
const SH_SLOTS: usize = SH_TERMS + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorFormat {
    Float32,
    Norm16,
    Norm11,
    Norm6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    Float32x4,
    Float16x4,
    Norm8x4,
    BC7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShFormat {
    Float32,
    Float16,
    Norm11,
    Norm6,
    Cluster64k,
    Cluster32k,
    Cluster16k,
    Cluster8k,
    Cluster4k,
}

#[inline]
pub fn encode_norm16(v: [f32; 3]) -> u64 {
    let v = v.map(saturate);
    ((v[0] * 65535.5) as u64) | (((v[1] * 65535.5) as u64) << 16) | (((v[2] * 65535.5) as u64) << 32)
}

#[inline]
pub fn decode_norm16(enc: u64) -> [f32; 3] {
    [
        (enc & 0xFFFF) as f32 / 65535.0,
        ((enc >> 16) & 0xFFFF) as f32 / 65535.0,
        ((enc >> 32) & 0xFFFF) as f32 / 65535.0,
    ]
}

/// 11/10/11 bits, x in the low bits.
#[inline]
pub fn encode_norm11(v: [f32; 3]) -> u32 {
    let v = v.map(saturate);
    ((v[0] * 2047.5) as u32) | (((v[1] * 1023.5) as u32) << 11) | (((v[2] * 2047.5) as u32) << 21)
}

#[inline]
pub fn decode_norm11(enc: u32) -> [f32; 3] {
    [
        (enc & 0x7FF) as f32 / 2047.0,
        ((enc >> 11) & 0x3FF) as f32 / 1023.0,
        ((enc >> 21) & 0x7FF) as f32 / 2047.0,
    ]
}

/// 6/5/5 bits, used by the vector formats.
#[inline]
pub fn encode_norm655(v: [f32; 3]) -> u16 {
    let v = v.map(saturate);
    (((v[0] * 63.5) as u32) | (((v[1] * 31.5) as u32) << 6) | (((v[2] * 31.5) as u32) << 11)) as u16
}

#[inline]
pub fn decode_norm655(enc: u16) -> [f32; 3] {
    let enc = enc as u32;
    [
        (enc & 0x3F) as f32 / 63.0,
        ((enc >> 6) & 0x1F) as f32 / 31.0,
        ((enc >> 11) & 0x1F) as f32 / 31.0,
    ]
}

/// 5/6/5 bits, used by the low precision SH format.
#[inline]
pub fn encode_norm565(v: [f32; 3]) -> u16 {
    let v = v.map(saturate);
    (((v[0] * 31.5) as u32) | (((v[1] * 63.5) as u32) << 5) | (((v[2] * 31.5) as u32) << 11)) as u16
}

#[inline]
pub fn decode_norm565(enc: u16) -> [f32; 3] {
    let enc = enc as u32;
    [
        (enc & 0x1F) as f32 / 31.0,
        ((enc >> 5) & 0x3F) as f32 / 63.0,
        ((enc >> 11) & 0x1F) as f32 / 31.0,
    ]
}

/// Packs a smallest-three rotation as 10/10/10/2 bits.
#[inline]
pub fn encode_quat_norm10(v: [f32; 4]) -> u32 {
    let v = v.map(saturate);
    ((v[0] * 1023.5) as u32)
        | (((v[1] * 1023.5) as u32) << 10)
        | (((v[2] * 1023.5) as u32) << 20)
        | (((v[3] * 3.5) as u32) << 30)
}

#[inline]
pub fn decode_quat_norm10(enc: u32) -> [f32; 4] {
    [
        (enc & 0x3FF) as f32 / 1023.0,
        ((enc >> 10) & 0x3FF) as f32 / 1023.0,
        ((enc >> 20) & 0x3FF) as f32 / 1023.0,
        (enc >> 30) as f32 / 3.0,
    ]
}

impl VectorFormat {
    pub const fn byte_size(self) -> usize {
        match self {
            VectorFormat::Float32 => 12,
            VectorFormat::Norm16 => 6,
            VectorFormat::Norm11 => 4,
            VectorFormat::Norm6 => 2,
        }
    }

    /// Writes `v` into `out[..self.byte_size()]`, little-endian.
    pub fn encode(self, v: [f32; 3], out: &mut [u8]) {
        match self {
            VectorFormat::Float32 => {
                out[0..4].copy_from_slice(&v[0].to_le_bytes());
                out[4..8].copy_from_slice(&v[1].to_le_bytes());
                out[8..12].copy_from_slice(&v[2].to_le_bytes());
            }
            VectorFormat::Norm16 => {
                let enc = encode_norm16(v);
                out[0..4].copy_from_slice(&(enc as u32).to_le_bytes());
                out[4..6].copy_from_slice(&((enc >> 32) as u16).to_le_bytes());
            }
            VectorFormat::Norm11 => {
                out[0..4].copy_from_slice(&encode_norm11(v).to_le_bytes());
            }
            VectorFormat::Norm6 => {
                out[0..2].copy_from_slice(&encode_norm655(v).to_le_bytes());
            }
        }
    }

    pub fn decode(self, bytes: &[u8]) -> [f32; 3] {
        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        match self {
            VectorFormat::Float32 => [
                f32::from_bits(u32_at(0)),
                f32::from_bits(u32_at(4)),
                f32::from_bits(u32_at(8)),
            ],
            VectorFormat::Norm16 => {
                decode_norm16(u32_at(0) as u64 | ((u16_at(4) as u64) << 32))
            }
            VectorFormat::Norm11 => decode_norm11(u32_at(0)),
            VectorFormat::Norm6 => decode_norm655(u16_at(0)),
        }
    }
}

impl ShFormat {
    /// Centroid count for the cluster tiers.
    pub const fn cluster_count(self) -> Option<usize> {
        match self {
            ShFormat::Cluster64k => Some(64 * 1024),
            ShFormat::Cluster32k => Some(32 * 1024),
            ShFormat::Cluster16k => Some(16 * 1024),
            ShFormat::Cluster8k => Some(8 * 1024),
            ShFormat::Cluster4k => Some(4 * 1024),
            _ => None,
        }
    }

    /// Passes over the data made by the clusterer; smaller tiers refine longer.
    pub const fn cluster_passes(self) -> Option<f32> {
        match self {
            ShFormat::Cluster64k => Some(0.3),
            ShFormat::Cluster32k => Some(0.4),
            ShFormat::Cluster16k => Some(0.5),
            ShFormat::Cluster8k => Some(0.8),
            ShFormat::Cluster4k => Some(1.2),
            _ => None,
        }
    }

    pub const fn is_clustered(self) -> bool {
        self.cluster_count().is_some()
    }

    /// Bytes per SH table entry. Cluster tables use half precision records.
    pub const fn record_size(self) -> usize {
        match self {
            ShFormat::Float32 => SH_SLOTS * 12,
            ShFormat::Norm11 => SH_SLOTS * 4,
            ShFormat::Norm6 => SH_SLOTS * 2,
            _ => SH_SLOTS * 6,
        }
    }

    /// Writes one table entry into `out[..self.record_size()]`.
    pub fn encode(self, sh: &[[f32; 3]; SH_TERMS], out: &mut [u8]) {
        let out = &mut out[..self.record_size()];
        out.fill(0);
        match self {
            ShFormat::Float32 => {
                for (dst, rgb) in out.chunks_exact_mut(12).zip(sh) {
                    for (d, c) in dst.chunks_exact_mut(4).zip(rgb) {
                        d.copy_from_slice(&c.to_le_bytes());
                    }
                }
            }
            ShFormat::Norm11 => {
                for (dst, rgb) in out.chunks_exact_mut(4).zip(sh) {
                    dst.copy_from_slice(&encode_norm11(*rgb).to_le_bytes());
                }
            }
            ShFormat::Norm6 => {
                for (dst, rgb) in out.chunks_exact_mut(2).zip(sh) {
                    dst.copy_from_slice(&encode_norm565(*rgb).to_le_bytes());
                }
            }
            _ => {
                for (dst, rgb) in out.chunks_exact_mut(6).zip(sh) {
                    for (d, c) in dst.chunks_exact_mut(2).zip(rgb) {
                        d.copy_from_slice(&half_bits(*c).to_le_bytes());
                    }
                }
            }
        }
    }

    pub fn decode(self, bytes: &[u8]) -> [[f32; 3]; SH_TERMS] {
        let mut out = [[0.0; 3]; SH_TERMS];
        match self {
            ShFormat::Float32 => {
                for (rgb, src) in out.iter_mut().zip(bytes.chunks_exact(12)) {
                    for (c, s) in rgb.iter_mut().zip(src.chunks_exact(4)) {
                        *c = f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                    }
                }
            }
            ShFormat::Norm11 => {
                for (rgb, s) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                    *rgb = decode_norm11(u32::from_le_bytes([s[0], s[1], s[2], s[3]]));
                }
            }
            ShFormat::Norm6 => {
                for (rgb, s) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                    *rgb = decode_norm565(u16::from_le_bytes([s[0], s[1]]));
                }
            }
            _ => {
                for (rgb, src) in out.iter_mut().zip(bytes.chunks_exact(6)) {
                    for (c, s) in rgb.iter_mut().zip(src.chunks_exact(2)) {
                        *c = half_to_float(u16::from_le_bytes([s[0], s[1]]));
                    }
                }
            }
        }
        out
    }
}

macro_rules! named_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub const fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = PackError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lower = s.trim().to_ascii_lowercase();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == lower)
                    .ok_or_else(|| {
                        let names: Vec<&str> = $ty::ALL.iter().map(|v| v.name()).collect();
                        PackError::InvalidSettings(format!(
                            "unknown {} '{}', expected one of: {}",
                            stringify!($ty),
                            s,
                            names.join(", ")
                        ))
                    })
            }
        }
    };
}

named_enum!(VectorFormat {
    Float32 => "float32",
    Norm16 => "norm16",
    Norm11 => "norm11",
    Norm6 => "norm6",
});

named_enum!(ColorFormat {
    Float32x4 => "float32x4",
    Float16x4 => "float16x4",
    Norm8x4 => "norm8x4",
    BC7 => "bc7",
});

named_enum!(ShFormat {
    Float32 => "float32",
    Float16 => "float16",
    Norm11 => "norm11",
    Norm6 => "norm6",
    Cluster64k => "cluster64k",
    Cluster32k => "cluster32k",
    Cluster16k => "cluster16k",
    Cluster8k => "cluster8k",
    Cluster4k => "cluster4k",
});

named_enum!(Quality {
    VeryLow => "very-low",
    Low => "low",
    Medium => "medium",
    High => "high",
    VeryHigh => "very-high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quality {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

pub const DEFAULT_CLUSTER_BATCH: usize = 2048;
pub const DEFAULT_CLUSTER_SEED: u64 = 0x5EED_C1A5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterOptions {
    pub batch_size: usize,
    /// Overrides the per-tier pass count.
    pub passes: Option<f32>,
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CLUSTER_BATCH,
            passes: None,
            seed: DEFAULT_CLUSTER_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSettings {
    pub pos_format: VectorFormat,
    pub scale_format: VectorFormat,
    pub color_format: ColorFormat,
    pub sh_format: ShFormat,
    pub import_cameras: bool,
    /// Tuning for the cluster tiers; only valid together with one of them.
    pub clustering: Option<ClusterOptions>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::from_quality(Quality::default())
    }
}

impl CompressionSettings {
    pub fn from_quality(quality: Quality) -> Self {
        let (pos_format, scale_format, color_format, sh_format) = match quality {
            Quality::VeryLow => (
                VectorFormat::Norm11,
                VectorFormat::Norm6,
                ColorFormat::BC7,
                ShFormat::Cluster4k,
            ),
            Quality::Low => (
                VectorFormat::Norm11,
                VectorFormat::Norm6,
                ColorFormat::Norm8x4,
                ShFormat::Cluster16k,
            ),
            Quality::Medium => (
                VectorFormat::Norm11,
                VectorFormat::Norm11,
                ColorFormat::Norm8x4,
                ShFormat::Norm6,
            ),
            Quality::High => (
                VectorFormat::Norm16,
                VectorFormat::Norm16,
                ColorFormat::Float16x4,
                ShFormat::Norm11,
            ),
            Quality::VeryHigh => (
                VectorFormat::Float32,
                VectorFormat::Float32,
                ColorFormat::Float32x4,
                ShFormat::Float32,
            ),
        };
        Self {
            pos_format,
            scale_format,
            color_format,
            sh_format,
            import_cameras: false,
            clustering: None,
        }
    }

    /// Chunk envelopes are needed unless every selector is full precision.
    pub fn uses_chunks(&self) -> bool {
        !(self.pos_format == VectorFormat::Float32
            && self.scale_format == VectorFormat::Float32
            && self.color_format == ColorFormat::Float32x4
            && self.sh_format == ShFormat::Float32)
    }

    pub fn validate(&self) -> Result<(), PackError> {
        let Some(opts) = self.clustering else {
            return Ok(());
        };
        if !self.sh_format.is_clustered() {
            return Err(PackError::InvalidSettings(format!(
                "clustering options given but SH format '{}' is not a cluster format",
                self.sh_format
            )));
        }
        if opts.batch_size == 0 {
            return Err(PackError::InvalidSettings(
                "cluster batch size must be positive".to_string(),
            ));
        }
        if let Some(passes) = opts.passes {
            if !passes.is_finite() || passes <= 0.0 {
                return Err(PackError::InvalidSettings(format!(
                    "cluster passes must be a positive number, got {}",
                    passes
                )));
            }
        }
        Ok(())
    }

    /// Batch size and pass count for the selected tier, if it is one.
    pub fn cluster_plan(&self) -> Option<(usize, ClusterOptions, f32)> {
        let k = self.sh_format.cluster_count()?;
        let opts = self.clustering.unwrap_or_default();
        let passes = opts.passes.or(self.sh_format.cluster_passes())?;
        Some((k, opts, passes))
    }
}
