use half::f16;

/// Band-0 spherical harmonics constant, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f32 = 0.282_094_8;

/// Degenerate ranges narrower than this are widened before normalization.
pub const RANGE_EPSILON: f32 = 1.0e-5;

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn sh0_to_color(dc: f32) -> f32 {
    dc * SH_C0 + 0.5
}

#[inline]
pub(crate) fn saturate(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

#[inline]
pub(crate) fn half_bits(x: f32) -> u16 {
    f16::from_f32(x).to_bits()
}

#[inline]
pub(crate) fn half_to_float(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// Packs two floats as halves, `a` in the low 16 bits.
#[inline]
pub fn pack_half2(a: f32, b: f32) -> u32 {
    (half_bits(a) as u32) | ((half_bits(b) as u32) << 16)
}

#[inline]
pub fn unpack_half2(v: u32) -> (f32, f32) {
    (half_to_float(v as u16), half_to_float((v >> 16) as u16))
}

/// Centered-square opacity remap: spends more of the encoding range near 0 and 1.
#[inline]
pub fn square_centered01(x: f32) -> f32 {
    let c = x - 0.5;
    saturate(c * c * c.signum() * 2.0 + 0.5)
}

/// Compresses the dynamic range of linear splat scale.
#[inline]
pub fn scale_precision_shape(s: f32) -> f32 {
    s.max(0.0).powf(1.0 / 8.0)
}

/// Normalizes a quaternion; a zero-length input becomes the identity.
#[inline]
pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm > f32::MIN_POSITIVE && norm.is_finite() {
        [q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm]
    } else {
        [1.0, 0.0, 0.0, 0.0]
    }
}

/// Smallest-three form of a (w, x, y, z) quaternion.
///
/// Returns the three remaining components remapped into `[0, 1]` followed by
/// the dropped component's index (in x, y, z, w order) divided by three.
pub fn pack_smallest3_rotation(wxyz: [f32; 4]) -> [f32; 4] {
    let n = normalize_quat(wxyz);
    let q = [n[1], n[2], n[3], n[0]];

    let mut index = 0;
    let mut max_v = q[0].abs();
    for (i, v) in q.iter().enumerate().skip(1) {
        if v.abs() > max_v {
            index = i;
            max_v = v.abs();
        }
    }

    let three = match index {
        0 => [q[1], q[2], q[3]],
        1 => [q[0], q[2], q[3]],
        2 => [q[0], q[1], q[3]],
        _ => [q[0], q[1], q[2]],
    };
    let sign = if q[index] >= 0.0 { 1.0 } else { -1.0 };
    let remap = |v: f32| (v * sign * std::f32::consts::SQRT_2) * 0.5 + 0.5;

    [
        remap(three[0]),
        remap(three[1]),
        remap(three[2]),
        index as f32 / 3.0,
    ]
}

/// Reconstructs an (x, y, z, w) unit quaternion from its smallest-three form.
pub fn unpack_smallest3_rotation(packed: [f32; 4]) -> [f32; 4] {
    let index = (packed[3] * 3.0).round() as usize;
    let three = [packed[0], packed[1], packed[2]]
        .map(|v| (v * 2.0 - 1.0) / std::f32::consts::SQRT_2);
    let rest = 1.0 - (three[0] * three[0] + three[1] * three[1] + three[2] * three[2]);
    let big = rest.max(0.0).sqrt();
    match index {
        0 => [big, three[0], three[1], three[2]],
        1 => [three[0], big, three[1], three[2]],
        2 => [three[0], three[1], big, three[2]],
        _ => [three[0], three[1], three[2], big],
    }
}
