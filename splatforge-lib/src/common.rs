//! Scalar transforms and bit-packing helpers shared across codecs.

/// Zeroth-order spherical-harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_79;

/// Logit magnitude used to pin opacity bytes 0 and 255 to finite values.
pub const MAX_LOGIT: f32 = 10.0;

#[inline]
pub(crate) fn clamp_u8(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub(crate) fn inv_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

/// Inverse sigmoid with the input clamped away from 0 and 1 so the
/// logit stays finite.
#[inline]
pub(crate) fn inv_sigmoid_safe(x: f32) -> f32 {
    inv_sigmoid(x.clamp(1e-6, 1.0 - 1e-6))
}

/// Higher-order SH coefficients per channel for a degree.
#[inline]
pub(crate) fn dim_for_degree(deg: i32) -> usize {
    match deg {
        0 => 0,
        1 => 3,
        2 => 8,
        3 => 15,
        _ => 0,
    }
}

/// Degree implied by a per-channel coefficient count.
#[inline]
pub(crate) const fn degree_for_dim(dim: usize) -> i32 {
    if dim < 3 {
        0
    } else if dim < 8 {
        1
    } else if dim < 15 {
        2
    } else {
        3
    }
}

#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Normalize into `[0,1]` over `[min,max]`, saturating at the ends.
#[inline]
pub(crate) fn normalize(x: f32, min: f32, max: f32) -> f32 {
    if x <= min {
        return 0.0;
    }
    if x >= max {
        return 1.0;
    }
    if max - min < 1e-5 {
        0.0
    } else {
        (x - min) / (max - min)
    }
}

/// Quantize `[0,1]` into an `bits`-wide unsigned field.
#[inline]
pub(crate) fn pack_unorm(value: f32, bits: u32) -> u32 {
    let max = (1u32 << bits) - 1;
    ((value * max as f32 + 0.5).floor() as i64).clamp(0, max as i64) as u32
}

/// Recover `[0,1]` from the low `bits` of `value`.
#[inline]
pub(crate) fn unpack_unorm(value: u32, bits: u32) -> f32 {
    let mask = (1u32 << bits) - 1;
    (value & mask) as f32 / mask as f32
}

/// Pack three normalized components as 11-10-11 bits.
#[inline]
pub(crate) fn pack_111011(x: f32, y: f32, z: f32) -> u32 {
    (pack_unorm(x, 11) << 21) | (pack_unorm(y, 10) << 11) | pack_unorm(z, 11)
}

#[inline]
pub(crate) fn unpack_111011(value: u32) -> [f32; 3] {
    [
        unpack_unorm(value >> 21, 11),
        unpack_unorm(value >> 11, 10),
        unpack_unorm(value, 11),
    ]
}

/// Pack four normalized components as 8 bits each, first in the high byte.
#[inline]
pub(crate) fn pack_8888(x: f32, y: f32, z: f32, w: f32) -> u32 {
    (pack_unorm(x, 8) << 24) | (pack_unorm(y, 8) << 16) | (pack_unorm(z, 8) << 8) | pack_unorm(w, 8)
}

#[inline]
pub(crate) fn unpack_8888(value: u32) -> [f32; 4] {
    [
        unpack_unorm(value >> 24, 8),
        unpack_unorm(value >> 16, 8),
        unpack_unorm(value >> 8, 8),
        unpack_unorm(value, 8),
    ]
}

/// Smallest-three quaternion packing, 2-10-10-10 bits.
///
/// Input is `[w, x, y, z]`. The top two bits index the dropped
/// largest-magnitude component (0=w, 1=x, 2=y, 3=z); the remaining three
/// are stored in `[w,x,y,z]` index order, each mapped from
/// `[-sqrt(2)/2, sqrt(2)/2]` onto a 10-bit field. The quaternion is
/// normalized and sign-flipped so the dropped component is non-negative.
pub(crate) fn pack_rot(quat: [f32; 4]) -> u32 {
    let mut q = quat;
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm < 1e-8 {
        q = [1.0, 0.0, 0.0, 0.0];
    } else {
        for v in q.iter_mut() {
            *v /= norm;
        }
    }

    let mut largest = 0;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }
    if q[largest] < 0.0 {
        for v in q.iter_mut() {
            *v = -*v;
        }
    }

    let pack_norm = std::f32::consts::SQRT_2 * 0.5;
    let mut result = largest as u32;
    for (i, &v) in q.iter().enumerate() {
        if i != largest {
            result = (result << 10) | pack_unorm(v * pack_norm + 0.5, 10);
        }
    }
    result
}

/// Inverse of [`pack_rot`]; returns `[w, x, y, z]`.
pub(crate) fn unpack_rot(value: u32) -> [f32; 4] {
    let norm = 1.0 / (std::f32::consts::SQRT_2 * 0.5);
    let which = (value >> 30) & 0x3;

    let a = (unpack_unorm(value >> 20, 10) - 0.5) * norm;
    let b = (unpack_unorm(value >> 10, 10) - 0.5) * norm;
    let c = (unpack_unorm(value, 10) - 0.5) * norm;

    let m = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();

    match which {
        0 => [m, a, b, c],
        1 => [a, m, b, c],
        2 => [a, b, m, c],
        _ => [a, b, c, m],
    }
}

/// Normalize a `[w, x, y, z]` quaternion, substituting identity when the
/// length underflows.
#[inline]
pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if len > 1e-8 {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    } else {
        [1.0, 0.0, 0.0, 0.0]
    }
}
