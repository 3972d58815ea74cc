use foldhash::HashMap;

/// Chirality of the source coordinate system, when a format records it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    #[default]
    Unknown,
    Left,
    Right,
}

/// Which axis points up in the source scene.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UpAxis {
    #[default]
    Unknown,
    Y,
    Z,
}

/// Length unit of the position data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    #[default]
    Unknown,
    Meter,
    Centimeter,
}

/// Color space the DC coefficients were fitted in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    #[default]
    Unknown,
    Linear,
    Srgb,
}

/// Side-band attributes a reader recovers alongside the point data.
#[derive(Debug, Default, Clone)]
pub struct GaussMetadata {
    pub handedness: Handedness,
    pub up: UpAxis,
    pub unit: LengthUnit,
    pub color: ColorSpace,
    /// Spherical-harmonic degrees beyond DC, in `0..=3`.
    pub sh_degree: i32,
    /// Rendering-intent flag carried by SPZ and SOG.
    pub antialiased: bool,
    /// Informational tag set by the reader that produced this cloud.
    pub source_format: String,
}

/// Decoded Gaussian point cloud, the pivot every codec reads into and
/// writes from.
///
/// Structure-of-arrays layout: each attribute is one contiguous `Vec<f32>`
/// iterated in lockstep over the point index.
///
/// - `positions`: `[x0, y0, z0, x1, y1, z1, ...]`, `3 * N` values
/// - `scales`: per-axis log scale, `3 * N`
/// - `rotations`: quaternions as `[w, x, y, z]` per point, `4 * N`
/// - `alphas`: pre-sigmoid (logit-space) opacity, `N`
/// - `colors`: SH DC coefficients, RGB interleaved, `3 * N`
/// - `sh`: higher-order SH, coefficient-first: for each point the
///   coefficients are contiguous, each as an R,G,B triple, so value
///   `(p * K + k) * 3 + channel` with `K = (degree+1)^2 - 1`
#[derive(Debug, Default, Clone)]
pub struct GaussianCloud {
    pub num_points: i32,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
    /// Attributes the reader did not recognize, keyed by source name,
    /// one value per point.
    pub extras: HashMap<String, Vec<f32>>,
    pub meta: GaussMetadata,
}

impl GaussianCloud {
    /// Empty cloud with arrays pre-sized for `num_points` and `sh_degree`.
    pub fn with_capacity(num_points: usize, sh_degree: i32) -> Self {
        let coeffs = sh_coeffs_per_point(sh_degree);
        GaussianCloud {
            num_points: num_points as i32,
            positions: Vec::with_capacity(num_points * 3),
            scales: Vec::with_capacity(num_points * 3),
            rotations: Vec::with_capacity(num_points * 4),
            alphas: Vec::with_capacity(num_points),
            colors: Vec::with_capacity(num_points * 3),
            sh: Vec::with_capacity(num_points * coeffs),
            extras: HashMap::default(),
            meta: GaussMetadata {
                sh_degree,
                ..GaussMetadata::default()
            },
        }
    }

    /// Zero-filled cloud with arrays already at their final lengths.
    pub fn zeroed(num_points: usize, sh_degree: i32) -> Self {
        let coeffs = sh_coeffs_per_point(sh_degree);
        GaussianCloud {
            num_points: num_points as i32,
            positions: vec![0.0; num_points * 3],
            scales: vec![0.0; num_points * 3],
            rotations: vec![0.0; num_points * 4],
            alphas: vec![0.0; num_points],
            colors: vec![0.0; num_points * 3],
            sh: vec![0.0; num_points * coeffs],
            extras: HashMap::default(),
            meta: GaussMetadata {
                sh_degree,
                ..GaussMetadata::default()
            },
        }
    }
}

/// Total higher-order SH values per point (`3` channels per coefficient).
#[inline]
pub fn sh_coeffs_per_point(degree: i32) -> usize {
    if degree <= 0 {
        return 0;
    }
    let per_channel = (degree + 1) * (degree + 1) - 1;
    per_channel as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coeff_counts_match_degree_table() {
        assert_eq!(sh_coeffs_per_point(0), 0);
        assert_eq!(sh_coeffs_per_point(1), 9);
        assert_eq!(sh_coeffs_per_point(2), 24);
        assert_eq!(sh_coeffs_per_point(3), 45);
        assert_eq!(sh_coeffs_per_point(-1), 0);
    }

    #[test]
    fn zeroed_cloud_has_consistent_lengths() {
        let cloud = GaussianCloud::zeroed(5, 2);
        assert_eq!(cloud.num_points, 5);
        assert_eq!(cloud.positions.len(), 15);
        assert_eq!(cloud.scales.len(), 15);
        assert_eq!(cloud.rotations.len(), 20);
        assert_eq!(cloud.alphas.len(), 5);
        assert_eq!(cloud.colors.len(), 15);
        assert_eq!(cloud.sh.len(), 5 * 24);
    }
}
