//! Read-only statistics over a decoded cloud.

use crate::structures::{ColorSpace, GaussianCloud, Handedness, LengthUnit, UpAxis};

/// Min/max/mean summary of one float attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub count: usize,
}

/// Axis-aligned bounding box over the positions array.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoundingBox {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_z: f32,
    pub max_z: f32,
}

/// Summary of a cloud: counts, bounds, attribute statistics and the
/// in-memory size of every array.
#[derive(Debug, Default, Clone)]
pub struct ModelInfo {
    pub num_points: i32,
    pub file_size: usize,
    pub source_format: String,

    pub handedness: Handedness,
    pub up_axis: UpAxis,
    pub unit: LengthUnit,
    pub color_space: ColorSpace,
    pub sh_degree: i32,
    pub antialiased: bool,

    pub bounds: BoundingBox,
    pub scale_stats: FloatStats,
    pub alpha_stats: FloatStats,

    pub positions_size: usize,
    pub scales_size: usize,
    pub rotations_size: usize,
    pub alphas_size: usize,
    pub colors_size: usize,
    pub sh_size: usize,
    pub total_size: usize,

    /// Extra attribute names with their in-memory byte sizes.
    pub extra_attrs: Vec<(String, usize)>,
}

fn float_stats(data: &[f32]) -> FloatStats {
    let mut stats = FloatStats::default();
    if data.is_empty() {
        return stats;
    }
    stats.count = data.len();
    stats.min = data[0];
    stats.max = data[0];
    let mut sum = 0.0f64;
    for &v in data {
        stats.min = stats.min.min(v);
        stats.max = stats.max.max(v);
        sum += v as f64;
    }
    stats.avg = (sum / data.len() as f64) as f32;
    stats
}

fn bounds(positions: &[f32]) -> BoundingBox {
    let mut b = BoundingBox::default();
    if positions.len() < 3 {
        return b;
    }
    b.min_x = positions[0];
    b.max_x = positions[0];
    b.min_y = positions[1];
    b.max_y = positions[1];
    b.min_z = positions[2];
    b.max_z = positions[2];
    for p in positions.chunks_exact(3).skip(1) {
        b.min_x = b.min_x.min(p[0]);
        b.max_x = b.max_x.max(p[0]);
        b.min_y = b.min_y.min(p[1]);
        b.max_y = b.max_y.max(p[1]);
        b.min_z = b.min_z.min(p[2]);
        b.max_z = b.max_z.max(p[2]);
    }
    b
}

impl ModelInfo {
    /// Summarize `ir`. `file_size` is the on-disk size when known, zero
    /// otherwise; it is reported verbatim.
    pub fn from_cloud(ir: &GaussianCloud, file_size: usize) -> ModelInfo {
        let f32_size = std::mem::size_of::<f32>();
        let mut info = ModelInfo {
            num_points: ir.num_points,
            file_size,
            source_format: ir.meta.source_format.clone(),
            handedness: ir.meta.handedness,
            up_axis: ir.meta.up,
            unit: ir.meta.unit,
            color_space: ir.meta.color,
            sh_degree: ir.meta.sh_degree,
            antialiased: ir.meta.antialiased,
            bounds: bounds(&ir.positions),
            scale_stats: float_stats(&ir.scales),
            alpha_stats: float_stats(&ir.alphas),
            positions_size: ir.positions.len() * f32_size,
            scales_size: ir.scales.len() * f32_size,
            rotations_size: ir.rotations.len() * f32_size,
            alphas_size: ir.alphas.len() * f32_size,
            colors_size: ir.colors.len() * f32_size,
            sh_size: ir.sh.len() * f32_size,
            ..ModelInfo::default()
        };

        info.total_size = info.positions_size
            + info.scales_size
            + info.rotations_size
            + info.alphas_size
            + info.colors_size
            + info.sh_size;

        let mut extras: Vec<_> = ir
            .extras
            .iter()
            .map(|(name, arr)| (name.clone(), arr.len() * f32_size))
            .collect();
        extras.sort();
        for (_, size) in &extras {
            info.total_size += size;
        }
        info.extra_attrs = extras;

        info
    }
}

/// Render a byte count with a binary-prefix suffix.
pub fn format_bytes(bytes: usize) -> String {
    const SUFFIX: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= 1024.0 && exp < SUFFIX.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }
    format!("{:.2} {}", value, SUFFIX[exp])
}
