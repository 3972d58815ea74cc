//! SOG: a ZIP of WebP image planes plus a `meta.json` sidecar.
//!
//! Positions travel as a log-transformed 16-bit pair of images, rotations
//! as a tagged smallest-three image, scales and SH0 as indices into
//! 256-entry scalar codebooks, and higher-order SH as a centroid palette
//! with a 16-bit label image.

use std::io::Cursor;

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::common::{inv_sigmoid_safe, sigmoid};
use crate::error::{Error, Result};
use crate::io::ply::check_shapes;
use crate::io::zip::{ZipReader, ZipWriter};
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::{ColorSpace, GaussianCloud, Handedness, UpAxis};
use crate::validate;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MeansMeta {
    #[serde(default)]
    mins: Vec<f32>,
    #[serde(default)]
    maxs: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CodebookMeta {
    #[serde(default)]
    codebook: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuatsMeta {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ShnMeta {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    bands: u32,
    #[serde(default)]
    codebook: Vec<f32>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SogMeta {
    version: u32,
    count: u32,
    #[serde(default)]
    antialias: bool,
    #[serde(default)]
    means: MeansMeta,
    #[serde(default)]
    scales: CodebookMeta,
    #[serde(default)]
    quats: QuatsMeta,
    #[serde(default)]
    sh0: CodebookMeta,
    #[serde(rename = "shN", default, skip_serializing_if = "Option::is_none")]
    sh_n: Option<ShnMeta>,
}

struct Plane {
    rgba: Vec<u8>,
    width: usize,
}

fn decode_webp(bytes: &[u8], what: &str) -> Result<Plane> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::WebP)
        .map_err(|e| Error::CodecInternal(format!("webp decode failed for {}: {}", what, e)))?;
    let rgba = img.to_rgba8();
    Ok(Plane {
        width: rgba.width() as usize,
        rgba: rgba.into_raw(),
    })
}

fn encode_webp(rgba: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    WebPEncoder::new_lossless(&mut out)
        .encode(rgba, width as u32, height as u32, ExtendedColorType::Rgba8)
        .map_err(|e| Error::CodecInternal(format!("webp encode failed: {}", e)))?;
    Ok(out.into_inner())
}

#[inline]
fn log_transform(v: f32) -> f32 {
    if v < 0.0 {
        -(v.abs() + 1.0).ln()
    } else {
        (v + 1.0).ln()
    }
}

#[inline]
fn inv_log_transform(v: f32) -> f32 {
    let e = v.abs().exp() - 1.0;
    if v < 0.0 {
        -e
    } else {
        e
    }
}

/// Deterministic 1-D k-means: linear initialization between the observed
/// extremes, ten refinement passes, empty clusters keep their centroid.
/// Returns the codebook and one index per input value.
fn codebook_1d(data: &[f32], centers: usize) -> (Vec<f32>, Vec<u8>) {
    if data.is_empty() {
        return (vec![0.0; centers], Vec::new());
    }

    let mut min_v = data[0];
    let mut max_v = data[0];
    for &v in data {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    let range = max_v - min_v;
    let denom = if centers > 1 { centers - 1 } else { 1 } as f32;
    let mut centroids: Vec<f32> = (0..centers)
        .map(|i| min_v + (i as f32 / denom) * range)
        .collect();

    let mut indices = vec![0u8; data.len()];
    let mut sums = vec![0.0f32; centers];
    let mut counts = vec![0usize; centers];

    for _ in 0..10 {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        for (i, &v) in data.iter().enumerate() {
            // Centroids start sorted and stay sorted under 1-D k-means, so
            // a binary search finds the nearest.
            let k = match centroids.binary_search_by(|c| c.total_cmp(&v)) {
                Ok(k) => k,
                Err(k) => {
                    if k == 0 {
                        0
                    } else if k == centers {
                        centers - 1
                    } else if (v - centroids[k - 1]).abs() <= (centroids[k] - v).abs() {
                        k - 1
                    } else {
                        k
                    }
                }
            };
            indices[i] = k as u8;
            sums[k] += v;
            counts[k] += 1;
        }

        for k in 0..centers {
            if counts[k] > 0 {
                centroids[k] = sums[k] / counts[k] as f32;
            }
        }
    }

    (centroids, indices)
}

/// Deterministic k-means over fixed-length vectors, used for the SHN
/// palette: centroids seeded by even strides over the input, ten passes,
/// empty clusters keep their centroid.
fn cluster_vectors(data: &[f32], dim: usize, clusters: usize) -> (Vec<f32>, Vec<u16>) {
    let n = data.len() / dim;
    let clusters = clusters.min(n).max(1);

    let mut centroids = vec![0.0f32; clusters * dim];
    for k in 0..clusters {
        let src = k * n / clusters;
        centroids[k * dim..(k + 1) * dim].copy_from_slice(&data[src * dim..(src + 1) * dim]);
    }

    let mut labels = vec![0u16; n];
    let mut sums = vec![0.0f32; clusters * dim];
    let mut counts = vec![0usize; clusters];

    for _ in 0..10 {
        sums.iter_mut().for_each(|s| *s = 0.0);
        counts.iter_mut().for_each(|c| *c = 0);

        for i in 0..n {
            let v = &data[i * dim..(i + 1) * dim];
            let mut best = 0usize;
            let mut best_d = f32::INFINITY;
            for k in 0..clusters {
                let c = &centroids[k * dim..(k + 1) * dim];
                let mut d = 0.0;
                for (a, b) in v.iter().zip(c) {
                    d += (a - b) * (a - b);
                }
                if d < best_d {
                    best_d = d;
                    best = k;
                }
            }
            labels[i] = best as u16;
            counts[best] += 1;
            for (s, a) in sums[best * dim..(best + 1) * dim].iter_mut().zip(v) {
                *s += a;
            }
        }

        for k in 0..clusters {
            if counts[k] > 0 {
                for d in 0..dim {
                    centroids[k * dim + d] = sums[k * dim + d] / counts[k] as f32;
                }
            }
        }
    }

    (centroids, labels)
}

fn nearest_codebook_index(codebook: &[f32], v: f32) -> u8 {
    let mut best = 0usize;
    let mut best_d = f32::INFINITY;
    for (k, &c) in codebook.iter().enumerate() {
        let d = (v - c).abs();
        if d < best_d {
            best_d = d;
            best = k;
        }
    }
    best as u8
}

fn codebook_entry(codebook: &[f32], index: u8, what: &str) -> Result<f32> {
    codebook.get(index as usize).copied().ok_or_else(|| {
        Error::CodecInternal(format!("{} codebook index {} out of range", what, index))
    })
}

pub struct SogReader;

impl GaussReader for SogReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let zip = ZipReader::open(data)?;
        let meta_bytes = zip.extract("meta.json")?;
        let meta: SogMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| Error::CodecInternal(format!("meta.json parse failed: {}", e)))?;

        if meta.version < 2 {
            return Err(Error::UnsupportedVariant(format!(
                "sog version {} (need 2 or newer)",
                meta.version
            )));
        }

        let count = meta.count as usize;
        let mut ir = GaussianCloud::default();
        ir.num_points = meta.count as i32;
        ir.meta.antialiased = meta.antialias;
        ir.meta.source_format = "sog".to_string();
        ir.meta.handedness = Handedness::Right;
        ir.meta.up = UpAxis::Y;
        ir.meta.color = ColorSpace::Linear;

        if meta.means.files.len() >= 2 {
            if meta.means.mins.len() < 3 || meta.means.maxs.len() < 3 {
                return Err(Error::CodecInternal(
                    "sog means min/max must have three components".to_string(),
                ));
            }
            let low = decode_webp(&zip.extract(&meta.means.files[0])?, "means low")?;
            let high = decode_webp(&zip.extract(&meta.means.files[1])?, "means high")?;
            if low.rgba.len() < count * 4 || high.rgba.len() < count * 4 {
                return Err(Error::CodecInternal(
                    "sog means images smaller than point count".to_string(),
                ));
            }
            ir.positions.resize(count * 3, 0.0);
            for i in 0..count {
                for d in 0..3 {
                    let value = low.rgba[i * 4 + d] as u16
                        | ((high.rgba[i * 4 + d] as u16) << 8);
                    let n = value as f32 / 65535.0;
                    let v = meta.means.mins[d]
                        + n * (meta.means.maxs[d] - meta.means.mins[d]);
                    ir.positions[i * 3 + d] = inv_log_transform(v);
                }
            }
        }

        if !meta.quats.files.is_empty() {
            let quats = decode_webp(&zip.extract(&meta.quats.files[0])?, "quats")?;
            if quats.rgba.len() < count * 4 {
                return Err(Error::CodecInternal(
                    "sog quats image smaller than point count".to_string(),
                ));
            }
            ir.rotations.resize(count * 4, 0.0);
            let sqrt2 = std::f32::consts::SQRT_2;
            for i in 0..count {
                let px = quats.rgba[i * 4];
                let py = quats.rgba[i * 4 + 1];
                let pz = quats.rgba[i * 4 + 2];
                let tag = quats.rgba[i * 4 + 3];

                if tag < 252 {
                    ir.rotations[i * 4..i * 4 + 4].copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);
                    continue;
                }

                let a = (px as f32 / 255.0 - 0.5) * sqrt2;
                let b = (py as f32 / 255.0 - 0.5) * sqrt2;
                let c = (pz as f32 / 255.0 - 0.5) * sqrt2;
                let d = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();

                let (x, y, z, w) = match tag - 252 {
                    0 => (a, b, c, d),
                    1 => (d, b, c, a),
                    2 => (b, d, c, a),
                    _ => (b, c, d, a),
                };
                ir.rotations[i * 4..i * 4 + 4].copy_from_slice(&[w, x, y, z]);
            }
        }

        if !meta.scales.files.is_empty() && !meta.scales.codebook.is_empty() {
            let scales = decode_webp(&zip.extract(&meta.scales.files[0])?, "scales")?;
            if scales.rgba.len() < count * 4 {
                return Err(Error::CodecInternal(
                    "sog scales image smaller than point count".to_string(),
                ));
            }
            ir.scales.resize(count * 3, 0.0);
            for i in 0..count {
                for d in 0..3 {
                    ir.scales[i * 3 + d] =
                        codebook_entry(&meta.scales.codebook, scales.rgba[i * 4 + d], "scales")?;
                }
            }
        }

        if !meta.sh0.files.is_empty() && !meta.sh0.codebook.is_empty() {
            let sh0 = decode_webp(&zip.extract(&meta.sh0.files[0])?, "sh0")?;
            if sh0.rgba.len() < count * 4 {
                return Err(Error::CodecInternal(
                    "sog sh0 image smaller than point count".to_string(),
                ));
            }
            ir.colors.resize(count * 3, 0.0);
            ir.alphas.resize(count, 0.0);
            for i in 0..count {
                for d in 0..3 {
                    ir.colors[i * 3 + d] =
                        codebook_entry(&meta.sh0.codebook, sh0.rgba[i * 4 + d], "sh0")?;
                }
                ir.alphas[i] = inv_sigmoid_safe(sh0.rgba[i * 4 + 3] as f32 / 255.0);
            }
        }

        if let Some(sh_n) = &meta.sh_n {
            if sh_n.bands > 0 && sh_n.files.len() >= 2 && !sh_n.codebook.is_empty() {
                let centroids = decode_webp(&zip.extract(&sh_n.files[0])?, "shN centroids")?;
                let labels = decode_webp(&zip.extract(&sh_n.files[1])?, "shN labels")?;
                if labels.rgba.len() < count * 4 {
                    return Err(Error::CodecInternal(
                        "sog shN label image smaller than point count".to_string(),
                    ));
                }
                let coeffs = [0usize, 3, 8, 15][sh_n.bands.min(3) as usize];
                ir.sh.resize(count * coeffs * 3, 0.0);
                ir.meta.sh_degree = sh_n.bands.min(3) as i32;

                for i in 0..count {
                    let palette = labels.rgba[i * 4] as usize
                        | ((labels.rgba[i * 4 + 1] as usize) << 8);
                    if palette >= sh_n.count as usize {
                        continue;
                    }
                    // Centroid rows pack 64 palette entries per image row.
                    for j in 0..coeffs {
                        let cx = (palette % 64) * coeffs + j;
                        let cy = palette / 64;
                        let off = (cy * centroids.width + cx) * 4;
                        if off + 4 > centroids.rgba.len() {
                            return Err(Error::CodecInternal(
                                "sog shN centroid image too small".to_string(),
                            ));
                        }
                        for ch in 0..3 {
                            ir.sh[i * coeffs * 3 + j * 3 + ch] = codebook_entry(
                                &sh_n.codebook,
                                centroids.rgba[off + ch],
                                "shN",
                            )?;
                        }
                    }
                }
            }
        }

        validate::check(&ir, options.strict)?;
        Ok(ir)
    }
}

pub struct SogWriter;

impl GaussWriter for SogWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let count = ir.num_points.max(0) as usize;
        if count == 0 {
            return Err(Error::CodecInternal(
                "sog write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, count)?;

        let width = (count as f64).sqrt().ceil() as usize;
        let height = count.div_ceil(width);
        let tex_size = width * height;

        let mut zip = ZipWriter::new();
        let mut meta = SogMeta {
            version: 2,
            count: count as u32,
            antialias: ir.meta.antialiased,
            ..SogMeta::default()
        };

        // Positions: log-transform, fit per-axis min/max, split the 16-bit
        // quantization across two byte planes.
        let mut log_pos = vec![0.0f32; count * 3];
        let mut mins = [f32::INFINITY; 3];
        let mut maxs = [f32::NEG_INFINITY; 3];
        for i in 0..count {
            for d in 0..3 {
                let v = log_transform(ir.positions[i * 3 + d]);
                log_pos[i * 3 + d] = v;
                mins[d] = mins[d].min(v);
                maxs[d] = maxs[d].max(v);
            }
        }
        meta.means.mins = mins.to_vec();
        meta.means.maxs = maxs.to_vec();
        meta.means.files = vec!["means_l.webp".to_string(), "means_u.webp".to_string()];

        let mut means_l = vec![0u8; tex_size * 4];
        let mut means_u = vec![0u8; tex_size * 4];
        for i in 0..count {
            for d in 0..3 {
                let range = maxs[d] - mins[d];
                let n = if range > 1e-8 {
                    (log_pos[i * 3 + d] - mins[d]) / range
                } else {
                    0.0
                };
                let q = (n * 65535.0).clamp(0.0, 65535.0) as u16;
                means_l[i * 4 + d] = (q & 0xff) as u8;
                means_u[i * 4 + d] = (q >> 8) as u8;
            }
            means_l[i * 4 + 3] = 255;
            means_u[i * 4 + 3] = 255;
        }
        zip.add_file("means_l.webp", &encode_webp(&means_l, width, height)?);
        zip.add_file("means_u.webp", &encode_webp(&means_u, width, height)?);

        // Rotations: smallest-three with the dropped-component index in the
        // tag byte, sign flipped so the largest component is non-negative.
        let mut quats = vec![0u8; tex_size * 4];
        let inv_sqrt2 = 1.0 / std::f32::consts::SQRT_2;
        for i in 0..count {
            let mut q = [
                ir.rotations[i * 4],
                ir.rotations[i * 4 + 1],
                ir.rotations[i * 4 + 2],
                ir.rotations[i * 4 + 3],
            ];
            let mut max_idx = 0;
            for k in 1..4 {
                if q[k].abs() > q[max_idx].abs() {
                    max_idx = k;
                }
            }
            if q[max_idx] < 0.0 {
                for v in q.iter_mut() {
                    *v = -*v;
                }
            }
            let mut slot = 0;
            for (k, &v) in q.iter().enumerate() {
                if k == max_idx {
                    continue;
                }
                let n = ((v / inv_sqrt2 + 1.0) * 0.5).clamp(0.0, 1.0);
                quats[i * 4 + slot] = (n * 255.0).round() as u8;
                slot += 1;
            }
            quats[i * 4 + 3] = 252 + max_idx as u8;
        }
        meta.quats.files = vec!["quats.webp".to_string()];
        zip.add_file("quats.webp", &encode_webp(&quats, width, height)?);

        // Scales: scalar VQ over the concatenated per-axis values.
        let (scale_cb, scale_idx) = codebook_1d(&ir.scales, 256);
        meta.scales.codebook = scale_cb;
        meta.scales.files = vec!["scales.webp".to_string()];
        let mut scales_rgba = vec![0u8; tex_size * 4];
        for i in 0..count {
            for d in 0..3 {
                scales_rgba[i * 4 + d] = scale_idx[i * 3 + d];
            }
            scales_rgba[i * 4 + 3] = 255;
        }
        zip.add_file("scales.webp", &encode_webp(&scales_rgba, width, height)?);

        // SH0 and opacity share one plane: RGB are codebook indices, alpha
        // is the sigmoid opacity byte.
        let (sh0_cb, sh0_idx) = codebook_1d(&ir.colors, 256);
        meta.sh0.codebook = sh0_cb;
        meta.sh0.files = vec!["sh0.webp".to_string()];
        let mut sh0_rgba = vec![0u8; tex_size * 4];
        for i in 0..count {
            for d in 0..3 {
                sh0_rgba[i * 4 + d] = sh0_idx[i * 3 + d];
            }
            sh0_rgba[i * 4 + 3] = (sigmoid(ir.alphas[i]) * 255.0).clamp(0.0, 255.0) as u8;
        }
        zip.add_file("sh0.webp", &encode_webp(&sh0_rgba, width, height)?);

        // Higher-order SH: cluster per-point coefficient vectors into a
        // power-of-two palette, then scalar-quantize the centroid values.
        let degree = ir.meta.sh_degree.clamp(0, 3) as usize;
        let coeffs = [0usize, 3, 8, 15][degree];
        if coeffs > 0 && ir.sh.len() == count * coeffs * 3 {
            let dim = coeffs * 3;
            let palette_target = count.next_power_of_two().min(4096);
            let (centroids, labels) = cluster_vectors(&ir.sh, dim, palette_target);
            let palette_count = centroids.len() / dim;

            let (shn_cb, _) = codebook_1d(&centroids, 256);

            let centroid_width = 64 * coeffs;
            let centroid_height = palette_count.div_ceil(64);
            let mut centroid_rgba = vec![0u8; centroid_width * centroid_height * 4];
            for p in 0..palette_count {
                for j in 0..coeffs {
                    let cx = (p % 64) * coeffs + j;
                    let cy = p / 64;
                    let off = (cy * centroid_width + cx) * 4;
                    for ch in 0..3 {
                        centroid_rgba[off + ch] =
                            nearest_codebook_index(&shn_cb, centroids[p * dim + j * 3 + ch]);
                    }
                    centroid_rgba[off + 3] = 255;
                }
            }

            let mut label_rgba = vec![0u8; tex_size * 4];
            for i in 0..count {
                label_rgba[i * 4] = (labels[i] & 0xff) as u8;
                label_rgba[i * 4 + 1] = (labels[i] >> 8) as u8;
                label_rgba[i * 4 + 3] = 255;
            }

            meta.sh_n = Some(ShnMeta {
                count: palette_count as u32,
                bands: degree as u32,
                codebook: shn_cb,
                files: vec!["shN_centroids.webp".to_string(), "shN_labels.webp".to_string()],
            });
            zip.add_file(
                "shN_centroids.webp",
                &encode_webp(&centroid_rgba, centroid_width, centroid_height)?,
            );
            zip.add_file("shN_labels.webp", &encode_webp(&label_rgba, width, height)?);
        }

        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| Error::CodecInternal(format!("meta.json encode failed: {}", e)))?;
        zip.add_file("meta.json", &meta_bytes);

        Ok(zip.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud(n: usize, sh_degree: i32) -> GaussianCloud {
        crate::io::ply::tests::sample_cloud(n, sh_degree)
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            SogReader.read(b"", &ReadOptions::default()),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn non_zip_input_is_a_codec_error() {
        let data = vec![7u8; 64];
        assert!(matches!(
            SogReader.read(&data, &ReadOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }

    #[test]
    fn old_version_is_rejected() {
        let mut zip = ZipWriter::new();
        zip.add_file("meta.json", b"{\"version\": 1, \"count\": 0}");
        let archive = zip.finalize();
        assert!(matches!(
            SogReader.read(&archive, &ReadOptions::default()),
            Err(Error::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn roundtrip_within_quantization_tolerances() {
        let ir = sample_cloud(40, 0);
        let bytes = SogWriter.write(&ir, &WriteOptions { strict: true }).unwrap();
        let back = SogReader.read(&bytes, &ReadOptions { strict: true }).unwrap();

        assert_eq!(back.num_points, 40);
        assert_eq!(back.meta.handedness, Handedness::Right);
        assert_eq!(back.meta.up, UpAxis::Y);
        assert_eq!(back.meta.color, ColorSpace::Linear);

        for (a, b) in ir.positions.iter().zip(back.positions.iter()) {
            // 16 bits over the log range, widened back through exp.
            assert!((a - b).abs() < 0.01, "{} vs {}", a, b);
        }
        // The fixture has few distinct scale/color values, so 256 centroids
        // resolve them almost exactly.
        for (a, b) in ir.scales.iter().zip(back.scales.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
        for (a, b) in ir.colors.iter().zip(back.colors.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
        // Opacity within one byte step in sigmoid space.
        for (a, b) in ir.alphas.iter().zip(back.alphas.iter()) {
            assert!((sigmoid(*a) - sigmoid(*b)).abs() <= 1.0 / 255.0 + 1e-6);
        }
        for i in 0..40 {
            let a = &ir.rotations[i * 4..i * 4 + 4];
            let b = &back.rotations[i * 4..i * 4 + 4];
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            assert!(dot.abs() > 0.999, "rotation mismatch at {}", i);
        }
    }

    #[test]
    fn sh_plane_roundtrips_for_degree_two() {
        let ir = sample_cloud(30, 2);
        let bytes = SogWriter.write(&ir, &WriteOptions { strict: true }).unwrap();
        let back = SogReader.read(&bytes, &ReadOptions { strict: true }).unwrap();
        assert_eq!(back.meta.sh_degree, 2);
        assert_eq!(back.sh.len(), ir.sh.len());
        for (a, b) in ir.sh.iter().zip(back.sh.iter()) {
            assert!((a - b).abs() < 0.05, "{} vs {}", a, b);
        }
    }

    #[test]
    fn degree_zero_emits_no_sh_plane() {
        let ir = sample_cloud(5, 0);
        let bytes = SogWriter.write(&ir, &WriteOptions::default()).unwrap();
        let reader = ZipReader::open(&bytes).unwrap();
        assert!(reader.extract("shN_labels.webp").is_err());
        let meta: SogMeta =
            serde_json::from_slice(&reader.extract("meta.json").unwrap()).unwrap();
        assert!(meta.sh_n.is_none());
    }

    #[test]
    fn archive_with_prepended_bytes_still_decodes() {
        let ir = sample_cloud(12, 1);
        let bytes = SogWriter.write(&ir, &WriteOptions::default()).unwrap();
        let mut shifted = vec![0u8; 42];
        shifted.extend_from_slice(&bytes);
        let back = SogReader.read(&shifted, &ReadOptions { strict: true }).unwrap();
        assert_eq!(back.num_points, 12);
    }

    #[test]
    fn writer_rejects_empty_cloud() {
        let ir = GaussianCloud::default();
        assert!(matches!(
            SogWriter.write(&ir, &WriteOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }

    #[test]
    fn codebook_kmeans_is_deterministic_and_tight_on_small_sets() {
        let data = vec![-3.0f32, -1.0, -1.0, 0.5, 2.0, 2.0, 2.0];
        let (cb1, idx1) = codebook_1d(&data, 256);
        let (cb2, idx2) = codebook_1d(&data, 256);
        assert_eq!(cb1, cb2);
        assert_eq!(idx1, idx2);
        for (&v, &k) in data.iter().zip(idx1.iter()) {
            assert!((cb1[k as usize] - v).abs() < 1e-4);
        }
    }
}
