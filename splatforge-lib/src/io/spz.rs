//! SPZ: a zstd-compressed packed-gaussian container behind a thin shim.
//!
//! The coder half of this module owns the bit layout: 24.8 fixed-point
//! positions, byte-quantized scales/colors/alphas, three-component
//! sign-canonical quaternions, and bucketed SH quantization. The shim half
//! is the format boundary the rest of the library sees; its only transform
//! is the quaternion reorder between the coder's `[x, y, z, w]` and the
//! IR's `[w, x, y, z]`.

use std::io::Cursor;

use crate::common::{clamp_u8, inv_sigmoid_safe, sigmoid};
use crate::error::{Error, Result};
use crate::io::ply::check_shapes;
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::GaussianCloud;
use crate::validate;

const MAGIC: u32 = 0x5053474e; // 'NGSP'
const VERSION: u32 = 2;
const FLAG_ANTIALIASED: u8 = 0x1;
const FRACTIONAL_BITS: u32 = 12;
const COLOR_SCALE: f32 = 0.15;
const COMPRESSION_LEVEL: i32 = 3;

/// The coder's view of a cloud. Field semantics match the IR except for
/// the quaternion component order.
#[derive(Debug, Default, Clone)]
pub(crate) struct SpzCloud {
    pub num_points: i32,
    pub sh_degree: i32,
    pub antialiased: bool,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    /// `[x, y, z, w]` per point.
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

#[derive(Debug, Clone)]
struct PackedGaussians {
    num_points: i32,
    sh_degree: i32,
    antialiased: bool,
    positions: Vec<u8>,
    scales: Vec<u8>,
    rotations: Vec<u8>,
    alphas: Vec<u8>,
    colors: Vec<u8>,
    sh: Vec<u8>,
}

/// Borrowed view over a deserialized packed payload.
struct PackedView<'a> {
    num_points: i32,
    sh_degree: i32,
    fractional_bits: u32,
    antialiased: bool,
    positions: &'a [u8],
    scales: &'a [u8],
    rotations: &'a [u8],
    alphas: &'a [u8],
    colors: &'a [u8],
    sh: &'a [u8],
}

#[inline]
fn quantize_sh(x: f32, bucket_size: i32) -> u8 {
    let q = (x * 128.0).round() as i32 + 128;
    let q = ((q + bucket_size / 2) / bucket_size) * bucket_size;
    q.clamp(0, 255) as u8
}

#[inline]
fn unquantize_sh(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

fn pack_gaussians(cloud: &SpzCloud) -> PackedGaussians {
    let sf = (1 << FRACTIONAL_BITS) as f32;
    let color_factor = COLOR_SCALE * 255.0;
    let sh_dim = crate::common::dim_for_degree(cloud.sh_degree);

    let positions: Vec<u8> = cloud
        .positions
        .iter()
        .flat_map(|&val| {
            let fixed = (val * sf).round() as i32;
            [
                (fixed & 0xff) as u8,
                ((fixed >> 8) & 0xff) as u8,
                ((fixed >> 16) & 0xff) as u8,
            ]
        })
        .collect();

    let scales: Vec<u8> = cloud
        .scales
        .iter()
        .map(|&s| clamp_u8((s + 10.0) * 16.0))
        .collect();

    let rotations: Vec<u8> = cloud
        .rotations
        .chunks_exact(4)
        .flat_map(|quat| {
            let norm =
                (quat[0] * quat[0] + quat[1] * quat[1] + quat[2] * quat[2] + quat[3] * quat[3])
                    .sqrt()
                    .max(1e-12);
            // Canonical sign: w non-negative, then only x, y, z stored.
            let scale = if quat[3] < 0.0 { -127.5 } else { 127.5 } / norm;
            [
                clamp_u8(quat[0] * scale + 127.5),
                clamp_u8(quat[1] * scale + 127.5),
                clamp_u8(quat[2] * scale + 127.5),
            ]
        })
        .collect();

    let alphas: Vec<u8> = cloud
        .alphas
        .iter()
        .map(|&a| clamp_u8(sigmoid(a) * 255.0))
        .collect();

    let colors: Vec<u8> = cloud
        .colors
        .iter()
        .map(|&c| clamp_u8(c * color_factor + 127.5))
        .collect();

    let sh = if cloud.sh_degree > 0 {
        cloud
            .sh
            .chunks_exact(sh_dim * 3)
            .flat_map(|chunk| {
                chunk.iter().enumerate().map(|(j, &x)| {
                    let bucket = if j < 9 { 8 } else { 16 };
                    quantize_sh(x, bucket)
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    PackedGaussians {
        num_points: cloud.num_points,
        sh_degree: cloud.sh_degree,
        antialiased: cloud.antialiased,
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh,
    }
}

#[inline]
fn parse_3bytes(bytes: &[u8]) -> f32 {
    let mut fixed = bytes[0] as u32 | ((bytes[1] as u32) << 8) | ((bytes[2] as u32) << 16);
    if fixed & 0x0080_0000 != 0 {
        fixed |= 0xff00_0000; // sign extend
    }
    fixed as i32 as f32
}

fn unpack_gaussians(pg: &PackedView) -> SpzCloud {
    let np = pg.num_points as usize;
    let sh_dim = crate::common::dim_for_degree(pg.sh_degree);
    let mut cloud = SpzCloud {
        num_points: pg.num_points,
        sh_degree: pg.sh_degree,
        antialiased: pg.antialiased,
        positions: vec![0.0; np * 3],
        scales: vec![0.0; np * 3],
        rotations: vec![0.0; np * 4],
        alphas: vec![0.0; np],
        colors: vec![0.0; np * 3],
        sh: vec![0.0; np * sh_dim * 3],
    };

    let scale = 1.0 / (1u32 << pg.fractional_bits) as f32;
    for (i, chunk) in pg.positions.chunks_exact(9).enumerate() {
        cloud.positions[i * 3] = parse_3bytes(&chunk[0..3]) * scale;
        cloud.positions[i * 3 + 1] = parse_3bytes(&chunk[3..6]) * scale;
        cloud.positions[i * 3 + 2] = parse_3bytes(&chunk[6..9]) * scale;
    }

    cloud
        .scales
        .iter_mut()
        .zip(pg.scales.iter())
        .for_each(|(s, &b)| {
            *s = b as f32 / 16.0 - 10.0;
        });

    let rotation_scale = 1.0 / 127.5;
    pg.rotations
        .chunks_exact(3)
        .zip(cloud.rotations.chunks_exact_mut(4))
        .for_each(|(bytes, rot)| {
            let x = bytes[0] as f32 * rotation_scale - 1.0;
            let y = bytes[1] as f32 * rotation_scale - 1.0;
            let z = bytes[2] as f32 * rotation_scale - 1.0;
            let rr = 1.0 - (x * x + y * y + z * z);
            rot[0] = x;
            rot[1] = y;
            rot[2] = z;
            rot[3] = if rr < 0.0 { 0.0 } else { rr.sqrt() };
        });

    cloud
        .alphas
        .iter_mut()
        .zip(pg.alphas.iter())
        .for_each(|(a, &b)| {
            *a = inv_sigmoid_safe(b as f32 / 255.0);
        });

    cloud
        .colors
        .iter_mut()
        .zip(pg.colors.iter())
        .for_each(|(c, &b)| {
            *c = (b as f32 / 255.0 - 0.5) / COLOR_SCALE;
        });

    cloud.sh.iter_mut().zip(pg.sh.iter()).for_each(|(sh, &b)| {
        *sh = unquantize_sh(b);
    });

    cloud
}

fn serialize_packed(pg: &PackedGaussians) -> Vec<u8> {
    let data_size = pg.positions.len()
        + pg.alphas.len()
        + pg.colors.len()
        + pg.scales.len()
        + pg.rotations.len()
        + pg.sh.len();

    let mut out = Vec::with_capacity(16 + data_size);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(pg.num_points as u32).to_le_bytes());
    out.push(pg.sh_degree as u8);
    out.push(FRACTIONAL_BITS as u8);
    out.push(if pg.antialiased { FLAG_ANTIALIASED } else { 0 });
    out.push(0); // reserved

    out.extend_from_slice(&pg.positions);
    out.extend_from_slice(&pg.alphas);
    out.extend_from_slice(&pg.colors);
    out.extend_from_slice(&pg.scales);
    out.extend_from_slice(&pg.rotations);
    out.extend_from_slice(&pg.sh);
    out
}

fn deserialize_packed(data: &[u8]) -> Result<PackedView<'_>> {
    if data.len() < 16 {
        return Err(Error::Truncated("spz payload shorter than header".to_string()));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let num_points = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let sh_degree = data[12];
    let fractional_bits = data[13];
    let flags = data[14];

    if magic != MAGIC {
        return Err(Error::BadMagic("not an spz payload".to_string()));
    }
    if version != VERSION {
        return Err(Error::UnsupportedVariant(format!("spz version {}", version)));
    }
    if sh_degree > 3 {
        return Err(Error::UnsupportedVariant(format!(
            "spz sh degree {}",
            sh_degree
        )));
    }

    let np = num_points as usize;
    let dim = crate::common::dim_for_degree(sh_degree as i32);
    let positions_len = np * 9;
    let alphas_len = np;
    let colors_len = np * 3;
    let scales_len = np * 3;
    let rotations_len = np * 3;
    let sh_len = np * dim * 3;

    let needed = 16 + positions_len + alphas_len + colors_len + scales_len + rotations_len + sh_len;
    if data.len() < needed {
        return Err(Error::Truncated(format!(
            "spz payload needs {} bytes, have {}",
            needed,
            data.len()
        )));
    }

    let mut offset = 16;
    let positions = &data[offset..offset + positions_len];
    offset += positions_len;
    let alphas = &data[offset..offset + alphas_len];
    offset += alphas_len;
    let colors = &data[offset..offset + colors_len];
    offset += colors_len;
    let scales = &data[offset..offset + scales_len];
    offset += scales_len;
    let rotations = &data[offset..offset + rotations_len];
    offset += rotations_len;
    let sh = &data[offset..offset + sh_len];

    Ok(PackedView {
        num_points: np as i32,
        sh_degree: sh_degree as i32,
        fractional_bits: fractional_bits as u32,
        antialiased: flags & FLAG_ANTIALIASED != 0,
        positions,
        alphas,
        colors,
        scales,
        rotations,
        sh,
    })
}

/// Decode an SPZ byte stream into the coder's cloud representation.
pub(crate) fn load_spz(data: &[u8]) -> Result<SpzCloud> {
    let uncompressed = zstd::stream::decode_all(Cursor::new(data))
        .map_err(|e| Error::CodecInternal(format!("spz decompression failed: {}", e)))?;
    let packed = deserialize_packed(&uncompressed)?;
    Ok(unpack_gaussians(&packed))
}

/// Encode the coder's cloud representation into an SPZ byte stream.
pub(crate) fn save_spz(cloud: &SpzCloud) -> Result<Vec<u8>> {
    let packed = pack_gaussians(cloud);
    let serialized = serialize_packed(&packed);
    zstd::stream::encode_all(Cursor::new(serialized.as_slice()), COMPRESSION_LEVEL)
        .map_err(|e| Error::CodecInternal(format!("spz compression failed: {}", e)))
}

pub struct SpzReader;

impl GaussReader for SpzReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let g = load_spz(data)?;

        let mut ir = GaussianCloud::default();
        ir.num_points = g.num_points;
        ir.meta.sh_degree = g.sh_degree;
        ir.meta.antialiased = g.antialiased;
        ir.meta.source_format = "spz".to_string();
        ir.positions = g.positions;
        ir.scales = g.scales;
        ir.alphas = g.alphas;
        ir.colors = g.colors;
        ir.sh = g.sh;

        // Coder side is [x, y, z, w]; the IR leads with w.
        ir.rotations = vec![0.0; g.rotations.len()];
        for (out, q) in ir
            .rotations
            .chunks_exact_mut(4)
            .zip(g.rotations.chunks_exact(4))
        {
            out[0] = q[3];
            out[1] = q[0];
            out[2] = q[1];
            out[3] = q[2];
        }

        validate::check(&ir, options.strict)?;
        Ok(ir)
    }
}

pub struct SpzWriter;

impl GaussWriter for SpzWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let num_points = ir.num_points.max(0) as usize;
        if num_points == 0 {
            return Err(Error::CodecInternal(
                "spz write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, num_points)?;

        let mut g = SpzCloud {
            num_points: ir.num_points,
            sh_degree: ir.meta.sh_degree,
            antialiased: ir.meta.antialiased,
            positions: ir.positions.clone(),
            scales: ir.scales.clone(),
            rotations: vec![0.0; ir.rotations.len()],
            alphas: ir.alphas.clone(),
            colors: ir.colors.clone(),
            sh: ir.sh.clone(),
        };
        for (out, q) in g
            .rotations
            .chunks_exact_mut(4)
            .zip(ir.rotations.chunks_exact(4))
        {
            out[0] = q[1];
            out[1] = q[2];
            out[2] = q[3];
            out[3] = q[0];
        }

        save_spz(&g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud(n: usize, sh_degree: i32) -> GaussianCloud {
        let mut ir = crate::io::ply::tests::sample_cloud(n, sh_degree);
        // Keep SH inside the coder's [-1, 1] bucket range.
        for v in ir.sh.iter_mut() {
            *v = v.clamp(-0.9, 0.9);
        }
        ir
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            SpzReader.read(b"", &ReadOptions::default()),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = SpzReader
            .read(&[1, 2, 3, 4, 5], &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::CodecInternal(_)));
    }

    #[test]
    fn wrong_magic_is_rejected_after_decompression() {
        let mut payload = vec![0u8; 16];
        payload[0] = b'X';
        let compressed =
            zstd::stream::encode_all(Cursor::new(payload.as_slice()), 3).unwrap();
        assert!(matches!(
            SpzReader.read(&compressed, &ReadOptions::default()),
            Err(Error::BadMagic(_))
        ));
    }

    #[test]
    fn roundtrip_is_semantically_close() {
        let ir = sample_cloud(50, 2);
        let bytes = SpzWriter.write(&ir, &WriteOptions { strict: true }).unwrap();
        let back = SpzReader.read(&bytes, &ReadOptions { strict: true }).unwrap();

        assert_eq!(back.num_points, 50);
        assert_eq!(back.meta.sh_degree, 2);
        for (a, b) in ir.positions.iter().zip(back.positions.iter()) {
            assert!((a - b).abs() <= 0.5 / 4096.0 + 1e-6);
        }
        for (a, b) in ir.scales.iter().zip(back.scales.iter()) {
            assert!((a - b).abs() <= 0.5 / 16.0 + 1e-6);
        }
        for (a, b) in ir.colors.iter().zip(back.colors.iter()) {
            assert!((a - b).abs() <= 0.5 / (0.15 * 255.0) + 1e-6);
        }
        // Worst case: half a bucket of 16 plus the initial rounding step.
        for (a, b) in ir.sh.iter().zip(back.sh.iter()) {
            assert!((a - b).abs() <= 8.5 / 128.0 + 1e-6);
        }
        // Quaternions up to sign.
        for i in 0..50 {
            let a = &ir.rotations[i * 4..i * 4 + 4];
            let b = &back.rotations[i * 4..i * 4 + 4];
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            assert!(dot.abs() > 0.999, "rotation mismatch at {}", i);
        }
    }

    #[test]
    fn antialiased_flag_survives() {
        let mut ir = sample_cloud(3, 0);
        ir.meta.antialiased = true;
        let bytes = SpzWriter.write(&ir, &WriteOptions::default()).unwrap();
        let back = SpzReader.read(&bytes, &ReadOptions { strict: true }).unwrap();
        assert!(back.meta.antialiased);
    }

    #[test]
    fn identity_rotation_passes_through_the_shim() {
        let mut ir = sample_cloud(1, 0);
        ir.rotations = vec![1.0, 0.0, 0.0, 0.0];
        let bytes = SpzWriter.write(&ir, &WriteOptions::default()).unwrap();
        let back = SpzReader.read(&bytes, &ReadOptions { strict: true }).unwrap();
        assert!((back.rotations[0] - 1.0).abs() < 1e-2);
        for &v in &back.rotations[1..4] {
            assert!(v.abs() < 1e-2);
        }
    }

    #[test]
    fn writer_rejects_empty_cloud() {
        let ir = GaussianCloud::default();
        assert!(matches!(
            SpzWriter.write(&ir, &WriteOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }
}
