//! SPLAT: a headerless array of fixed 32-byte records.

use crate::byteio::read_f32_le;
use crate::common::{clamp_u8, normalize_quat, sigmoid, MAX_LOGIT, SH_C0};
use crate::error::{Error, Result};
use crate::io::ply::check_shapes;
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::GaussianCloud;
use crate::validate;

pub(crate) const BYTES_PER_SPLAT: usize = 32;

pub struct SplatReader;

impl GaussReader for SplatReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        if data.len() % BYTES_PER_SPLAT != 0 {
            return Err(Error::CodecInternal(format!(
                "splat read failed: size {} is not a multiple of {} bytes",
                data.len(),
                BYTES_PER_SPLAT
            )));
        }

        let num_splats = data.len() / BYTES_PER_SPLAT;
        let mut cloud = GaussianCloud::with_capacity(num_splats, 0);
        cloud.meta.source_format = "splat".to_string();

        for record in data.chunks_exact(BYTES_PER_SPLAT) {
            cloud.positions.push(read_f32_le(record, 0)?);
            cloud.positions.push(read_f32_le(record, 4)?);
            cloud.positions.push(read_f32_le(record, 8)?);

            // Scales are linear on disk, log in the IR.
            for d in 0..3 {
                let s = read_f32_le(record, 12 + d * 4)?;
                cloud.scales.push(if s > 0.0 { s.ln() } else { -10.0 });
            }

            cloud.colors.push((record[24] as f32 / 255.0 - 0.5) / SH_C0);
            cloud.colors.push((record[25] as f32 / 255.0 - 0.5) / SH_C0);
            cloud.colors.push((record[26] as f32 / 255.0 - 0.5) / SH_C0);

            // Inverse sigmoid with the byte endpoints pinned to a finite
            // logit.
            let opacity = record[27];
            cloud.alphas.push(match opacity {
                0 => -MAX_LOGIT,
                255 => MAX_LOGIT,
                b => (-(255.0 / b as f32 - 1.0).ln()).clamp(-MAX_LOGIT, MAX_LOGIT),
            });

            // Quaternion bytes are [w, x, y, z], matching the IR order.
            let q = normalize_quat([
                (record[28] as f32 - 128.0) / 128.0,
                (record[29] as f32 - 128.0) / 128.0,
                (record[30] as f32 - 128.0) / 128.0,
                (record[31] as f32 - 128.0) / 128.0,
            ]);
            cloud.rotations.extend_from_slice(&q);
        }

        validate::check(&cloud, options.strict)?;
        Ok(cloud)
    }
}

pub struct SplatWriter;

impl GaussWriter for SplatWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let num_points = ir.num_points.max(0) as usize;
        if num_points == 0 {
            return Err(Error::CodecInternal(
                "splat write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, num_points)?;

        // Higher-order SH has no home in this format and is dropped.
        let mut out = vec![0u8; num_points * BYTES_PER_SPLAT];
        for (idx, record) in out.chunks_exact_mut(BYTES_PER_SPLAT).enumerate() {
            record[0..4].copy_from_slice(&ir.positions[idx * 3].to_le_bytes());
            record[4..8].copy_from_slice(&ir.positions[idx * 3 + 1].to_le_bytes());
            record[8..12].copy_from_slice(&ir.positions[idx * 3 + 2].to_le_bytes());

            for d in 0..3 {
                let linear = ir.scales[idx * 3 + d].exp();
                record[12 + d * 4..16 + d * 4].copy_from_slice(&linear.to_le_bytes());
            }

            for d in 0..3 {
                let c = ir.colors[idx * 3 + d];
                record[24 + d] = clamp_u8((c * SH_C0 + 0.5) * 255.0);
            }
            record[27] = clamp_u8(sigmoid(ir.alphas[idx]) * 255.0);

            let q = normalize_quat([
                ir.rotations[idx * 4],
                ir.rotations[idx * 4 + 1],
                ir.rotations[idx * 4 + 2],
                ir.rotations[idx * 4 + 3],
            ]);
            for d in 0..4 {
                record[28 + d] = clamp_u8(q[d] * 128.0 + 128.0);
            }
        }

        Ok(out)
    }
}
