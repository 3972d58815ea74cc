//! KSPLAT: a sectioned, bucketed container with three compression modes.
//!
//! The reader handles all three modes, bucketed 16-bit positions, and
//! per-section harmonics degrees. The writer always emits a single
//! full-precision mode-0 section.

use crate::byteio::{read_f16_le, read_f32_le, read_u16_le, read_u32_le, write_f32_le, write_u16_le, write_u32_le};
use crate::common::{clamp_u8, inv_sigmoid_safe, normalize_quat, sigmoid, unpack_rot, SH_C0};
use crate::error::{Error, Result};
use crate::io::ply::check_shapes;
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::{sh_coeffs_per_point, GaussianCloud};
use crate::validate;

const MAIN_HEADER_SIZE: usize = 4096;
const SECTION_HEADER_SIZE: usize = 1024;

/// Per-mode record layout: field widths, their offsets inside a splat
/// record, and the default position quantization range.
struct CompressionConfig {
    rotation_bytes: usize,
    harmonics_bytes: usize,
    scale_start: usize,
    rotation_start: usize,
    color_start: usize,
    harmonics_start: usize,
    default_quant_range: u32,
}

const COMPRESSION_MODES: [CompressionConfig; 3] = [
    // Mode 0: float32 everywhere, uint8 color.
    CompressionConfig {
        rotation_bytes: 16,
        harmonics_bytes: 4,
        scale_start: 12,
        rotation_start: 24,
        color_start: 40,
        harmonics_start: 44,
        default_quant_range: 1,
    },
    // Mode 1: bucketed int16 centers, float16 scale/rotation/harmonics.
    CompressionConfig {
        rotation_bytes: 8,
        harmonics_bytes: 2,
        scale_start: 6,
        rotation_start: 12,
        color_start: 20,
        harmonics_start: 24,
        default_quant_range: 32767,
    },
    // Mode 2: like mode 1 but a 32-bit smallest-three rotation and uint8
    // harmonics dequantized over the header's value range.
    CompressionConfig {
        rotation_bytes: 4,
        harmonics_bytes: 1,
        scale_start: 6,
        rotation_start: 12,
        color_start: 16,
        harmonics_start: 20,
        default_quant_range: 32767,
    },
];

const HARMONICS_COMPONENT_COUNT: [usize; 4] = [0, 9, 24, 45];

fn section_degree(data: &[u8], header: usize) -> Result<usize> {
    let degree = read_u16_le(data, header + 40)? as usize;
    if degree > 3 {
        return Err(Error::UnsupportedVariant(format!(
            "ksplat section harmonics degree {} out of range",
            degree
        )));
    }
    Ok(degree)
}

pub struct KsplatReader;

impl GaussReader for KsplatReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        if data.len() < MAIN_HEADER_SIZE {
            return Err(Error::Truncated(
                "file too small to hold a ksplat main header".to_string(),
            ));
        }

        let major = data[0];
        let minor = data[1];
        if major != 0 || minor < 1 {
            return Err(Error::UnsupportedVariant(format!(
                "ksplat version {}.{}",
                major, minor
            )));
        }

        let max_sections = read_u32_le(data, 4)? as usize;
        let num_splats = read_u32_le(data, 16)? as usize;
        let compression_mode = read_u16_le(data, 20)? as usize;
        if compression_mode > 2 {
            return Err(Error::UnsupportedVariant(format!(
                "ksplat compression mode {}",
                compression_mode
            )));
        }

        let mut min_harmonics = read_f32_le(data, 36)?;
        let mut max_harmonics = read_f32_le(data, 40)?;
        if min_harmonics == 0.0 && max_harmonics == 0.0 {
            min_harmonics = -1.5;
            max_harmonics = 1.5;
        }

        if num_splats == 0 {
            let mut cloud = GaussianCloud::zeroed(0, 0);
            cloud.meta.source_format = "ksplat".to_string();
            validate::check(&cloud, options.strict)?;
            return Ok(cloud);
        }

        let config = &COMPRESSION_MODES[compression_mode];

        // First pass: the file-wide SH degree is the maximum over all
        // non-empty sections; lower-degree sections zero-pad up to it.
        let mut max_degree = 0usize;
        for section_idx in 0..max_sections {
            let header = MAIN_HEADER_SIZE + section_idx * SECTION_HEADER_SIZE;
            if header + SECTION_HEADER_SIZE > data.len() {
                return Err(Error::Truncated(
                    "insufficient data for ksplat section header".to_string(),
                ));
            }
            let splat_count = read_u32_le(data, header)? as usize;
            if splat_count == 0 {
                continue;
            }
            max_degree = max_degree.max(section_degree(data, header)?);
        }

        let coeffs_per_point = sh_coeffs_per_point(max_degree as i32);
        let mut cloud = GaussianCloud::with_capacity(num_splats, max_degree as i32);
        cloud.meta.source_format = "ksplat".to_string();

        let mut section_data_offset = MAIN_HEADER_SIZE + max_sections * SECTION_HEADER_SIZE;
        let mut splat_index = 0usize;

        for section_idx in 0..max_sections {
            let header = MAIN_HEADER_SIZE + section_idx * SECTION_HEADER_SIZE;

            let splat_count = read_u32_le(data, header)? as usize;
            let max_section_splats = read_u32_le(data, header + 4)? as usize;
            let bucket_capacity = read_u32_le(data, header + 8)? as usize;
            let bucket_count = read_u32_le(data, header + 12)? as usize;
            let block_size = read_f32_le(data, header + 16)?;
            let bucket_storage_size = read_u16_le(data, header + 20)? as usize;
            let mut quant_range = read_u32_le(data, header + 24)?;
            if quant_range == 0 {
                quant_range = config.default_quant_range;
            }
            let full_buckets = read_u32_le(data, header + 32)? as usize;
            let partial_buckets = read_u32_le(data, header + 36)? as usize;
            let degree = section_degree(data, header)?;

            let full_bucket_splats = full_buckets.saturating_mul(bucket_capacity);
            let partial_meta_size = partial_buckets * 4;
            let total_bucket_storage = bucket_storage_size * bucket_count + partial_meta_size;
            let harmonics_count = HARMONICS_COMPONENT_COUNT[degree];

            // The field offsets chain, so the record ends right after the
            // harmonics block, padded to a 4-byte boundary.
            let raw_bytes_per_splat =
                config.harmonics_start + harmonics_count * config.harmonics_bytes;
            let bytes_per_splat = (raw_bytes_per_splat + 3) & !3;
            let section_data_size = bytes_per_splat * max_section_splats;

            let bucket_centers_offset = section_data_offset + partial_meta_size;
            if bucket_centers_offset + bucket_count * 12 > data.len() {
                return Err(Error::Truncated(
                    "insufficient data for ksplat bucket centers".to_string(),
                ));
            }
            let splat_data_offset = section_data_offset + total_bucket_storage;
            if splat_data_offset + section_data_size > data.len() {
                return Err(Error::Truncated(
                    "insufficient data for ksplat section payload".to_string(),
                ));
            }

            let position_scale = block_size / 2.0 / quant_range as f32;

            // Partial buckets are walked in order, consuming each declared
            // count before advancing.
            let mut current_partial = full_buckets;
            let mut current_partial_base = full_bucket_splats;

            for splat_idx in 0..splat_count {
                let record = splat_data_offset + splat_idx * bytes_per_splat;

                let bucket_idx = if compression_mode == 0 {
                    0
                } else if splat_idx < full_bucket_splats {
                    splat_idx / bucket_capacity.max(1)
                } else {
                    let slot = current_partial - full_buckets;
                    if slot >= partial_buckets {
                        return Err(Error::CodecInternal(
                            "ksplat splat outside declared buckets".to_string(),
                        ));
                    }
                    let bucket_len =
                        read_u32_le(data, section_data_offset + slot * 4)? as usize;
                    if splat_idx >= current_partial_base + bucket_len {
                        current_partial += 1;
                        current_partial_base += bucket_len;
                        if current_partial - full_buckets >= partial_buckets {
                            return Err(Error::CodecInternal(
                                "ksplat splat outside declared buckets".to_string(),
                            ));
                        }
                    }
                    current_partial
                };

                let (x, y, z) = if compression_mode == 0 {
                    (
                        read_f32_le(data, record)?,
                        read_f32_le(data, record + 4)?,
                        read_f32_le(data, record + 8)?,
                    )
                } else {
                    let center = bucket_centers_offset + bucket_idx * 12;
                    let cx = read_f32_le(data, center)?;
                    let cy = read_f32_le(data, center + 4)?;
                    let cz = read_f32_le(data, center + 8)?;
                    let qx = read_u16_le(data, record)? as i16;
                    let qy = read_u16_le(data, record + 2)? as i16;
                    let qz = read_u16_le(data, record + 4)? as i16;
                    (
                        (qx as f32 - quant_range as f32) * position_scale + cx,
                        (qy as f32 - quant_range as f32) * position_scale + cy,
                        (qz as f32 - quant_range as f32) * position_scale + cz,
                    )
                };

                let (sx, sy, sz) = if compression_mode == 0 {
                    (
                        read_f32_le(data, record + config.scale_start)?,
                        read_f32_le(data, record + config.scale_start + 4)?,
                        read_f32_le(data, record + config.scale_start + 8)?,
                    )
                } else {
                    (
                        read_f16_le(data, record + config.scale_start)?,
                        read_f16_le(data, record + config.scale_start + 2)?,
                        read_f16_le(data, record + config.scale_start + 4)?,
                    )
                };

                let rot = match config.rotation_bytes {
                    4 => unpack_rot(read_u32_le(data, record + config.rotation_start)?),
                    16 => [
                        read_f32_le(data, record + config.rotation_start)?,
                        read_f32_le(data, record + config.rotation_start + 4)?,
                        read_f32_le(data, record + config.rotation_start + 8)?,
                        read_f32_le(data, record + config.rotation_start + 12)?,
                    ],
                    _ => [
                        read_f16_le(data, record + config.rotation_start)?,
                        read_f16_le(data, record + config.rotation_start + 2)?,
                        read_f16_le(data, record + config.rotation_start + 4)?,
                        read_f16_le(data, record + config.rotation_start + 6)?,
                    ],
                };

                let color = crate::byteio::read_bytes(data, record + config.color_start, 4)?;

                cloud.positions.extend_from_slice(&[x, y, z]);
                for s in [sx, sy, sz] {
                    cloud.scales.push(if s > 0.0 { s.ln() } else { -10.0 });
                }
                cloud.rotations.extend_from_slice(&rot);
                for d in 0..3 {
                    cloud.colors.push((color[d] as f32 / 255.0 - 0.5) / SH_C0);
                }
                cloud.alphas.push(inv_sigmoid_safe(color[3] as f32 / 255.0));

                let sh_base = cloud.sh.len();
                cloud.sh.resize(sh_base + coeffs_per_point, 0.0);
                if harmonics_count > 0 {
                    let coeffs_per_channel = harmonics_count / 3;
                    for i in 0..harmonics_count {
                        let value = match compression_mode {
                            0 => read_f32_le(data, record + config.harmonics_start + i * 4)?,
                            1 => read_f16_le(data, record + config.harmonics_start + i * 2)?,
                            _ => {
                                let byte = crate::byteio::read_bytes(
                                    data,
                                    record + config.harmonics_start + i,
                                    1,
                                )?[0];
                                min_harmonics
                                    + (byte as f32 / 255.0) * (max_harmonics - min_harmonics)
                            }
                        };
                        // Disk is channel-first; the IR interleaves channels
                        // per coefficient.
                        let channel = i / coeffs_per_channel;
                        let coeff = i % coeffs_per_channel;
                        cloud.sh[sh_base + coeff * 3 + channel] = value;
                    }
                }

                splat_index += 1;
            }

            section_data_offset += section_data_size + total_bucket_storage;
        }

        if splat_index != num_splats {
            return Err(Error::CodecInternal(format!(
                "ksplat splat count mismatch: header says {}, sections hold {}",
                num_splats, splat_index
            )));
        }

        validate::check(&cloud, options.strict)?;
        Ok(cloud)
    }
}

/// Writer policy: one section, mode 0, no bucketing, the IR's degree
/// recorded verbatim.
pub struct KsplatWriter;

impl GaussWriter for KsplatWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let num_points = ir.num_points.max(0) as usize;
        if num_points == 0 {
            return Err(Error::CodecInternal(
                "ksplat write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, num_points)?;

        let degree = ir.meta.sh_degree.clamp(0, 3) as usize;
        let harmonics_count = HARMONICS_COMPONENT_COUNT[degree];
        let coeffs_per_point = sh_coeffs_per_point(degree as i32);
        if !ir.sh.is_empty() && ir.sh.len() != num_points * coeffs_per_point {
            return Err(Error::InconsistentCounts(
                "sh length disagrees with num_points and sh_degree".to_string(),
            ));
        }

        let config = &COMPRESSION_MODES[0];
        let raw_bytes_per_splat =
            config.harmonics_start + harmonics_count * config.harmonics_bytes;
        let bytes_per_splat = (raw_bytes_per_splat + 3) & !3;
        let total = MAIN_HEADER_SIZE + SECTION_HEADER_SIZE + bytes_per_splat * num_points;

        let mut out = vec![0u8; total];
        out[0] = 0; // major version
        out[1] = 1; // minor version
        write_u32_le(&mut out, 4, 1); // max sections
        write_u32_le(&mut out, 16, num_points as u32);
        write_u16_le(&mut out, 20, 0); // compression mode
        write_f32_le(&mut out, 36, -1.5);
        write_f32_le(&mut out, 40, 1.5);

        let section = MAIN_HEADER_SIZE;
        write_u32_le(&mut out, section, num_points as u32);
        write_u32_le(&mut out, section + 4, num_points as u32);
        write_u32_le(&mut out, section + 8, num_points as u32); // bucket capacity
        write_u32_le(&mut out, section + 12, 0); // bucket count
        write_f32_le(&mut out, section + 16, 1.0); // spatial block size
        write_u16_le(&mut out, section + 20, 0); // bucket storage size
        write_u32_le(&mut out, section + 24, 1); // quantization range
        write_u32_le(&mut out, section + 32, 0); // full buckets
        write_u32_le(&mut out, section + 36, 0); // partial buckets
        write_u16_le(&mut out, section + 40, degree as u16);

        let data_base = MAIN_HEADER_SIZE + SECTION_HEADER_SIZE;
        for i in 0..num_points {
            let record = data_base + i * bytes_per_splat;

            write_f32_le(&mut out, record, ir.positions[i * 3]);
            write_f32_le(&mut out, record + 4, ir.positions[i * 3 + 1]);
            write_f32_le(&mut out, record + 8, ir.positions[i * 3 + 2]);

            for d in 0..3 {
                write_f32_le(
                    &mut out,
                    record + config.scale_start + d * 4,
                    ir.scales[i * 3 + d].exp(),
                );
            }

            let q = normalize_quat([
                ir.rotations[i * 4],
                ir.rotations[i * 4 + 1],
                ir.rotations[i * 4 + 2],
                ir.rotations[i * 4 + 3],
            ]);
            for d in 0..4 {
                write_f32_le(&mut out, record + config.rotation_start + d * 4, q[d]);
            }

            for d in 0..3 {
                out[record + config.color_start + d] =
                    clamp_u8((ir.colors[i * 3 + d] * SH_C0 + 0.5) * 255.0);
            }
            out[record + config.color_start + 3] = clamp_u8(sigmoid(ir.alphas[i]) * 255.0);

            if harmonics_count > 0 && !ir.sh.is_empty() {
                let coeffs_per_channel = harmonics_count / 3;
                for channel in 0..3 {
                    for coeff in 0..coeffs_per_channel {
                        let disk_index = channel * coeffs_per_channel + coeff;
                        let value = ir.sh[i * coeffs_per_point + coeff * 3 + channel];
                        write_f32_le(
                            &mut out,
                            record + config.harmonics_start + disk_index * 4,
                            value,
                        );
                    }
                }
            }
        }

        Ok(out)
    }
}
