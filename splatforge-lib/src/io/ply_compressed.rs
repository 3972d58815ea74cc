//! Chunked compressed PLY: per-256-point min/max requantization with
//! 11-10-11 packed positions and scales, 2-10-10-10 smallest-three
//! rotations, 8-8-8-8 color+opacity, and an optional uchar SH element.

use std::io::Write;

use crate::common::{
    degree_for_dim, dim_for_degree, lerp, normalize, pack_111011, pack_8888, pack_rot, sigmoid,
    unpack_111011, unpack_8888, unpack_rot, SH_C0,
};
use crate::error::{Error, Result};
use crate::io::ply::{check_shapes, next_header_line};
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::GaussianCloud;
use crate::validate;

pub(crate) const CHUNK_SIZE: usize = 256;

/// The 18 chunk-row properties, in canonical order.
pub(crate) const CHUNK_PROPERTIES: [&str; 18] = [
    "min_x", "min_y", "min_z", "max_x", "max_y", "max_z", "min_scale_x", "min_scale_y",
    "min_scale_z", "max_scale_x", "max_scale_y", "max_scale_z", "min_r", "min_g", "min_b",
    "max_r", "max_g", "max_b",
];

/// The 4 packed vertex-row properties, in canonical order.
pub(crate) const VERTEX_PROPERTIES: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

#[derive(Debug, Default)]
pub(crate) struct ElementDecl {
    pub name: String,
    pub count: usize,
    /// `(type, name)` pairs in declared order.
    pub properties: Vec<(String, String)>,
}

/// Parse the header after the magic and format lines, up to `end_header`.
pub(crate) fn parse_elements(data: &[u8], offset: &mut usize) -> Result<Vec<ElementDecl>> {
    let mut elements: Vec<ElementDecl> = Vec::new();
    loop {
        let line = next_header_line(data, offset)
            .ok_or_else(|| Error::Truncated("ply header ended before end_header".to_string()))?;
        if line == "end_header" {
            break;
        }
        if let Some(rest) = line.strip_prefix("element ") {
            let (name, count) = rest
                .split_once(' ')
                .ok_or_else(|| Error::BadFormat(format!("invalid element line: {}", line)))?;
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| Error::BadFormat(format!("invalid element count: {}", line)))?;
            elements.push(ElementDecl {
                name: name.to_string(),
                count,
                properties: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("property ") {
            let element = elements
                .last_mut()
                .ok_or_else(|| Error::BadFormat("property before element".to_string()))?;
            let (ty, name) = rest
                .split_once(' ')
                .ok_or_else(|| Error::BadFormat(format!("invalid property line: {}", line)))?;
            element
                .properties
                .push((ty.to_string(), name.trim().to_string()));
        } else {
            return Err(Error::BadFormat(format!("unexpected header line: {}", line)));
        }
    }
    Ok(elements)
}

/// Column index of each canonical name within a declared property list, with
/// existence and type checked.
fn column_map(
    element: &ElementDecl,
    wanted: &[&str],
    ty: &str,
) -> Result<Vec<usize>> {
    if element.properties.len() != wanted.len() {
        return Err(Error::BadFormat(format!(
            "element {} has {} properties, expect {}",
            element.name,
            element.properties.len(),
            wanted.len()
        )));
    }
    wanted
        .iter()
        .map(|name| {
            element
                .properties
                .iter()
                .position(|(t, n)| t == ty && n == name)
                .ok_or_else(|| {
                    Error::BadFormat(format!(
                        "element {} is missing {} property {}",
                        element.name, ty, name
                    ))
                })
        })
        .collect()
}

pub struct PlyCompressedReader;

impl GaussReader for PlyCompressedReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut offset = 0;
        match next_header_line(data, &mut offset) {
            Some("ply") => {}
            _ => return Err(Error::BadMagic("not a ply file".to_string())),
        }
        match next_header_line(data, &mut offset) {
            Some("format binary_little_endian 1.0") => {}
            _ => {
                return Err(Error::BadFormat(
                    "only binary_little_endian 1.0 is supported".to_string(),
                ))
            }
        }

        let elements = parse_elements(data, &mut offset)?;
        let chunk_el = elements
            .iter()
            .find(|e| e.name == "chunk")
            .ok_or_else(|| Error::BadFormat("missing chunk element".to_string()))?;
        let vertex_el = elements
            .iter()
            .find(|e| e.name == "vertex")
            .ok_or_else(|| Error::BadFormat("missing vertex element".to_string()))?;
        let sh_el = elements.iter().find(|e| e.name == "sh");

        let num_vertices = vertex_el.count;
        let num_chunks = chunk_el.count;
        if num_chunks != num_vertices.div_ceil(CHUNK_SIZE) {
            return Err(Error::CodecInternal(format!(
                "chunk count mismatch: {} chunks for {} vertices",
                num_chunks, num_vertices
            )));
        }

        let chunk_cols = column_map(chunk_el, &CHUNK_PROPERTIES, "float")?;
        let vertex_cols = column_map(vertex_el, &VERTEX_PROPERTIES, "uint")?;

        let (num_sh, sh_coeffs) = match sh_el {
            Some(el) => {
                let coeffs = el.properties.len();
                if !matches!(coeffs, 9 | 24 | 45) {
                    return Err(Error::BadFormat(format!(
                        "sh element has {} coefficients, expect 9, 24 or 45",
                        coeffs
                    )));
                }
                if el.properties.iter().any(|(t, _)| t != "uchar") {
                    return Err(Error::BadFormat(
                        "sh element must contain only uchar properties".to_string(),
                    ));
                }
                if el.count != num_vertices {
                    return Err(Error::CodecInternal(format!(
                        "sh row count {} does not match vertex count {}",
                        el.count, num_vertices
                    )));
                }
                (el.count, coeffs)
            }
            None => (0, 0),
        };

        // Payload: chunk rows, packed vertex rows, optional sh bytes.
        let chunk_bytes = num_chunks * 18 * 4;
        let vertex_bytes = num_vertices * 4 * 4;
        let sh_bytes = num_sh * sh_coeffs;
        let needed = chunk_bytes + vertex_bytes + sh_bytes;
        if data.len() < offset + needed {
            return Err(Error::Truncated(format!(
                "payload needs {} bytes, have {}",
                needed,
                data.len() - offset
            )));
        }

        // Chunk rows into canonical column order.
        let mut chunk_data = vec![0.0f32; num_chunks * 18];
        for c in 0..num_chunks {
            let row = &data[offset + c * 18 * 4..offset + (c + 1) * 18 * 4];
            for (slot, &col) in chunk_cols.iter().enumerate() {
                let b = &row[col * 4..col * 4 + 4];
                chunk_data[c * 18 + slot] = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
        }
        let vertex_base = offset + chunk_bytes;
        let sh_base = vertex_base + vertex_bytes;

        let sh_dim = sh_coeffs / 3;
        let mut cloud = GaussianCloud::zeroed(num_vertices, degree_for_dim(sh_dim));
        cloud.meta.source_format = "compressed.ply".to_string();

        for i in 0..num_vertices {
            let chunk = &chunk_data[(i / CHUNK_SIZE) * 18..(i / CHUNK_SIZE) * 18 + 18];
            let row = &data[vertex_base + i * 16..vertex_base + i * 16 + 16];
            let word = |slot: usize| {
                let b = &row[vertex_cols[slot] * 4..vertex_cols[slot] * 4 + 4];
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            };

            let pos = unpack_111011(word(0));
            cloud.positions[i * 3] = lerp(chunk[0], chunk[3], pos[0]);
            cloud.positions[i * 3 + 1] = lerp(chunk[1], chunk[4], pos[1]);
            cloud.positions[i * 3 + 2] = lerp(chunk[2], chunk[5], pos[2]);

            let rot = unpack_rot(word(1));
            cloud.rotations[i * 4..i * 4 + 4].copy_from_slice(&rot);

            let scale = unpack_111011(word(2));
            cloud.scales[i * 3] = lerp(chunk[6], chunk[9], scale[0]);
            cloud.scales[i * 3 + 1] = lerp(chunk[7], chunk[10], scale[1]);
            cloud.scales[i * 3 + 2] = lerp(chunk[8], chunk[11], scale[2]);

            let color = unpack_8888(word(3));
            let cr = lerp(chunk[12], chunk[15], color[0]);
            let cg = lerp(chunk[13], chunk[16], color[1]);
            let cb = lerp(chunk[14], chunk[17], color[2]);
            cloud.colors[i * 3] = (cr - 0.5) / SH_C0;
            cloud.colors[i * 3 + 1] = (cg - 0.5) / SH_C0;
            cloud.colors[i * 3 + 2] = (cb - 0.5) / SH_C0;

            // Keep the logit finite at the byte endpoints.
            let opacity = color[3].clamp(0.001, 0.999);
            cloud.alphas[i] = -(1.0 / opacity - 1.0).ln();
        }

        if sh_coeffs > 0 {
            let sh_data = &data[sh_base..sh_base + sh_bytes];
            for i in 0..num_vertices {
                for j in 0..sh_dim {
                    let row = &sh_data[i * sh_coeffs..(i + 1) * sh_coeffs];
                    let decode = |byte: u8| -> f32 {
                        let n = match byte {
                            0 => 0.0,
                            255 => 1.0,
                            b => (b as f32 + 0.5) / 256.0,
                        };
                        (n - 0.5) * 8.0
                    };
                    cloud.sh[i * sh_coeffs + j * 3] = decode(row[j]);
                    cloud.sh[i * sh_coeffs + j * 3 + 1] = decode(row[j + sh_dim]);
                    cloud.sh[i * sh_coeffs + j * 3 + 2] = decode(row[j + 2 * sh_dim]);
                }
            }
        }

        validate::check(&cloud, options.strict)?;
        Ok(cloud)
    }
}

pub struct PlyCompressedWriter;

impl GaussWriter for PlyCompressedWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let num_points = ir.num_points.max(0) as usize;
        if num_points == 0 {
            return Err(Error::CodecInternal(
                "compressed ply write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, num_points)?;

        let num_chunks = num_points.div_ceil(CHUNK_SIZE);
        let sh_dim = dim_for_degree(ir.meta.sh_degree);
        let sh_coeffs = sh_dim * 3;

        let mut chunk_data = vec![0.0f32; num_chunks * 18];
        let mut packed_data = vec![0u32; num_points * 4];
        let mut sh_data = vec![0u8; num_points * sh_coeffs];

        let mut positions = [0.0f32; CHUNK_SIZE * 3];
        let mut scales = [0.0f32; CHUNK_SIZE * 3];
        let mut colors = [0.0f32; CHUNK_SIZE * 3];
        let mut rotations = [0.0f32; CHUNK_SIZE * 4];

        for chunk_idx in 0..num_chunks {
            let start = chunk_idx * CHUNK_SIZE;
            let count = CHUNK_SIZE.min(num_points - start);

            for i in 0..count {
                let idx = start + i;
                positions[i * 3..i * 3 + 3].copy_from_slice(&ir.positions[idx * 3..idx * 3 + 3]);
                scales[i * 3..i * 3 + 3].copy_from_slice(&ir.scales[idx * 3..idx * 3 + 3]);
                for d in 0..3 {
                    colors[i * 3 + d] = ir.colors[idx * 3 + d] * SH_C0 + 0.5;
                }
                rotations[i * 4..i * 4 + 4].copy_from_slice(&ir.rotations[idx * 4..idx * 4 + 4]);
            }
            // Pad the partial chunk with the last valid point so the min/max
            // fit covers a full 256 rows.
            for i in count..CHUNK_SIZE {
                let last = count - 1;
                for d in 0..3 {
                    positions[i * 3 + d] = positions[last * 3 + d];
                    scales[i * 3 + d] = scales[last * 3 + d];
                    colors[i * 3 + d] = colors[last * 3 + d];
                }
                for d in 0..4 {
                    rotations[i * 4 + d] = rotations[last * 4 + d];
                }
            }

            let mut mins = [f32::INFINITY; 9];
            let mut maxs = [f32::NEG_INFINITY; 9];
            for i in 0..CHUNK_SIZE {
                for d in 0..3 {
                    mins[d] = mins[d].min(positions[i * 3 + d]);
                    maxs[d] = maxs[d].max(positions[i * 3 + d]);
                    mins[3 + d] = mins[3 + d].min(scales[i * 3 + d]);
                    maxs[3 + d] = maxs[3 + d].max(scales[i * 3 + d]);
                    mins[6 + d] = mins[6 + d].min(colors[i * 3 + d]);
                    maxs[6 + d] = maxs[6 + d].max(colors[i * 3 + d]);
                }
            }
            // Scale ranges are clamped before quantization.
            for d in 3..6 {
                mins[d] = mins[d].clamp(-20.0, 20.0);
                maxs[d] = maxs[d].clamp(-20.0, 20.0);
            }

            let chunk = &mut chunk_data[chunk_idx * 18..chunk_idx * 18 + 18];
            chunk[0..3].copy_from_slice(&mins[0..3]);
            chunk[3..6].copy_from_slice(&maxs[0..3]);
            chunk[6..9].copy_from_slice(&mins[3..6]);
            chunk[9..12].copy_from_slice(&maxs[3..6]);
            chunk[12..15].copy_from_slice(&mins[6..9]);
            chunk[15..18].copy_from_slice(&maxs[6..9]);

            for i in 0..count {
                let idx = start + i;
                let out = &mut packed_data[idx * 4..idx * 4 + 4];

                out[0] = pack_111011(
                    normalize(positions[i * 3], mins[0], maxs[0]),
                    normalize(positions[i * 3 + 1], mins[1], maxs[1]),
                    normalize(positions[i * 3 + 2], mins[2], maxs[2]),
                );
                out[1] = pack_rot([
                    rotations[i * 4],
                    rotations[i * 4 + 1],
                    rotations[i * 4 + 2],
                    rotations[i * 4 + 3],
                ]);
                out[2] = pack_111011(
                    normalize(scales[i * 3], mins[3], maxs[3]),
                    normalize(scales[i * 3 + 1], mins[4], maxs[4]),
                    normalize(scales[i * 3 + 2], mins[5], maxs[5]),
                );
                out[3] = pack_8888(
                    normalize(colors[i * 3], mins[6], maxs[6]),
                    normalize(colors[i * 3 + 1], mins[7], maxs[7]),
                    normalize(colors[i * 3 + 2], mins[8], maxs[8]),
                    sigmoid(ir.alphas[idx]),
                );
            }

            // SH bytes are laid out channel-first on disk.
            if sh_coeffs > 0 {
                for i in 0..count {
                    let idx = start + i;
                    let row = &mut sh_data[idx * sh_coeffs..(idx + 1) * sh_coeffs];
                    for channel in 0..3 {
                        for j in 0..sh_dim {
                            let value = ir.sh[(idx * sh_dim + j) * 3 + channel];
                            let n = value / 8.0 + 0.5;
                            row[channel * sh_dim + j] =
                                ((n * 256.0).floor()).clamp(0.0, 255.0) as u8;
                        }
                    }
                }
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
        out.extend_from_slice(b"comment generated by splatforge\n");
        writeln!(out, "element chunk {}", num_chunks)
            .map_err(|e| Error::CodecInternal(e.to_string()))?;
        for name in CHUNK_PROPERTIES {
            writeln!(out, "property float {}", name)
                .map_err(|e| Error::CodecInternal(e.to_string()))?;
        }
        writeln!(out, "element vertex {}", num_points)
            .map_err(|e| Error::CodecInternal(e.to_string()))?;
        for name in VERTEX_PROPERTIES {
            writeln!(out, "property uint {}", name)
                .map_err(|e| Error::CodecInternal(e.to_string()))?;
        }
        if sh_coeffs > 0 {
            writeln!(out, "element sh {}", num_points)
                .map_err(|e| Error::CodecInternal(e.to_string()))?;
            for i in 0..sh_coeffs {
                writeln!(out, "property uchar f_rest_{}", i)
                    .map_err(|e| Error::CodecInternal(e.to_string()))?;
            }
        }
        out.extend_from_slice(b"end_header\n");

        out.reserve(chunk_data.len() * 4 + packed_data.len() * 4 + sh_data.len());
        for &v in &chunk_data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for &v in &packed_data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&sh_data);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ply::tests::sample_cloud;

    #[test]
    fn roundtrip_stays_within_chunk_precision() {
        let ir = sample_cloud(300, 2);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions { strict: true })
            .unwrap();
        let back = PlyCompressedReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(back.num_points, 300);
        assert_eq!(back.meta.sh_degree, 2);

        // Worst-case step per axis: 10 bits on y, 11 on x/z, over the
        // chunk-local range.
        for i in 0..300 {
            for d in 0..3 {
                let range_hint = 300.0f32; // fixture spans roughly [-300, 300]
                let err = (back.positions[i * 3 + d] - ir.positions[i * 3 + d]).abs();
                assert!(err <= range_hint / 1023.0 + 1e-4, "pos err {} at {}", err, i);
            }
            let err = (back.alphas[i] - ir.alphas[i]).abs();
            assert!(err < 0.05, "alpha err {}", err);
        }
        // Scales are constant per axis in the fixture, so they come back
        // exactly (zero-width range decodes to the min).
        for (a, b) in ir.scales.iter().zip(back.scales.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
        // Rotations within smallest-three 10-bit precision, up to sign.
        for i in 0..300 {
            let a = &ir.rotations[i * 4..i * 4 + 4];
            let b = &back.rotations[i * 4..i * 4 + 4];
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            assert!(dot.abs() > 1.0 - 5e-3, "rot mismatch at {}: dot {}", i, dot);
        }
        // SH within one quantization step of the [-4, 4] byte codec.
        for (a, b) in ir.sh.iter().zip(back.sh.iter()) {
            assert!((a - b).abs() <= 8.0 / 256.0 + 1e-5);
        }
    }

    #[test]
    fn opacity_byte_endpoints_stay_finite() {
        let mut ir = sample_cloud(2, 0);
        ir.alphas[0] = -40.0; // sigmoid ~ 0 -> byte 0
        ir.alphas[1] = 40.0; // sigmoid ~ 1 -> byte 255
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let back = PlyCompressedReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        assert!(back.alphas.iter().all(|a| a.is_finite()));
        assert!(back.alphas[0] < -6.0);
        assert!(back.alphas[1] > 6.0);
    }

    #[test]
    fn scale_ranges_are_clamped() {
        let mut ir = sample_cloud(1, 0);
        ir.scales = vec![-100.0, 0.0, 100.0];
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let back = PlyCompressedReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        assert!(back.scales[0] >= -20.0);
        assert!(back.scales[2] <= 20.0);
    }

    #[test]
    fn sh_bytes_transpose_to_coefficient_first() {
        let mut ir = sample_cloud(1, 1);
        // Distinct, exactly-representable values per channel/coefficient.
        for j in 0..3 {
            for ch in 0..3 {
                let byte = (10 + j * 3 + ch) as f32;
                ir.sh[j * 3 + ch] = ((byte + 0.5) / 256.0 - 0.5) * 8.0;
            }
        }
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let back = PlyCompressedReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        for (a, b) in ir.sh.iter().zip(back.sh.iter()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn chunk_count_mismatch_is_rejected() {
        let ir = sample_cloud(10, 0);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        // Corrupt the chunk element count from 1 to 2, touching only the
        // text header.
        let needle = b"element chunk 1";
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        let mut corrupted = bytes.clone();
        corrupted[at + needle.len() - 1] = b'2';
        assert!(matches!(
            PlyCompressedReader.read(&corrupted, &ReadOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }

    #[test]
    fn writer_rejects_empty_cloud() {
        let ir = GaussianCloud::default();
        assert!(matches!(
            PlyCompressedWriter.write(&ir, &WriteOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }

    #[test]
    fn partial_chunk_is_padded_not_emitted() {
        let ir = sample_cloud(260, 0);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let back = PlyCompressedReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        // 260 points -> 2 chunks, but still exactly 260 packed rows.
        assert_eq!(back.num_points, 260);
    }
}
