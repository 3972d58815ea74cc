//! Standard Gaussian-splat PLY: a text header followed by a little-endian
//! binary vertex payload, one `float` column per property.

use std::io::Write;

use foldhash::{HashMap, HashMapExt};

use crate::common::degree_for_dim;
use crate::error::{Error, Result};
use crate::io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
use crate::structures::GaussianCloud;
use crate::validate;

/// Pull the next header line out of `buffer`, advancing `offset` past the
/// terminating newline. Comment lines and blank lines are skipped; the
/// returned line is trimmed of surrounding whitespace.
pub(crate) fn next_header_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b str> {
    while *offset < buffer.len() {
        let start = *offset;
        let raw = match memchr::memchr(b'\n', &buffer[start..]) {
            Some(pos) => {
                *offset = start + pos + 1;
                &buffer[start..start + pos]
            }
            None => {
                *offset = buffer.len();
                &buffer[start..]
            }
        };
        let line = std::str::from_utf8(raw).ok()?.trim();
        if line.is_empty() || line.starts_with("comment") {
            continue;
        }
        return Some(line);
    }
    None
}

fn header_line<'b>(buffer: &'b [u8], offset: &mut usize, what: &str) -> Result<&'b str> {
    next_header_line(buffer, offset)
        .ok_or_else(|| Error::Truncated(format!("ply header ended before {}", what)))
}

pub(crate) const MANDATORY_FIELDS: [&str; 14] = [
    "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3", "opacity",
    "f_dc_0", "f_dc_1", "f_dc_2",
];

/// Reader for the standard (uncompressed) layout.
pub struct PlyReader;

impl GaussReader for PlyReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut offset = 0;
        if header_line(data, &mut offset, "magic")? != "ply" {
            return Err(Error::BadMagic("not a ply file".to_string()));
        }
        if header_line(data, &mut offset, "format line")? != "format binary_little_endian 1.0" {
            return Err(Error::BadFormat(
                "only binary_little_endian 1.0 is supported".to_string(),
            ));
        }

        let vertex_line = header_line(data, &mut offset, "vertex element")?;
        let num_points: usize = vertex_line
            .strip_prefix("element vertex ")
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::BadFormat("missing vertex element".to_string()))?;

        let mut field_names: Vec<String> = Vec::new();
        loop {
            let line = header_line(data, &mut offset, "end_header")?;
            if line == "end_header" {
                break;
            }
            let name = line
                .strip_prefix("property float ")
                .ok_or_else(|| Error::BadFormat(format!("unsupported property: {}", line)))?;
            field_names.push(name.trim().to_string());
        }

        let mut fields: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
        for (i, name) in field_names.iter().enumerate() {
            fields.insert(name.as_str(), i);
        }

        let idx = |name: &str| -> Result<usize> {
            fields
                .get(name)
                .copied()
                .ok_or_else(|| Error::BadFormat(format!("missing required field: {}", name)))
        };
        for name in MANDATORY_FIELDS {
            idx(name)?;
        }

        let ix = idx("x")?;
        let iy = idx("y")?;
        let iz = idx("z")?;
        let is = [idx("scale_0")?, idx("scale_1")?, idx("scale_2")?];
        let irot = [idx("rot_0")?, idx("rot_1")?, idx("rot_2")?, idx("rot_3")?];
        let iop = idx("opacity")?;
        let ic = [idx("f_dc_0")?, idx("f_dc_1")?, idx("f_dc_2")?];

        let mut sh_idx = Vec::new();
        for i in 0..45 {
            match fields.get(format!("f_rest_{}", i).as_str()) {
                Some(&found) => sh_idx.push(found),
                None => break,
            }
        }
        if sh_idx.len() % 3 != 0 {
            return Err(Error::BadFormat(
                "incomplete spherical harmonics fields".to_string(),
            ));
        }
        let sh_dim = sh_idx.len() / 3;

        // Anything left over is an extra attribute carried through verbatim.
        let mut known = vec![false; field_names.len()];
        for &i in [ix, iy, iz, iop].iter().chain(&is).chain(&irot).chain(&ic) {
            known[i] = true;
        }
        for &i in &sh_idx {
            known[i] = true;
        }
        let extra_fields: Vec<(String, usize)> = field_names
            .iter()
            .enumerate()
            .filter(|(i, _)| !known[*i])
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let stride = field_names.len();
        let payload_len = num_points
            .checked_mul(stride)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::Truncated("payload size overflow".to_string()))?;
        if data.len() < offset + payload_len {
            return Err(Error::Truncated(format!(
                "vertex payload needs {} bytes, have {}",
                payload_len,
                data.len() - offset
            )));
        }

        let values: Vec<f32> = data[offset..offset + payload_len]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let mut cloud = GaussianCloud::with_capacity(num_points, degree_for_dim(sh_dim));
        cloud.meta.source_format = "ply".to_string();

        let mut extras: Vec<Vec<f32>> = extra_fields
            .iter()
            .map(|_| Vec::with_capacity(num_points))
            .collect();

        for p in 0..num_points {
            let row = &values[p * stride..(p + 1) * stride];
            cloud.positions.extend_from_slice(&[row[ix], row[iy], row[iz]]);
            cloud
                .scales
                .extend_from_slice(&[row[is[0]], row[is[1]], row[is[2]]]);
            cloud.rotations.extend_from_slice(&[
                row[irot[0]],
                row[irot[1]],
                row[irot[2]],
                row[irot[3]],
            ]);
            cloud.alphas.push(row[iop]);
            cloud
                .colors
                .extend_from_slice(&[row[ic[0]], row[ic[1]], row[ic[2]]]);

            // On disk the f_rest block is channel-first; interleave per
            // coefficient for the IR.
            for j in 0..sh_dim {
                cloud.sh.extend_from_slice(&[
                    row[sh_idx[j]],
                    row[sh_idx[j + sh_dim]],
                    row[sh_idx[j + 2 * sh_dim]],
                ]);
            }

            for (slot, (_, col)) in extras.iter_mut().zip(&extra_fields) {
                slot.push(row[*col]);
            }
        }

        for ((name, _), arr) in extra_fields.into_iter().zip(extras) {
            cloud.extras.insert(name, arr);
        }

        validate::check(&cloud, options.strict)?;
        Ok(cloud)
    }
}

/// Writer for the standard layout. Columns are emitted in the fixed order
/// `x y z scale_0..2 rot_0..3 opacity f_dc_0..2 f_rest_*`.
pub struct PlyWriter;

impl GaussWriter for PlyWriter {
    fn write(&self, ir: &GaussianCloud, options: &WriteOptions) -> Result<Vec<u8>> {
        validate::check(ir, options.strict)?;

        let num_points = ir.num_points.max(0) as usize;
        if num_points == 0 {
            return Err(Error::CodecInternal(
                "ply write failed: no points to write".to_string(),
            ));
        }
        check_shapes(ir, num_points)?;

        let sh_dim = crate::common::dim_for_degree(ir.meta.sh_degree);

        let mut out = Vec::new();
        out.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
        writeln!(out, "element vertex {}", num_points)
            .map_err(|e| Error::CodecInternal(e.to_string()))?;
        out.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
        out.extend_from_slice(
            b"property float scale_0\nproperty float scale_1\nproperty float scale_2\n",
        );
        out.extend_from_slice(
            b"property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n",
        );
        out.extend_from_slice(b"property float opacity\n");
        out.extend_from_slice(
            b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n",
        );
        for i in 0..sh_dim * 3 {
            writeln!(out, "property float f_rest_{}", i)
                .map_err(|e| Error::CodecInternal(e.to_string()))?;
        }
        out.extend_from_slice(b"end_header\n");

        let row_floats = 14 + sh_dim * 3;
        out.reserve(num_points * row_floats * 4);

        let mut sh_row = Vec::with_capacity(sh_dim * 3);
        for i in 0..num_points {
            out.extend_from_slice(bytemuck::cast_slice(&ir.positions[i * 3..i * 3 + 3]));
            out.extend_from_slice(bytemuck::cast_slice(&ir.scales[i * 3..i * 3 + 3]));
            out.extend_from_slice(bytemuck::cast_slice(&ir.rotations[i * 4..i * 4 + 4]));
            out.extend_from_slice(bytemuck::bytes_of(&ir.alphas[i]));
            out.extend_from_slice(bytemuck::cast_slice(&ir.colors[i * 3..i * 3 + 3]));

            // Coefficient-first IR back to the channel-first f_rest block.
            sh_row.clear();
            for channel in 0..3 {
                for j in 0..sh_dim {
                    sh_row.push(ir.sh[(i * sh_dim + j) * 3 + channel]);
                }
            }
            out.extend_from_slice(bytemuck::cast_slice(&sh_row));
        }

        Ok(out)
    }
}

pub(crate) fn check_shapes(ir: &GaussianCloud, n: usize) -> Result<()> {
    if ir.positions.len() != n * 3
        || ir.scales.len() != n * 3
        || ir.rotations.len() != n * 4
        || ir.alphas.len() != n
        || ir.colors.len() != n * 3
    {
        return Err(Error::InconsistentCounts(
            "array lengths disagree with num_points".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_ply(num_points: usize, sh_dim: usize, rows: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
        writeln!(out, "element vertex {}", num_points).unwrap();
        for name in MANDATORY_FIELDS {
            writeln!(out, "property float {}", name).unwrap();
        }
        for i in 0..sh_dim * 3 {
            writeln!(out, "property float f_rest_{}", i).unwrap();
        }
        out.extend_from_slice(b"end_header\n");
        for &v in rows {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub(crate) fn sample_cloud(n: usize, sh_degree: i32) -> GaussianCloud {
        let mut ir = GaussianCloud::zeroed(n, sh_degree);
        let sh_dim = crate::common::dim_for_degree(sh_degree);
        for i in 0..n {
            let f = i as f32;
            ir.positions[i * 3..i * 3 + 3].copy_from_slice(&[f, f * 0.5, -f]);
            ir.scales[i * 3..i * 3 + 3].copy_from_slice(&[-1.0, -2.0, -3.0]);
            let q = crate::common::normalize_quat([1.0, 0.1 * f, 0.0, -0.2]);
            ir.rotations[i * 4..i * 4 + 4].copy_from_slice(&q);
            ir.alphas[i] = 0.5 - f * 0.01;
            ir.colors[i * 3..i * 3 + 3].copy_from_slice(&[0.3, -0.1, 0.2 + f * 0.001]);
            for j in 0..sh_dim {
                for ch in 0..3 {
                    ir.sh[(i * sh_dim + j) * 3 + ch] = ((i + j + ch) % 7) as f32 * 0.1 - 0.3;
                }
            }
        }
        ir
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            PlyReader.read(b"", &ReadOptions::default()),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = PlyReader
            .read(b"obj\nsomething\n", &ReadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::BadMagic(_)));
    }

    #[test]
    fn big_endian_format_is_rejected() {
        let err = PlyReader
            .read(
                b"ply\nformat binary_big_endian 1.0\nelement vertex 0\nend_header\n",
                &ReadOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn non_float_property_is_rejected() {
        let err = PlyReader
            .read(
                b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty uint x\nend_header\n",
                &ReadOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn zero_vertices_read_as_empty_cloud() {
        let data = build_ply(0, 0, &[]);
        let ir = PlyReader.read(&data, &ReadOptions { strict: true }).unwrap();
        assert_eq!(ir.num_points, 0);
        assert!(ir.positions.is_empty());
        assert!(ir.sh.is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut data = build_ply(1, 0, &[0.0; 14]);
        data.truncate(data.len() - 4);
        assert!(matches!(
            PlyReader.read(&data, &ReadOptions::default()),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ply\ncomment made somewhere\nformat binary_little_endian 1.0\n");
        data.extend_from_slice(b"element vertex 1\n");
        for name in MANDATORY_FIELDS {
            writeln!(data, "  property float {}", name).unwrap();
        }
        data.extend_from_slice(b"end_header\n");
        for v in [1.0f32, 2.0, 3.0, 0.1, 0.2, 0.3, 1.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let ir = PlyReader.read(&data, &ReadOptions { strict: true }).unwrap();
        assert_eq!(ir.num_points, 1);
        assert_eq!(ir.positions, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn unknown_float_properties_land_in_extras() {
        let mut data = Vec::new();
        data.extend_from_slice(b"ply\nformat binary_little_endian 1.0\nelement vertex 2\n");
        data.extend_from_slice(b"property float nx\n");
        for name in MANDATORY_FIELDS {
            writeln!(data, "property float {}", name).unwrap();
        }
        data.extend_from_slice(b"end_header\n");
        for p in 0..2 {
            let mut row = vec![7.5 + p as f32];
            row.extend_from_slice(&[0.0; 14]);
            row[7] = 1.0; // rot_0 = w
            for v in row {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        let ir = PlyReader.read(&data, &ReadOptions { strict: true }).unwrap();
        assert_eq!(ir.extras.get("nx"), Some(&vec![7.5, 8.5]));
    }

    #[test]
    fn sh_transpose_interleaves_channels() {
        // One vertex, degree 1: f_rest_0..2 = R, 3..5 = G, 6..8 = B.
        let mut rows = vec![0.0f32; 14];
        rows[6] = 1.0; // rot_0
        let sh_disk: Vec<f32> = (0..9).map(|i| i as f32).collect();
        rows.extend_from_slice(&sh_disk);
        let data = build_ply(1, 3, &rows);
        let ir = PlyReader.read(&data, &ReadOptions { strict: true }).unwrap();
        assert_eq!(ir.meta.sh_degree, 1);
        assert_eq!(
            ir.sh,
            vec![0.0, 3.0, 6.0, 1.0, 4.0, 7.0, 2.0, 5.0, 8.0]
        );
    }

    #[test]
    fn writer_reader_roundtrip_is_identity() {
        let ir = sample_cloud(9, 2);
        let bytes = PlyWriter.write(&ir, &WriteOptions { strict: true }).unwrap();
        let back = PlyReader.read(&bytes, &ReadOptions { strict: true }).unwrap();
        assert_eq!(back.num_points, ir.num_points);
        assert_eq!(back.positions, ir.positions);
        assert_eq!(back.scales, ir.scales);
        assert_eq!(back.rotations, ir.rotations);
        assert_eq!(back.alphas, ir.alphas);
        assert_eq!(back.colors, ir.colors);
        assert_eq!(back.sh, ir.sh);
        assert_eq!(back.meta.sh_degree, 2);
    }

    #[test]
    fn writer_rejects_empty_cloud() {
        let ir = GaussianCloud::default();
        assert!(matches!(
            PlyWriter.write(&ir, &WriteOptions::default()),
            Err(Error::CodecInternal(_))
        ));
    }
}
