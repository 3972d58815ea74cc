//! Auto-detecting PLY reader: sniffs the header without touching the
//! payload, then dispatches to the compressed or the standard codec.

use crate::io::ply::{next_header_line, PlyReader};
use crate::io::ply_compressed::{
    parse_elements, PlyCompressedReader, CHUNK_PROPERTIES, CHUNK_SIZE, VERTEX_PROPERTIES,
};
use crate::io::{GaussReader, ReadOptions};
use crate::error::Result;
use crate::structures::GaussianCloud;

/// True iff the header matches the full compressed-PLY shape: the right
/// magic and format, two or three elements, the exact chunk and vertex
/// property sets (order-insensitive), a consistent chunk count, and - when
/// present - a well-formed uchar `sh` element.
pub(crate) fn is_compressed_ply(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    let mut offset = 0;
    if next_header_line(data, &mut offset) != Some("ply") {
        return false;
    }
    if next_header_line(data, &mut offset) != Some("format binary_little_endian 1.0") {
        return false;
    }

    let elements = match parse_elements(data, &mut offset) {
        Ok(e) => e,
        Err(_) => return false,
    };
    if elements.len() != 2 && elements.len() != 3 {
        return false;
    }

    let chunk = match elements.iter().find(|e| e.name == "chunk") {
        Some(e) => e,
        None => return false,
    };
    if chunk.properties.len() != CHUNK_PROPERTIES.len() {
        return false;
    }
    for name in CHUNK_PROPERTIES {
        if !chunk
            .properties
            .iter()
            .any(|(t, n)| t == "float" && n == name)
        {
            return false;
        }
    }

    let vertex = match elements.iter().find(|e| e.name == "vertex") {
        Some(e) => e,
        None => return false,
    };
    if vertex.properties.len() != VERTEX_PROPERTIES.len() {
        return false;
    }
    for name in VERTEX_PROPERTIES {
        if !vertex.properties.iter().any(|(t, n)| t == "uint" && n == name) {
            return false;
        }
    }

    if chunk.count != vertex.count.div_ceil(CHUNK_SIZE) {
        return false;
    }

    if elements.len() == 3 {
        let sh = match elements.iter().find(|e| e.name == "sh") {
            Some(e) => e,
            None => return false,
        };
        if sh.count != vertex.count {
            return false;
        }
        if !matches!(sh.properties.len(), 9 | 24 | 45) {
            return false;
        }
        let mut seen = vec![false; sh.properties.len()];
        for (ty, name) in &sh.properties {
            if ty != "uchar" {
                return false;
            }
            let idx = match name
                .strip_prefix("f_rest_")
                .and_then(|s| s.parse::<usize>().ok())
            {
                Some(i) if i < seen.len() => i,
                _ => return false,
            };
            if seen[idx] {
                return false;
            }
            seen[idx] = true;
        }
    }

    true
}

/// Reader registered under the bare `ply` extension.
pub struct PlyAutoReader;

impl GaussReader for PlyAutoReader {
    fn read(&self, data: &[u8], options: &ReadOptions) -> Result<GaussianCloud> {
        if is_compressed_ply(data) {
            tracing::debug!(target: "splatforge::ply", "header sniff: compressed layout");
            PlyCompressedReader.read(data, options)
        } else {
            tracing::debug!(target: "splatforge::ply", "header sniff: standard layout");
            PlyReader.read(data, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ply::tests::{build_ply, sample_cloud};
    use crate::io::ply::PlyWriter;
    use crate::io::ply_compressed::PlyCompressedWriter;
    use crate::io::{GaussWriter, WriteOptions};

    #[test]
    fn standard_single_element_ply_falls_through() {
        let data = build_ply(1, 0, &{
            let mut row = [0.0f32; 14];
            row[6] = 1.0;
            row
        });
        assert!(!is_compressed_ply(&data));
        let ir = PlyAutoReader.read(&data, &ReadOptions { strict: true }).unwrap();
        assert_eq!(ir.meta.source_format, "ply");
    }

    #[test]
    fn compressed_output_is_sniffed_as_compressed() {
        let ir = sample_cloud(10, 1);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        assert!(is_compressed_ply(&bytes));
        let back = PlyAutoReader
            .read(&bytes, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(back.meta.source_format, "compressed.ply");
        assert_eq!(back.num_points, 10);
    }

    #[test]
    fn oracle_matches_direct_codecs() {
        let ir = sample_cloud(20, 0);

        let std_bytes = PlyWriter.write(&ir, &WriteOptions::default()).unwrap();
        let via_auto = PlyAutoReader
            .read(&std_bytes, &ReadOptions { strict: true })
            .unwrap();
        let via_std = crate::io::ply::PlyReader
            .read(&std_bytes, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(via_auto.positions, via_std.positions);

        let comp_bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let via_auto = PlyAutoReader
            .read(&comp_bytes, &ReadOptions { strict: true })
            .unwrap();
        let via_comp = PlyCompressedReader
            .read(&comp_bytes, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(via_auto.positions, via_comp.positions);
    }

    #[test]
    fn wrong_chunk_count_fails_the_sniff() {
        let ir = sample_cloud(10, 0);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let needle = b"element chunk 1";
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        let mut corrupted = bytes.clone();
        corrupted[at + needle.len() - 1] = b'3';
        assert!(!is_compressed_ply(&corrupted));
    }

    #[test]
    fn duplicate_sh_property_fails_the_sniff() {
        let ir = sample_cloud(5, 1);
        let bytes = PlyCompressedWriter
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let needle = b"property uchar f_rest_1\n";
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        let mut corrupted = bytes.clone();
        // Turn f_rest_1 into a second f_rest_0.
        corrupted[at + needle.len() - 2] = b'0';
        assert!(!is_compressed_ply(&corrupted));
    }
}
