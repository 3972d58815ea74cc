//! Codecs for Gaussian-splat point cloud formats.
//!
//! Six on-disk formats - standard PLY, compressed PLY, SPLAT, KSPLAT, SPZ
//! and SOG - radiate from one in-memory representation,
//! [`GaussianCloud`]. Readers decode a byte slice into the cloud, writers
//! encode a borrowed cloud into an owned byte vector; nothing here touches
//! the filesystem.
//!
//! ```no_run
//! use splatforge_lib::{IoRegistry, ReadOptions, WriteOptions};
//!
//! # fn demo(input: &[u8]) -> Result<Vec<u8>, splatforge_lib::Error> {
//! let registry = IoRegistry::new();
//! let reader = registry.reader_for("ply").expect("builtin");
//! let writer = registry.writer_for("spz").expect("builtin");
//!
//! let cloud = reader.read(input, &ReadOptions { strict: true })?;
//! let bytes = writer.write(&cloud, &WriteOptions::default())?;
//! # Ok(bytes)
//! # }
//! ```

mod byteio;
mod common;
pub mod error;
pub mod io;
pub mod model_info;
pub mod structures;
pub mod validate;

pub use error::{Error, Result};
pub use io::registry::IoRegistry;
pub use io::{GaussReader, GaussWriter, ReadOptions, WriteOptions};
pub use model_info::{format_bytes, BoundingBox, FloatStats, ModelInfo};
pub use structures::{
    sh_coeffs_per_point, ColorSpace, GaussMetadata, GaussianCloud, Handedness, LengthUnit, UpAxis,
};
pub use validate::validate_basic;

#[cfg(test)]
mod tests {
    use super::*;

    /// Every builtin writer -> reader pair preserves the point count and
    /// SH degree, whatever else it quantizes.
    #[test]
    fn all_builtin_codecs_roundtrip_shape() {
        let registry = IoRegistry::new();
        let ir = io::ply::tests::sample_cloud(17, 1);

        for ext in ["ply", "compressed.ply", "splat", "ksplat", "spz", "sog"] {
            let bytes = registry
                .writer_for(ext)
                .unwrap()
                .write(&ir, &WriteOptions::default())
                .unwrap_or_else(|e| panic!("{} write: {}", ext, e));
            let back = registry
                .reader_for(ext)
                .unwrap()
                .read(&bytes, &ReadOptions { strict: true })
                .unwrap_or_else(|e| panic!("{} read: {}", ext, e));
            assert_eq!(back.num_points, 17, "{}", ext);
            // SPLAT is the one format that cannot carry higher-order SH.
            let expected_degree = if ext == "splat" { 0 } else { 1 };
            assert_eq!(back.meta.sh_degree, expected_degree, "{}", ext);
            validate_basic(&back, true).unwrap();
        }
    }
}
