//! Extension-keyed lookup of readers and writers.

use foldhash::{HashMap, HashMapExt};

use crate::io::ksplat::{KsplatReader, KsplatWriter};
use crate::io::ply::PlyWriter;
use crate::io::ply_auto::PlyAutoReader;
use crate::io::ply_compressed::{PlyCompressedReader, PlyCompressedWriter};
use crate::io::sog::{SogReader, SogWriter};
use crate::io::splat::{SplatReader, SplatWriter};
use crate::io::spz::{SpzReader, SpzWriter};
use crate::io::{GaussReader, GaussWriter};

fn normalize_ext(ext: &str) -> &str {
    ext.strip_prefix('.').unwrap_or(ext)
}

/// Maps normalized extensions to codecs. The registry owns the codec
/// objects; aliases are indices into the store, so several extensions can
/// share one instance. Construction installs the six built-in formats.
///
/// Extensions are case-sensitive and may span several dot segments:
/// `compressed.ply` and `ply` are distinct keys.
pub struct IoRegistry {
    reader_store: Vec<Box<dyn GaussReader>>,
    writer_store: Vec<Box<dyn GaussWriter>>,
    readers: HashMap<String, usize>,
    writers: HashMap<String, usize>,
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegistry {
    pub fn new() -> IoRegistry {
        let mut registry = IoRegistry {
            reader_store: Vec::new(),
            writer_store: Vec::new(),
            readers: HashMap::new(),
            writers: HashMap::new(),
        };

        registry.register_reader(&["spz"], Box::new(SpzReader));
        registry.register_writer(&["spz"], Box::new(SpzWriter));
        // The bare `ply` extension reads through the sniffing reader but
        // writes the standard layout.
        registry.register_reader(&["ply"], Box::new(PlyAutoReader));
        registry.register_writer(&["ply"], Box::new(PlyWriter));
        registry.register_reader(&["compressed.ply"], Box::new(PlyCompressedReader));
        registry.register_writer(&["compressed.ply"], Box::new(PlyCompressedWriter));
        registry.register_reader(&["splat"], Box::new(SplatReader));
        registry.register_writer(&["splat"], Box::new(SplatWriter));
        registry.register_reader(&["ksplat"], Box::new(KsplatReader));
        registry.register_writer(&["ksplat"], Box::new(KsplatWriter));
        registry.register_reader(&["sog"], Box::new(SogReader));
        registry.register_writer(&["sog"], Box::new(SogWriter));

        registry
    }

    pub fn register_reader(&mut self, exts: &[&str], reader: Box<dyn GaussReader>) {
        self.reader_store.push(reader);
        let index = self.reader_store.len() - 1;
        for ext in exts {
            self.readers.insert(normalize_ext(ext).to_string(), index);
        }
    }

    pub fn register_writer(&mut self, exts: &[&str], writer: Box<dyn GaussWriter>) {
        self.writer_store.push(writer);
        let index = self.writer_store.len() - 1;
        for ext in exts {
            self.writers.insert(normalize_ext(ext).to_string(), index);
        }
    }

    pub fn reader_for(&self, ext: &str) -> Option<&dyn GaussReader> {
        self.readers
            .get(normalize_ext(ext))
            .map(|&i| self.reader_store[i].as_ref())
    }

    pub fn writer_for(&self, ext: &str) -> Option<&dyn GaussWriter> {
        self.writers
            .get(normalize_ext(ext))
            .map(|&i| self.writer_store[i].as_ref())
    }

    /// Extensions with a registered reader, sorted.
    pub fn reader_exts(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.readers.keys().map(|s| s.as_str()).collect();
        exts.sort_unstable();
        exts
    }

    /// Extensions with a registered writer, sorted.
    pub fn writer_exts(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.writers.keys().map(|s| s.as_str()).collect();
        exts.sort_unstable();
        exts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ReadOptions, WriteOptions};

    #[test]
    fn builtin_extensions_resolve() {
        let registry = IoRegistry::new();
        for ext in ["ply", "compressed.ply", "splat", "ksplat", "spz", "sog"] {
            assert!(registry.reader_for(ext).is_some(), "reader for {}", ext);
            assert!(registry.writer_for(ext).is_some(), "writer for {}", ext);
        }
        assert!(registry.reader_for("gltf").is_none());
        assert!(registry.writer_for("").is_none());
    }

    #[test]
    fn leading_dot_is_stripped() {
        let registry = IoRegistry::new();
        assert!(registry.reader_for(".splat").is_some());
        assert!(registry.writer_for(".compressed.ply").is_some());
    }

    #[test]
    fn compressed_ply_is_not_shadowed_by_ply() {
        let registry = IoRegistry::new();
        // The two keys route to different codecs: write a cloud both ways
        // and check the compressed output is sniffed as such.
        let ir = crate::io::ply::tests::sample_cloud(4, 0);
        let plain = registry
            .writer_for("ply")
            .unwrap()
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let compressed = registry
            .writer_for("compressed.ply")
            .unwrap()
            .write(&ir, &WriteOptions::default())
            .unwrap();
        assert!(!crate::io::ply_auto::is_compressed_ply(&plain));
        assert!(crate::io::ply_auto::is_compressed_ply(&compressed));

        let back = registry
            .reader_for("compressed.ply")
            .unwrap()
            .read(&compressed, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(back.meta.source_format, "compressed.ply");
    }

    #[test]
    fn ply_reader_is_the_auto_detecting_one() {
        let registry = IoRegistry::new();
        let ir = crate::io::ply::tests::sample_cloud(4, 0);
        // A compressed stream handed to the plain `ply` reader must still
        // decode, which only the sniffing reader does.
        let compressed = registry
            .writer_for("compressed.ply")
            .unwrap()
            .write(&ir, &WriteOptions::default())
            .unwrap();
        let back = registry
            .reader_for("ply")
            .unwrap()
            .read(&compressed, &ReadOptions { strict: true })
            .unwrap();
        assert_eq!(back.meta.source_format, "compressed.ply");
    }

    #[test]
    fn custom_registration_aliases_share_one_codec() {
        let mut registry = IoRegistry::new();
        registry.register_reader(&["splat2", ".splat3"], Box::new(crate::io::splat::SplatReader));
        assert!(registry.reader_for("splat2").is_some());
        assert!(registry.reader_for("splat3").is_some());
    }
}
