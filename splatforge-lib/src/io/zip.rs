//! Minimal ZIP container support for the SOG codec: classical
//! central-directory parsing on the read side, stored (method 0) entries
//! on the write side.

use std::io::Read;

use crate::byteio::{read_u16_le, read_u32_le};
use crate::error::{Error, Result};

const LOCAL_FILE_HEADER_SIG: u32 = 0x04034b50;
const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054b50;

const EOCD_SIZE: usize = 22;
const CENTRAL_HEADER_SIZE: usize = 46;
const LOCAL_HEADER_SIZE: usize = 30;

#[derive(Debug)]
struct ZipEntry {
    name: String,
    compression: u16,
    compressed_size: u32,
    uncompressed_size: u32,
    local_header_offset: u32,
}

/// Read-only view over a ZIP archive held in memory.
pub(crate) struct ZipReader<'a> {
    data: &'a [u8],
    entries: Vec<ZipEntry>,
    /// Correction applied to stored offsets when the archive does not
    /// start at byte 0 of the buffer (e.g. prepended garbage).
    base_offset: usize,
}

impl<'a> ZipReader<'a> {
    pub fn open(data: &'a [u8]) -> Result<ZipReader<'a>> {
        if data.len() < EOCD_SIZE {
            return Err(Error::CodecInternal("zip archive too small".to_string()));
        }

        // Scan backwards from the tail for the end-of-central-directory
        // signature; a trailing comment may sit after it.
        let mut eocd_pos = data.len() - EOCD_SIZE;
        let eocd_pos = loop {
            if read_u32_le(data, eocd_pos)? == END_OF_CENTRAL_DIR_SIG {
                break eocd_pos;
            }
            if eocd_pos == 0 {
                return Err(Error::CodecInternal(
                    "zip end-of-central-directory record not found".to_string(),
                ));
            }
            eocd_pos -= 1;
        };

        let num_entries = read_u16_le(data, eocd_pos + 10)? as usize;
        let cd_size = read_u32_le(data, eocd_pos + 12)? as usize;
        let cd_offset = read_u32_le(data, eocd_pos + 16)? as usize;

        // The directory sits immediately before the EOCD record; the delta
        // against the stated offset shifts every local-header offset too.
        let cd_start = eocd_pos
            .checked_sub(cd_size)
            .ok_or_else(|| Error::CodecInternal("zip central directory size exceeds archive".to_string()))?;
        let base_offset = cd_start
            .checked_sub(cd_offset)
            .ok_or_else(|| Error::CodecInternal("zip central directory offset inconsistent".to_string()))?;

        let mut entries = Vec::with_capacity(num_entries);
        let mut pos = cd_start;
        for _ in 0..num_entries {
            if pos + CENTRAL_HEADER_SIZE > eocd_pos {
                break;
            }
            if read_u32_le(data, pos)? != CENTRAL_DIR_HEADER_SIG {
                break;
            }
            let compression = read_u16_le(data, pos + 10)?;
            let compressed_size = read_u32_le(data, pos + 20)?;
            let uncompressed_size = read_u32_le(data, pos + 24)?;
            let name_len = read_u16_le(data, pos + 28)? as usize;
            let extra_len = read_u16_le(data, pos + 30)? as usize;
            let comment_len = read_u16_le(data, pos + 32)? as usize;
            let local_header_offset = read_u32_le(data, pos + 42)?;

            let name_bytes =
                crate::byteio::read_bytes(data, pos + CENTRAL_HEADER_SIZE, name_len)?;
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            entries.push(ZipEntry {
                name,
                compression,
                compressed_size,
                uncompressed_size,
                local_header_offset,
            });

            pos += CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
        }

        if entries.is_empty() {
            return Err(Error::CodecInternal("zip archive has no entries".to_string()));
        }

        Ok(ZipReader {
            data,
            entries,
            base_offset,
        })
    }

    pub fn extract(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::CodecInternal(format!("zip entry not found: {}", name)))?;

        let pos = self.base_offset + entry.local_header_offset as usize;
        if read_u32_le(self.data, pos)? != LOCAL_FILE_HEADER_SIG {
            return Err(Error::CodecInternal(format!(
                "zip local header missing for {}",
                name
            )));
        }
        let name_len = read_u16_le(self.data, pos + 26)? as usize;
        let extra_len = read_u16_le(self.data, pos + 28)? as usize;
        let data_offset = pos + LOCAL_HEADER_SIZE + name_len + extra_len;
        let compressed = crate::byteio::read_bytes(
            self.data,
            data_offset,
            entry.compressed_size as usize,
        )?;

        match entry.compression {
            0 => Ok(compressed.to_vec()),
            8 => {
                let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
                flate2::read::DeflateDecoder::new(compressed)
                    .read_to_end(&mut out)
                    .map_err(|e| {
                        Error::CodecInternal(format!("zip inflate failed for {}: {}", name, e))
                    })?;
                Ok(out)
            }
            other => Err(Error::CodecInternal(format!(
                "zip compression method {} not supported",
                other
            ))),
        }
    }
}

/// Builds an archive of stored entries, the layout SOG viewers expect.
#[derive(Default)]
pub(crate) struct ZipWriter {
    buffer: Vec<u8>,
    entries: Vec<(String, u32, u32, u32)>, // name, offset, size, crc
}

impl ZipWriter {
    pub fn new() -> ZipWriter {
        ZipWriter::default()
    }

    pub fn add_file(&mut self, name: &str, data: &[u8]) {
        let offset = self.buffer.len() as u32;
        let size = data.len() as u32;
        let mut crc = flate2::Crc::new();
        crc.update(data);
        let crc = crc.sum();

        self.buffer.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        self.buffer.extend_from_slice(&20u16.to_le_bytes()); // version needed
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // flags
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // mod time
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // mod date
        self.buffer.extend_from_slice(&crc.to_le_bytes());
        self.buffer.extend_from_slice(&size.to_le_bytes());
        self.buffer.extend_from_slice(&size.to_le_bytes());
        self.buffer.extend_from_slice(&(name.len() as u16).to_le_bytes());
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // extra length
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(data);

        self.entries.push((name.to_string(), offset, size, crc));
    }

    pub fn finalize(mut self) -> Vec<u8> {
        let cd_offset = self.buffer.len() as u32;
        for (name, offset, size, crc) in &self.entries {
            self.buffer.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
            self.buffer.extend_from_slice(&20u16.to_le_bytes()); // version made by
            self.buffer.extend_from_slice(&20u16.to_le_bytes()); // version needed
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // flags
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // method
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // mod time
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // mod date
            self.buffer.extend_from_slice(&crc.to_le_bytes());
            self.buffer.extend_from_slice(&size.to_le_bytes());
            self.buffer.extend_from_slice(&size.to_le_bytes());
            self.buffer.extend_from_slice(&(name.len() as u16).to_le_bytes());
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // extra
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // comment
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // disk start
            self.buffer.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            self.buffer.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            self.buffer.extend_from_slice(&offset.to_le_bytes());
            self.buffer.extend_from_slice(name.as_bytes());
        }
        let cd_size = self.buffer.len() as u32 - cd_offset;
        let count = self.entries.len() as u16;

        self.buffer.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // disk number
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // cd disk
        self.buffer.extend_from_slice(&count.to_le_bytes());
        self.buffer.extend_from_slice(&count.to_le_bytes());
        self.buffer.extend_from_slice(&cd_size.to_le_bytes());
        self.buffer.extend_from_slice(&cd_offset.to_le_bytes());
        self.buffer.extend_from_slice(&0u16.to_le_bytes()); // comment length

        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stored_entries_roundtrip() {
        let mut writer = ZipWriter::new();
        writer.add_file("meta.json", b"{\"version\": 2}");
        writer.add_file("plane.bin", &[1, 2, 3, 4, 5]);
        let archive = writer.finalize();

        let reader = ZipReader::open(&archive).unwrap();
        assert_eq!(reader.extract("meta.json").unwrap(), b"{\"version\": 2}");
        assert_eq!(reader.extract("plane.bin").unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(reader.extract("missing").is_err());
    }

    #[test]
    fn prepended_garbage_is_tolerated() {
        let mut writer = ZipWriter::new();
        writer.add_file("a.txt", b"payload");
        let archive = writer.finalize();

        let mut shifted = vec![0u8; 42];
        shifted.extend_from_slice(&archive);
        let reader = ZipReader::open(&shifted).unwrap();
        assert_eq!(reader.extract("a.txt").unwrap(), b"payload");
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(ZipReader::open(&[]).is_err());
        assert!(ZipReader::open(&[0u8; 10]).is_err());
    }

    #[test]
    fn deflated_entries_inflate() {
        // Hand-build an archive holding one method-8 entry.
        let raw = b"hello hello hello hello";
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(raw).unwrap();
        let deflated = encoder.finish().unwrap();

        let mut crc = flate2::Crc::new();
        crc.update(raw);
        let crc = crc.sum();
        let name = b"d.txt";

        let mut archive = Vec::new();
        archive.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        archive.extend_from_slice(&20u16.to_le_bytes());
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive.extend_from_slice(&8u16.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes()); // time+date
        archive.extend_from_slice(&crc.to_le_bytes());
        archive.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(name.len() as u16).to_le_bytes());
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive.extend_from_slice(name);
        archive.extend_from_slice(&deflated);

        let cd_offset = archive.len() as u32;
        archive.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        archive.extend_from_slice(&20u16.to_le_bytes());
        archive.extend_from_slice(&20u16.to_le_bytes());
        archive.extend_from_slice(&0u16.to_le_bytes());
        archive.extend_from_slice(&8u16.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes()); // time+date
        archive.extend_from_slice(&crc.to_le_bytes());
        archive.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(name.len() as u16).to_le_bytes());
        archive.extend_from_slice(&[0u8; 12]); // extra/comment/disk/attrs
        archive.extend_from_slice(&0u32.to_le_bytes()); // local offset
        archive.extend_from_slice(name);
        let cd_size = archive.len() as u32 - cd_offset;

        archive.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        archive.extend_from_slice(&[0u8; 4]);
        archive.extend_from_slice(&1u16.to_le_bytes());
        archive.extend_from_slice(&1u16.to_le_bytes());
        archive.extend_from_slice(&cd_size.to_le_bytes());
        archive.extend_from_slice(&cd_offset.to_le_bytes());
        archive.extend_from_slice(&0u16.to_le_bytes());

        let reader = ZipReader::open(&archive).unwrap();
        assert_eq!(reader.extract("d.txt").unwrap(), raw);
    }
}
