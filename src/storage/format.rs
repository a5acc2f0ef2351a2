use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use crc32fast::Hasher;
use crate::core::error::{Error, Result};

pub const HEADER_SIZE: usize = 16;

/// Current on-disk format version shared by all checkpoint files.
pub const FORMAT_VERSION: u32 = 1;

pub const POSTINGS_MAGIC: [u8; 4] = *b"PDXP";
pub const DOCUMENTS_MAGIC: [u8; 4] = *b"PDXD";
pub const MANIFEST_MAGIC: [u8; 4] = *b"PDXM";

/// File header
/// [ magic (4) | format_version (4) | payload_len (4) | crc32 (4) ] all little endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub payload_len: u32,
    pub checksum: u32,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::corruption(format!("file shorter than its {} byte header", HEADER_SIZE)));
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(FileHeader {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            format_version: word(4),
            payload_len: word(8),
            checksum: word(12),
        })
    }
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Frames `payload` (LZ4 compressed) behind a checksummed header.
pub fn encode_file(magic: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::compress_prepend_size(payload);
    let header = FileHeader {
        magic,
        format_version: FORMAT_VERSION,
        payload_len: compressed.len() as u32,
        checksum: checksum(&compressed),
    };
    let mut out = Vec::with_capacity(HEADER_SIZE + compressed.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&compressed);
    out
}

/// Validates magic, version, length and checksum, then returns the raw payload.
pub fn decode_file(magic: [u8; 4], bytes: &[u8]) -> Result<Vec<u8>> {
    let header = FileHeader::parse(bytes)?;
    if header.magic != magic {
        return Err(Error::corruption(format!(
            "bad magic {:?}, expected {:?}",
            String::from_utf8_lossy(&header.magic),
            String::from_utf8_lossy(&magic),
        )));
    }
    let body = &bytes[HEADER_SIZE..];
    if body.len() != header.payload_len as usize {
        return Err(Error::corruption(format!(
            "payload is {} bytes, header says {}", body.len(), header.payload_len
        )));
    }
    if checksum(body) != header.checksum {
        return Err(Error::corruption("checksum mismatch".to_string()));
    }
    let body = migrate(header.format_version, body)?;
    lz4_flex::decompress_size_prepended(&body)
        .map_err(|e| Error::corruption(format!("decompression failed: {}", e)))
}

/// Brings a payload written by an older format version up to the current one.
fn migrate(version: u32, body: &[u8]) -> Result<Vec<u8>> {
    match version {
        FORMAT_VERSION => Ok(body.to_vec()),
        v if v > FORMAT_VERSION => Err(Error::corruption(format!(
            "format version {} is newer than supported version {}", v, FORMAT_VERSION
        ))),
        v => Err(Error::corruption(format!("no migration from format version {}", v))),
    }
}

/// Writes through a temporary file and renames it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent(path)
}

pub fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn sync_parent(path: &Path) -> Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
