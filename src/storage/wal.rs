use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use log::warn;
use serde::{Deserialize, Serialize};
use crate::analysis::analyzer::AnalyzedDocument;
use crate::core::types::DocId;
use crate::storage::layout::StorageLayout;
use crate::core::error::{Result, Error, ErrorKind};

/// Frame header: payload length + CRC32 of the payload.
const FRAME_HEADER: usize = 8;
const MAX_ENTRY_SIZE: usize = 256 * 1024 * 1024;

/// Write-ahead log for durability
pub struct WAL {
    pub file: File,
    pub path: PathBuf,
    pub position: u64,
    pub sync_mode: SyncMode,
    pub sequence: u64,           // Sequence number of the next entry
    unsynced_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Immediate,  // fsync after every write
    Batch,      // fsync every megabyte
    None,       // Let OS handle it
}

const BATCH_SYNC_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WALEntry {
    pub sequence: u64,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    IndexDocument {
        source_id: String,
        doc_id: DocId,
        version: u32,
        document: AnalyzedDocument,
    },
    RemoveDocument {
        source_id: String,
        doc_id: DocId,
    },
}

/// Result of scanning one log file.
#[derive(Debug, Default)]
pub struct WalScan {
    pub entries: Vec<WALEntry>,
    pub valid_len: u64,     // Bytes up to the end of the last intact entry
    pub torn_tail: bool,
}

impl WAL {
    /// Opens (or creates) the log file whose first entry has `sequence`.
    pub fn open(storage: &StorageLayout, sequence: u64, sync_mode: SyncMode) -> Result<Self> {
        let path = storage.wal_path(sequence);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let position = file.metadata()?.len();

        Ok(WAL {
            file,
            path,
            position,
            sync_mode,
            sequence,
            unsynced_bytes: 0,
        })
    }

    /// Appends one entry and returns its sequence number. A failed write is
    /// cut back off the file so the log never keeps a partial frame.
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let entry = WALEntry {
            sequence: self.sequence,
            operation,
            timestamp: Utc::now(),
        };

        let data = bincode::serialize(&entry)?;
        if data.len() > MAX_ENTRY_SIZE {
            return Err(Error::new(ErrorKind::InvalidArgument, format!("WAL entry of {} bytes is too large", data.len())));
        }
        let mut hasher = Hasher::new();
        hasher.update(&data);

        let mut frame = Vec::with_capacity(FRAME_HEADER + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&hasher.finalize().to_le_bytes());
        frame.extend_from_slice(&data);

        let start = self.position;
        if let Err(e) = self.write_frame(&frame) {
            self.truncate_to(start)?;
            return Err(e);
        }

        let sequence = self.sequence;
        self.sequence += 1;
        Ok(sequence)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.position += frame.len() as u64;
        self.unsynced_bytes += frame.len() as u64;

        match self.sync_mode {
            SyncMode::Immediate => self.sync()?,
            SyncMode::Batch if self.unsynced_bytes >= BATCH_SYNC_BYTES => self.sync()?,
            _ => {}
        }
        Ok(())
    }

    /// Drops everything after `position`; used to undo the most recent entry.
    pub fn truncate_to(&mut self, position: u64) -> Result<()> {
        self.file.set_len(position)?;
        self.file.sync_all()?;
        self.position = position;
        Ok(())
    }

    /// Removes the most recent entry, which must start at `start`.
    pub fn undo_last(&mut self, start: u64) -> Result<()> {
        self.truncate_to(start)?;
        self.sequence -= 1;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.unsynced_bytes = 0;
        Ok(())
    }

    /// Continues logging in a fresh file named after the next sequence.
    pub fn rotate(&mut self, storage: &StorageLayout) -> Result<()> {
        self.sync()?;
        let new_wal = WAL::open(storage, self.sequence, self.sync_mode)?;
        *self = new_wal;
        Ok(())
    }

    /// Reads every intact entry of a log file. A damaged final frame is a torn
    /// write and is reported, not treated as corruption; damage followed by
    /// more data is corruption.
    pub fn scan(path: &Path) -> Result<WalScan> {
        let data = fs::read(path)?;
        let mut scan = WalScan::default();
        let mut pos = 0usize;

        while pos < data.len() {
            let remaining = data.len() - pos;
            if remaining < FRAME_HEADER {
                scan.torn_tail = true;
                break;
            }
            let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
            let crc = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
            let end = pos + FRAME_HEADER + len;

            if len > MAX_ENTRY_SIZE {
                return Err(Error::corruption(format!("{}: entry length {} at byte {}", path.display(), len, pos)));
            }
            if end > data.len() {
                scan.torn_tail = true;
                break;
            }

            let payload = &data[pos + FRAME_HEADER..end];
            let mut hasher = Hasher::new();
            hasher.update(payload);
            if hasher.finalize() != crc {
                if end == data.len() {
                    scan.torn_tail = true;
                    break;
                }
                return Err(Error::corruption(format!("{}: checksum mismatch at byte {}", path.display(), pos)));
            }

            let entry: WALEntry = bincode::deserialize(payload)
                .map_err(|e| Error::corruption(format!("{}: undecodable entry at byte {}: {}", path.display(), pos, e)))?;
            scan.entries.push(entry);
            pos = end;
            scan.valid_len = pos as u64;
        }

        if scan.torn_tail {
            warn!("{}: discarding torn entry after byte {}", path.display(), scan.valid_len);
        }
        Ok(scan)
    }

    /// Find all WAL files for recovery, as (first sequence, path) ascending.
    pub fn find_wal_files(storage: &StorageLayout) -> Result<Vec<(u64, PathBuf)>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(storage.wal_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("log") {
                continue;
            }
            // Format: wal_00000000.log
            let sequence = path.file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix("wal_"))
                .and_then(|seq| seq.parse::<u64>().ok());
            if let Some(sequence) = sequence {
                files.push((sequence, path));
            }
        }

        files.sort_by_key(|(sequence, _)| *sequence);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn remove(source: &str, doc: u64) -> Operation {
        Operation::RemoveDocument { source_id: source.to_string(), doc_id: DocId(doc) }
    }

    fn layout() -> (TempDir, StorageLayout) {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        (dir, layout)
    }

    #[test]
    fn entries_are_read_back_in_order() {
        let (_dir, layout) = layout();
        let mut wal = WAL::open(&layout, 0, SyncMode::Immediate).unwrap();
        let document = AnalyzedDocument { terms: BTreeMap::new(), length: 0, paths: Vec::new() };
        wal.append(Operation::IndexDocument {
            source_id: "a".to_string(),
            doc_id: DocId(0),
            version: 1,
            document,
        }).unwrap();
        assert_eq!(wal.append(remove("a", 0)).unwrap(), 1);

        let scan = WAL::scan(&wal.path).unwrap();
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.entries[1].operation, remove("a", 0));
        assert!(!scan.torn_tail);
    }

    #[test]
    fn torn_tail_is_dropped_but_inner_damage_is_corruption() {
        let (_dir, layout) = layout();
        let mut wal = WAL::open(&layout, 0, SyncMode::None).unwrap();
        wal.append(remove("a", 0)).unwrap();
        wal.append(remove("b", 1)).unwrap();
        wal.sync().unwrap();

        let mut bytes = fs::read(&wal.path).unwrap();
        let full = bytes.len();
        bytes.truncate(full - 3);
        fs::write(&wal.path, &bytes).unwrap();
        let scan = WAL::scan(&wal.path).unwrap();
        assert!(scan.torn_tail);
        assert_eq!(scan.entries.len(), 1);

        let mut bytes = fs::read(&wal.path).unwrap();
        bytes[FRAME_HEADER] ^= 0xff;
        fs::write(&wal.path, &bytes).unwrap();
        assert_eq!(WAL::scan(&wal.path).unwrap_err().kind(), ErrorKind::Corruption);
    }

    #[test]
    fn undo_last_removes_the_entry() {
        let (_dir, layout) = layout();
        let mut wal = WAL::open(&layout, 5, SyncMode::Immediate).unwrap();
        wal.append(remove("a", 0)).unwrap();
        let start = wal.position;
        wal.append(remove("b", 1)).unwrap();
        wal.undo_last(start).unwrap();

        assert_eq!(wal.sequence, 6);
        let scan = WAL::scan(&wal.path).unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.entries[0].sequence, 5);
        assert_eq!(WAL::find_wal_files(&layout).unwrap()[0].0, 5);
    }
}
