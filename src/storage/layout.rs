use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;

/// Directory structure for data files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub data_dir: PathBuf,      // Checkpointed posting store, document table, manifest
    pub wal_dir: PathBuf,       // Write-ahead log location
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let data_dir = base_dir.join("data");
        let wal_dir = base_dir.join("wal");

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&wal_dir)?;

        Ok(StorageLayout {
            base_dir,
            data_dir,
            wal_dir,
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join("LOCK")
    }

    pub fn wal_path(&self, sequence: u64) -> PathBuf {
        self.wal_dir.join(format!("wal_{:08}.log", sequence))
    }

    pub fn postings_path(&self, generation: u64) -> PathBuf {
        self.data_dir.join(format!("postings_{:08}.bin", generation))
    }

    pub fn documents_path(&self, generation: u64) -> PathBuf {
        self.data_dir.join(format!("documents_{:08}.bin", generation))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("MANIFEST")
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Generations of checkpoint files present on disk, ascending.
    pub fn list_generations(&self) -> Result<Vec<u64>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".bin") else { continue };
            let number = stem.strip_prefix("postings_").or_else(|| stem.strip_prefix("documents_"));
            if let Some(generation) = number.and_then(|n| n.parse::<u64>().ok()) {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        generations.dedup();
        Ok(generations)
    }
}
