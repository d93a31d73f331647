//! Checkpoint Filemap
//!
//! The per-rank inventory of files belonging to one checkpoint: byte size,
//! optional CRC32, and a completeness flag set by the writer once the file
//! is fully flushed. The map is persisted as JSON alongside the checkpoint
//! so restart can validate what survived.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

// =============================================================================
// CRC32
// =============================================================================

/// CRC32 (reflected, polynomial 0xEDB88320) over a byte slice, continuing
/// from a previous partial value. Start from `0xFFFF_FFFF` and finish by
/// inverting.
fn crc32_update(mut crc: u32, bytes: &[u8]) -> u32 {
    const POLYNOMIAL: u32 = 0xEDB8_8320;
    for &byte in bytes {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC32 of a byte slice.
pub(crate) fn crc32_bytes(bytes: &[u8]) -> u32 {
    !crc32_update(0xFFFF_FFFF, bytes)
}

/// CRC32 of a file's contents, streamed.
pub(crate) fn crc32_file(path: &Path) -> Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = [0u8; 64 * 1024];
    let mut crc = 0xFFFF_FFFF_u32;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        crc = crc32_update(crc, &buf[..n]);
    }
    Ok(!crc)
}

// =============================================================================
// Filemap
// =============================================================================

/// Metadata recorded for one checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Size in bytes at registration time
    pub size: u64,

    /// CRC32 of the contents, when computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<u32>,

    /// Whether the writer finished the file
    pub complete: bool,
}

/// Per-rank file inventory for one checkpoint.
///
/// Files are keyed by absolute path and iterated in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filemap {
    files: BTreeMap<PathBuf, FileMeta>,
}

impl Filemap {
    /// Create an empty filemap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the filemap has no entries.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Register a file with its current on-disk size, marked complete.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        self.files.insert(
            path,
            FileMeta {
                size,
                crc32: None,
                complete: true,
            },
        );
        Ok(())
    }

    /// Register a file with explicit metadata.
    pub fn insert(&mut self, path: impl Into<PathBuf>, meta: FileMeta) {
        self.files.insert(path.into(), meta);
    }

    /// Flag a file as incomplete.
    pub fn mark_incomplete(&mut self, path: &Path) {
        if let Some(meta) = self.files.get_mut(path) {
            meta.complete = false;
        }
    }

    /// Metadata for one file, if registered.
    pub fn meta(&self, path: &Path) -> Option<&FileMeta> {
        self.files.get(path)
    }

    /// Iterate registered paths in path order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Whether a registered file is valid: flagged complete and present on
    /// disk with the recorded size.
    pub fn have_file(&self, path: &Path) -> bool {
        let Some(meta) = self.files.get(path) else {
            return false;
        };
        if !meta.complete {
            return false;
        }
        match std::fs::metadata(path) {
            Ok(stat) => stat.len() == meta.size,
            Err(_) => false,
        }
    }

    /// Compute the file's CRC32 and record it in the entry.
    pub fn compute_crc(&mut self, path: &Path) -> Result<u32> {
        let crc = crc32_file(path)?;
        match self.files.get_mut(path) {
            Some(meta) => {
                meta.crc32 = Some(crc);
                Ok(crc)
            }
            None => Err(Error::FileInvalid {
                path: path.display().to_string(),
                reason: "not registered in filemap".into(),
            }),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the filemap as JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Internal(format!("filemap serialization failed: {e}")))?;
        let mut file = File::create(path)?;
        file.write_all(&json)?;
        debug!(path = %path.display(), entries = self.len(), "Wrote filemap");
        Ok(())
    }

    /// Read a filemap back from JSON at `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader)
            .map_err(|e| Error::ConfigInvalid(format!("malformed filemap {}: {e}", path.display())))
    }
}

// =============================================================================
// Tests
// =============================================================================
