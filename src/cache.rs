//! Checkpoint Cache Layout
//!
//! Stateless path helpers for the per-job cache on a storage tier. All
//! paths derive from the descriptor directory `<store>/<username>/scr.<jobid>`:
//!
//! ```text
//! <directory>/
//! ├── ckpt.<id>/                 # dataset directory (application files)
//! │   └── .redstor/              # hidden directory (redundancy state)
//! │       ├── filemap.<rank>.json
//! │       └── reddesc*           # erasure artifacts under this prefix
//! └── ckpt.<id+1>/...
//! ```
//!
//! These functions only compute paths; they never touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Hidden directory name under each dataset directory.
const HIDDEN_DIR: &str = ".redstor";

/// File-name prefix for erasure artifacts in the hidden directory.
const REDUNDANCY_PREFIX: &str = "reddesc";

/// Lexically reduce a path: collapse `.`, resolve `..` against named
/// components, and drop duplicate separators. No filesystem access, so
/// symlinks are left alone.
pub fn reduce_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Per-job cache directory on a store: `<store>/<username>/scr.<jobid>`.
pub fn job_dir(store: &Path, username: &str, jobid: &str) -> PathBuf {
    reduce_path(&store.join(username).join(format!("scr.{jobid}")))
}

/// Dataset directory for one checkpoint id.
pub fn dataset_dir(descriptor_dir: &Path, id: u64) -> PathBuf {
    descriptor_dir.join(format!("ckpt.{id}"))
}

/// Hidden directory holding redundancy state for one checkpoint id.
pub fn hidden_dir(descriptor_dir: &Path, id: u64) -> PathBuf {
    dataset_dir(descriptor_dir, id).join(HIDDEN_DIR)
}

/// Prefix under which the erasure library places its artifacts.
pub fn redundancy_prefix(hidden: &Path) -> PathBuf {
    hidden.join(REDUNDANCY_PREFIX)
}

/// Path of one rank's persisted filemap for a checkpoint.
pub fn filemap_path(hidden: &Path, rank: usize) -> PathBuf {
    hidden.join(format!("filemap.{rank}.json"))
}

// =============================================================================
// Tests
// =============================================================================
