//! Storage Tier Registry
//!
//! Each storage tier ("ram", "ssd", a burst buffer mount) is described by a
//! store descriptor: its reduced mount path, an enabled flag, and the
//! communicator joining the ranks that share the tier on one node. The
//! registry is built once at job start and is read-only afterwards.

use std::path::{Path, PathBuf};

use crate::cache::reduce_path;
use crate::comm::CommRef;

/// One storage tier available for checkpoint caching.
pub struct StoreDescriptor {
    /// Reduced absolute mount path, which is also the store's name
    pub name: PathBuf,

    /// Whether the tier may be used
    pub enabled: bool,

    /// Communicator joining the ranks sharing this tier on a node
    pub comm: CommRef,
}

impl StoreDescriptor {
    /// Create an enabled store rooted at `name`.
    pub fn new(name: impl AsRef<Path>, comm: CommRef) -> Self {
        Self {
            name: reduce_path(name.as_ref()),
            enabled: true,
            comm,
        }
    }
}

/// Ordered table of the job's storage tiers.
#[derive(Default)]
pub struct StoreRegistry {
    stores: Vec<StoreDescriptor>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store, returning its index.
    pub fn register(&mut self, store: StoreDescriptor) -> usize {
        self.stores.push(store);
        self.stores.len() - 1
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no stores are registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Store at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&StoreDescriptor> {
        self.stores.get(index)
    }

    /// Index of the store whose name equals the reduced `name`.
    pub fn index_from_name(&self, name: &Path) -> Option<usize> {
        let reduced = reduce_path(name);
        self.stores.iter().position(|s| s.name == reduced)
    }

    /// Index of the store whose mount path is an ancestor of `child`.
    ///
    /// The longest matching mount wins, so nested tiers resolve to the
    /// most specific store.
    pub fn index_from_child_path(&self, child: &Path) -> Option<usize> {
        let reduced = reduce_path(child);
        self.stores
            .iter()
            .enumerate()
            .filter(|(_, s)| reduced.starts_with(&s.name))
            .max_by_key(|(_, s)| s.name.as_os_str().len())
            .map(|(i, _)| i)
    }
}

// =============================================================================
// Tests
// =============================================================================
