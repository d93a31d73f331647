//! Redundancy Descriptor
//!
//! One configured redundancy policy at runtime: whether it is enabled, how
//! often it applies, where it caches, and the erasure scheme built for it.
//! Descriptors are created collectively by the builder, live for the job,
//! and are never mutated afterwards except that `enabled` may be cleared
//! by global agreement.

use std::path::PathBuf;

use tracing::debug;

use crate::config::ConfigTree;
use crate::erasure::{ErasureRef, SchemeId};
use crate::redundancy::{
    CopyScheme, KEY_DIRECTORY, KEY_ENABLED, KEY_INTERVAL, KEY_OUTPUT, KEY_STORE, KEY_TYPE,
};
use crate::store::{StoreDescriptor, StoreRegistry};

/// Erasure scheme handle owned by a descriptor, released exactly once.
struct OwnedScheme {
    lib: ErasureRef,
    id: SchemeId,
}

impl Drop for OwnedScheme {
    fn drop(&mut self) {
        if let Err(e) = self.lib.free_scheme(self.id) {
            debug!(scheme = self.id.0, "Scheme release failed: {e}");
        }
    }
}

/// One redundancy policy at runtime.
pub struct RedundancyDescriptor {
    /// Whether the descriptor may be used; globally agreed
    pub enabled: bool,

    /// Position in the descriptor table
    pub index: usize,

    /// Eligibility modulus: the descriptor applies to checkpoint id C iff
    /// C mod interval == 0
    pub interval: u64,

    /// Whether the descriptor may encode checkpoints declared as outputs
    pub output: bool,

    /// Resolved index into the store registry
    pub store_index: Option<usize>,

    /// Reduced store path the descriptor was configured with
    pub store_name: PathBuf,

    /// Derived cache directory `<store>/<username>/scr.<jobid>`
    pub directory: PathBuf,

    /// Redundancy scheme family
    pub copy_type: CopyScheme,

    /// Name of the failure domain the scheme was built over
    pub failure_group: String,

    /// Built erasure scheme, when construction succeeded
    scheme: Option<OwnedScheme>,
}

impl RedundancyDescriptor {
    /// The zeroed pre-construction state: disabled, nothing resolved,
    /// no scheme.
    pub fn unbuilt() -> Self {
        Self {
            enabled: false,
            index: 0,
            interval: 0,
            output: false,
            store_index: None,
            store_name: PathBuf::new(),
            directory: PathBuf::new(),
            copy_type: CopyScheme::Single,
            failure_group: String::new(),
            scheme: None,
        }
    }

    /// Attach a freshly built scheme handle.
    pub(crate) fn attach_scheme(&mut self, lib: ErasureRef, id: SchemeId) {
        self.scheme = Some(OwnedScheme { lib, id });
    }

    /// Handle of the built scheme, if any.
    pub fn scheme_id(&self) -> Option<SchemeId> {
        self.scheme.as_ref().map(|s| s.id)
    }

    /// Whether the descriptor can drive an encode right now: enabled, bound
    /// to an enabled store, and holding a built scheme.
    pub fn usable(&self, stores: &StoreRegistry) -> bool {
        self.enabled && self.scheme.is_some() && self.get_store(stores).is_some()
    }

    /// The store descriptor this policy caches on. Returns `None` when the
    /// descriptor is disabled, unbound, or the store itself is disabled.
    pub fn get_store<'a>(&self, stores: &'a StoreRegistry) -> Option<&'a StoreDescriptor> {
        if !self.enabled {
            return None;
        }
        let store = stores.get(self.store_index?)?;
        store.enabled.then_some(store)
    }

    /// Release the erasure scheme. Safe to call more than once; only the
    /// first call frees anything.
    pub fn free(&mut self) {
        self.scheme = None;
    }

    /// Serialize the descriptor to a configuration subtree.
    ///
    /// Runtime-dependent indices (table position, store index, group
    /// index) are deliberately omitted: they are re-derived on the next
    /// run's environment.
    pub fn to_config(&self) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.set(KEY_ENABLED, if self.enabled { "1" } else { "0" });
        tree.set(KEY_INTERVAL, self.interval.to_string());
        tree.set(KEY_OUTPUT, if self.output { "1" } else { "0" });
        if !self.store_name.as_os_str().is_empty() {
            tree.set(KEY_STORE, self.store_name.display().to_string());
        }
        if !self.directory.as_os_str().is_empty() {
            tree.set(KEY_DIRECTORY, self.directory.display().to_string());
        }
        tree.set(KEY_TYPE, self.copy_type.token());
        tree
    }
}

// =============================================================================
// Tests
// =============================================================================
