//! Descriptor Table
//!
//! The job's ordered collection of redundancy descriptors, built from the
//! named entries of the job configuration in ascending key order so every
//! rank constructs the same table.

use tracing::error;

use crate::config::ConfigTree;
use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::redundancy::{builder, RedundancyDescriptor};

/// Ordered table of the job's redundancy descriptors.
#[derive(Default)]
pub struct DescriptorTable {
    descs: Vec<RedundancyDescriptor>,
}

impl DescriptorTable {
    /// Collectively build the table from the configuration's named
    /// redundancy entries. Entries are visited in ascending key order with
    /// sequential indices, so the layout is identical on every rank.
    ///
    /// A failed entry leaves a disabled placeholder so later entries keep
    /// their indices; the build then reports the first failure, and every
    /// descriptor constructed along the way is released on drop.
    pub fn build(ctx: &JobContext, config: &ConfigTree) -> Result<DescriptorTable> {
        let mut descs = Vec::with_capacity(config.len());
        let mut first_err: Option<Error> = None;

        for (index, (name, subtree)) in config.iter().enumerate() {
            match builder::build(ctx, index, Some(subtree)) {
                Ok(desc) => descs.push(desc),
                Err(e) => {
                    if ctx.is_leader() {
                        error!(entry = name, "Failed to set up redundancy descriptor: {e}");
                    }
                    descs.push(RedundancyDescriptor::unbuilt());
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            None => Ok(DescriptorTable { descs }),
            Some(e) => Err(e),
        }
    }

    /// Number of descriptors in the table.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Descriptor at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&RedundancyDescriptor> {
        self.descs.get(index)
    }

    /// Iterate descriptors in table order.
    pub fn iter(&self) -> impl Iterator<Item = &RedundancyDescriptor> {
        self.descs.iter()
    }

    /// Select the descriptor for a checkpoint id: the enabled descriptor
    /// with the largest interval evenly dividing `id`. Strict comparison
    /// makes the first-found win ties, so selection is stable across the
    /// table order.
    pub fn select(&self, id: u64) -> Option<&RedundancyDescriptor> {
        let mut best: Option<&RedundancyDescriptor> = None;
        let mut interval = 0u64;
        for desc in &self.descs {
            if desc.enabled && desc.interval > interval && id % desc.interval == 0 {
                best = Some(desc);
                interval = desc.interval;
            }
        }
        best
    }

    /// Release every descriptor's scheme. Drop does the same; this is for
    /// explicit teardown ordering ahead of communicator shutdown.
    pub fn free_all(&mut self) {
        for desc in &mut self.descs {
            desc.free();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::LocalComm;
    use crate::comm::CommRef;
    use crate::erasure::LocalErasure;
    use crate::group::{GroupDescriptor, NODE_GROUP};
    use crate::redundancy::{CopyScheme, KEY_INTERVAL, KEY_STORE, KEY_TYPE};
    use crate::store::StoreDescriptor;
    use std::sync::Arc;

    fn solo_context() -> JobContext {
        let world: CommRef = LocalComm::world(1).remove(0);
        let mut ctx = JobContext::new(
            CommRef::clone(&world),
            "alice",
            "7",
            Arc::new(LocalErasure::new()),
        );
        ctx.stores
            .register(StoreDescriptor::new("/dev/shm", CommRef::clone(&world)));
        ctx.groups.register(GroupDescriptor::new(NODE_GROUP, world));
        ctx
    }

    fn entry(interval: u64) -> ConfigTree {
        let mut tree = ConfigTree::new();
        tree.set(KEY_STORE, "/dev/shm");
        tree.set(KEY_INTERVAL, interval.to_string());
        tree
    }

    #[test]
    fn test_build_assigns_sequential_indices_in_key_order() {
        let ctx = solo_context();
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("CKPT_B", entry(2));
        cfg.set_subtree("CKPT_A", entry(1));

        let table = DescriptorTable::build(&ctx, &cfg).unwrap();
        assert_eq!(table.len(), 2);
        // CKPT_A sorts first and gets index 0.
        assert_eq!(table.get(0).unwrap().interval, 1);
        assert_eq!(table.get(0).unwrap().index, 0);
        assert_eq!(table.get(1).unwrap().interval, 2);
        assert_eq!(table.get(1).unwrap().index, 1);
    }

    #[test]
    fn test_build_twice_is_deterministic() {
        let ctx = solo_context();
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("C2", entry(4));
        cfg.set_subtree("C0", entry(1));
        cfg.set_subtree("C1", entry(2));

        let first = DescriptorTable::build(&ctx, &cfg).unwrap();
        let second = DescriptorTable::build(&ctx, &cfg).unwrap();
        for i in 0..first.len() {
            assert_eq!(first.get(i).unwrap().interval, second.get(i).unwrap().interval);
            assert_eq!(first.get(i).unwrap().index, second.get(i).unwrap().index);
        }
    }

    #[test]
    fn test_select_prefers_largest_dividing_interval() {
        let ctx = solo_context();
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", entry(2));
        cfg.set_subtree("B", entry(6));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();

        // Both 2 and 6 divide 12; 6 is larger.
        assert_eq!(table.select(12).unwrap().interval, 6);
        // Only 2 divides 4.
        assert_eq!(table.select(4).unwrap().interval, 2);
        // Nothing divides 7.
        assert!(table.select(7).is_none());
    }

    #[test]
    fn test_select_ties_resolve_first_in_table() {
        let ctx = solo_context();
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", entry(3));
        cfg.set_subtree("B", entry(3));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();

        assert_eq!(table.select(9).unwrap().index, 0);
    }

    #[test]
    fn test_select_skips_disabled() {
        let ctx = solo_context();
        let mut big = entry(6);
        big.set("ENABLED", "0");
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", entry(2));
        cfg.set_subtree("B", big);
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();

        assert_eq!(table.select(12).unwrap().interval, 2);
    }

    #[test]
    fn test_free_all_releases_schemes() {
        let ctx = solo_context();
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", entry(1));
        let mut table = DescriptorTable::build(&ctx, &cfg).unwrap();

        assert!(table.get(0).unwrap().scheme_id().is_some());
        table.free_all();
        assert!(table.get(0).unwrap().scheme_id().is_none());
    }

    #[test]
    fn test_single_node_table_forces_single_everywhere() {
        let ctx = solo_context();
        let mut xor = entry(1);
        xor.set(KEY_TYPE, "XOR");
        let mut partner = entry(2);
        partner.set(KEY_TYPE, "PARTNER");
        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", xor);
        cfg.set_subtree("B", partner);

        let table = DescriptorTable::build(&ctx, &cfg).unwrap();
        for desc in table.iter() {
            assert_eq!(desc.copy_type, CopyScheme::Single);
        }
    }
}
