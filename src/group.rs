//! Failure Group Registry
//!
//! A failure group joins the ranks presumed to fail together — all ranks on
//! one node, one blade, one rack. Groups are named ("NODE", "RACK") and
//! built once at job start from the world communicator.

use crate::comm::CommRef;

/// Name of the always-present per-node failure group.
pub const NODE_GROUP: &str = "NODE";

/// One named failure domain.
pub struct GroupDescriptor {
    /// Group name, e.g. "NODE"
    pub name: String,

    /// Communicator joining this rank's failure-domain peers
    pub comm: CommRef,
}

impl GroupDescriptor {
    /// Create a group descriptor.
    pub fn new(name: impl Into<String>, comm: CommRef) -> Self {
        Self {
            name: name.into(),
            comm,
        }
    }

    /// Number of ranks in this rank's failure domain.
    pub fn ranks(&self) -> usize {
        self.comm.size()
    }

    /// This rank's position within the failure domain.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }
}

/// Ordered table of the job's failure groups.
#[derive(Default)]
pub struct GroupRegistry {
    groups: Vec<GroupDescriptor>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group, returning its index.
    pub fn register(&mut self, group: GroupDescriptor) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    /// Look a group up by name.
    pub fn from_name(&self, name: &str) -> Option<&GroupDescriptor> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups are registered.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
