//! Erasure Library Port
//!
//! The redundancy pipelines treat the erasure library as a capability
//! interface: schemes are opaque owned handles, and one invocation is an
//! *erasure set* — a collection of files bound to a scheme and a direction.
//!
//! ```text
//! create_scheme ──▶ SchemeId ──┐
//!                              ▼
//! create_set(direction) ──▶ add_file* ──▶ dispatch ──▶ wait ──▶ free_set
//! ```
//!
//! Every set operation after `create_set` is collective over the world
//! communicator the set was created with.

pub mod local;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::comm::CommRef;
use crate::error::Result;

pub use local::LocalErasure;

/// Shared handle to an erasure library implementation.
pub type ErasureRef = Arc<dyn ErasureLib>;

/// Direction of one erasure-set invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Produce redundancy artifacts for the added files
    Encode,
    /// Restore missing files from redundancy artifacts
    Rebuild,
    /// Delete the redundancy artifacts, leaving the files
    Remove,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Encode => write!(f, "encode"),
            Direction::Rebuild => write!(f, "rebuild"),
            Direction::Remove => write!(f, "remove"),
        }
    }
}

/// Redundancy layout a scheme applies across the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemeEncoding {
    /// No redundancy; artifacts describe the file set only
    None,
    /// Full copy of each rank's files held by its ring partner
    Mirror,
    /// One parity artifact per group of `set_size` consecutive ranks
    Parity { set_size: u32 },
}

/// Opaque handle to a built scheme. Owned by the descriptor that built it
/// and released exactly once on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemeId(pub u64);

/// Opaque handle to one in-flight erasure set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(pub u64);

/// Port for the erasure library.
///
/// `dispatch` and `wait` are collective: every rank of the set's world must
/// call them, in order, even when its local preparation failed.
pub trait ErasureLib: Send + Sync {
    /// Build a scheme over `world` for the given encoding. The
    /// `failure_domain` identifier groups ranks presumed to fail together;
    /// all members of one failure group pass the same identifier.
    fn create_scheme(
        &self,
        world: &CommRef,
        failure_domain: &str,
        encoding: SchemeEncoding,
    ) -> Result<SchemeId>;

    /// Release a scheme handle.
    fn free_scheme(&self, scheme: SchemeId) -> Result<()>;

    /// Open an erasure set rooted at `prefix`. Encode requires a scheme;
    /// Rebuild and Remove discover the layout from the artifacts on disk.
    fn create_set(
        &self,
        world: &CommRef,
        store_comm: &CommRef,
        prefix: &Path,
        direction: Direction,
        scheme: Option<SchemeId>,
    ) -> Result<SetId>;

    /// Add a local file to the set. Paths must be absolute.
    fn add_file(&self, set: SetId, file: &Path) -> Result<()>;

    /// Execute the set in its direction. Collective.
    fn dispatch(&self, set: SetId) -> Result<()>;

    /// Complete the set, returning the recorded local status. Collective.
    fn wait(&self, set: SetId) -> Result<()>;

    /// Release the set handle.
    fn free_set(&self, set: SetId) -> Result<()>;
}
