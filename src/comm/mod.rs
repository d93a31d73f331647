//! Collective Communication Port
//!
//! The core observes remote state only through the collective operations on
//! this trait. Every call is a global synchronization point for the ranks
//! sharing the communicator: each member must enter the same call in the
//! same order or the job deadlocks.

pub mod local;

use std::sync::Arc;

use crate::error::Result;

pub use local::LocalComm;

/// Shared handle to a communicator.
pub type CommRef = Arc<dyn Communicator>;

/// Port for the collective-operation substrate joining a set of ranks.
///
/// Implementations must guarantee that every collective returns the same
/// result on every member rank.
pub trait Communicator: Send + Sync {
    /// This process's rank within the communicator, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks joined by the communicator.
    fn size(&self) -> usize;

    /// Logical AND of `value` across all ranks.
    fn all_and(&self, value: bool) -> Result<bool>;

    /// Sum of `value` across all ranks.
    fn sum_f64(&self, value: f64) -> Result<f64>;

    /// Broadcast a byte buffer from `root` to all ranks.
    ///
    /// The root passes `Some(payload)`; every other rank passes `None` and
    /// receives the root's bytes.
    fn broadcast(&self, payload: Option<Vec<u8>>, root: usize) -> Result<Vec<u8>>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Partition the communicator into disjoint subgroups by `color`.
    ///
    /// Ranks passing the same color land in the same subgroup; subgroup
    /// ranks are assigned in ascending parent-rank order.
    fn split(&self, color: u64) -> Result<CommRef>;
}
