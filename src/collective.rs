//! Cross-Rank Helpers
//!
//! The only collective primitives the redundancy core uses. Each helper is
//! a global synchronization point over the given communicator and must be
//! entered by every member rank.

use crate::comm::CommRef;
use crate::error::{Error, Result};

/// World-wide logical AND: true iff `value` is true on every rank.
pub fn all_true(comm: &CommRef, value: bool) -> Result<bool> {
    comm.all_and(value)
}

/// World-wide sum of a per-rank double.
pub fn sum_reduce(comm: &CommRef, value: f64) -> Result<f64> {
    comm.sum_f64(value)
}

/// Broadcast a string from `root` to every member of `comm`.
///
/// Two-step form: the length goes first so followers can size their buffer
/// before the contents arrive. The root passes `Some`, followers `None`;
/// every rank returns the root's string.
pub fn broadcast_string(comm: &CommRef, value: Option<&str>, root: usize) -> Result<String> {
    let len_payload = value.map(|s| (s.len() as u64).to_le_bytes().to_vec());
    let len_bytes = comm.broadcast(len_payload, root)?;
    let len = u64::from_le_bytes(
        len_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("malformed string-length broadcast".into()))?,
    );

    let contents = comm.broadcast(value.map(|s| s.as_bytes().to_vec()), root)?;
    if contents.len() as u64 != len {
        return Err(Error::Internal(
            "string broadcast length disagrees with contents".into(),
        ));
    }
    String::from_utf8(contents)
        .map_err(|_| Error::Internal("broadcast string is not valid UTF-8".into()))
}

// =============================================================================
// Tests
// =============================================================================
