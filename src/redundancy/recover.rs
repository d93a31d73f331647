//! Decode Pipeline
//!
//! Drives the erasure library over an existing hidden cache directory in
//! the REBUILD and REMOVE directions. Neither path consults a filemap —
//! they work purely from directory state, which is what makes them usable
//! during restart before any checkpoint metadata has been loaded.

use std::path::Path;

use tracing::{error, instrument};

use crate::cache::redundancy_prefix;
use crate::collective::all_true;
use crate::context::JobContext;
use crate::erasure::Direction;
use crate::error::{Error, Result};

/// Run one decode-side erasure set over `dir` in the given direction.
fn drive(ctx: &JobContext, dir: &Path, direction: Direction) -> Result<()> {
    // Resolve which store this directory lives on; the registry is
    // identical on every rank, so a failed match fails uniformly.
    let store_index = ctx
        .stores
        .index_from_child_path(dir)
        .ok_or_else(|| Error::UnknownStore(dir.display().to_string()))?;
    let store = ctx
        .stores
        .get(store_index)
        .expect("index_from_child_path returned a valid index");

    let prefix = redundancy_prefix(dir);

    let mut success = true;
    let set = match ctx
        .erasure
        .create_set(&ctx.world, &store.comm, &prefix, direction, None)
    {
        Ok(set) => Some(set),
        Err(e) => {
            error!("Failed to create erasure set: {e}");
            success = false;
            None
        }
    };

    // Agree that every rank holds an open set before anyone dispatches,
    // so the collective schedule inside the library stays aligned.
    if !all_true(&ctx.world, success)? {
        if let Some(set) = set {
            let _ = ctx.erasure.free_set(set);
        }
        return Err(Error::ConsensusFailure(format!(
            "erasure set creation failed on at least one rank during {direction}"
        )));
    }
    let set = set.expect("set exists on every rank that passed the gate");

    if let Err(e) = ctx.erasure.dispatch(set) {
        error!("Erasure dispatch failed: {e}");
        success = false;
    }
    if let Err(e) = ctx.erasure.wait(set) {
        error!("Erasure wait failed: {e}");
        success = false;
    }
    if let Err(e) = ctx.erasure.free_set(set) {
        error!("Erasure free failed: {e}");
        success = false;
    }

    if all_true(&ctx.world, success)? {
        Ok(())
    } else {
        Err(match direction {
            Direction::Rebuild => {
                Error::RebuildFailed("erasure rebuild failed on at least one rank".into())
            }
            _ => Error::RemoveFailed("erasure remove failed on at least one rank".into()),
        })
    }
}

/// Rebuild the files protected under the hidden directory `dir`.
///
/// Collective. On success every rank's files are back on disk exactly as
/// they were encoded, ready to be registered into a fresh filemap.
#[instrument(skip(ctx))]
pub fn recover(ctx: &JobContext, dir: &Path) -> Result<()> {
    drive(ctx, dir, Direction::Rebuild)
}

/// Remove the redundancy artifacts under the hidden directory `dir`,
/// leaving the checkpoint files alone.
///
/// Collective. Encode failure does not remove partial artifacts on its
/// own; this is the explicit cleanup path.
#[instrument(skip(ctx))]
pub fn unapply(ctx: &JobContext, dir: &Path) -> Result<()> {
    drive(ctx, dir, Direction::Remove)
}
