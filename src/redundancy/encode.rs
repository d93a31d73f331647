//! Encode Pipeline
//!
//! Applies a descriptor's redundancy scheme to one checkpoint: wraps the
//! filemap's files plus the filemap itself into an erasure set, validates
//! locally, agrees globally, then drives dispatch/wait/free. All-or-nothing:
//! no rank dispatches unless every rank's files validated.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, instrument};

use crate::cache::{dataset_dir, filemap_path, hidden_dir, redundancy_prefix};
use crate::collective::{all_true, sum_reduce};
use crate::context::JobContext;
use crate::erasure::Direction;
use crate::error::{Error, Result};
use crate::filemap::Filemap;
use crate::redundancy::{CopyScheme, RedundancyDescriptor};
use crate::transfer::TransferRecord;

/// What a successful apply moved.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    /// Aggregate bytes across all ranks, summed at file-add time
    pub bytes: f64,

    /// Wall-clock seconds from dispatch to free
    pub seconds: f64,
}

/// Apply the descriptor's redundancy scheme to checkpoint `id`.
///
/// Collective: every rank calls with its own filemap and the shared
/// descriptor. On success the hidden cache directory holds the erasure
/// artifacts and the filemap has been persisted (with CRCs when the job
/// computes them) and protected alongside the application files.
#[instrument(skip(ctx, map, desc), fields(index = desc.index))]
pub fn apply(
    ctx: &JobContext,
    map: &mut Filemap,
    desc: &RedundancyDescriptor,
    id: u64,
) -> Result<ApplyOutcome> {
    // The descriptor state is globally agreed, so these gates fail
    // uniformly on every rank before the first collective.
    let store = desc.get_store(&ctx.stores).ok_or_else(|| {
        Error::UnknownStore(format!(
            "descriptor {} has no usable store for checkpoint {id}",
            desc.index
        ))
    })?;
    let scheme = desc.scheme_id().ok_or_else(|| {
        Error::SchemeBuildFailed(format!("descriptor {} has no built scheme", desc.index))
    })?;

    let hidden = hidden_dir(&desc.directory, id);
    let prefix = redundancy_prefix(&hidden);

    let mut valid = true;
    let set = match ctx.erasure.create_set(
        &ctx.world,
        &store.comm,
        &prefix,
        Direction::Encode,
        Some(scheme),
    ) {
        Ok(set) => Some(set),
        Err(e) => {
            error!("Failed to create erasure set: {e}");
            valid = false;
            None
        }
    };

    // Walk this rank's files: flag anything the filemap calls incomplete,
    // add to the set, and accumulate sizes for the byte report.
    let mut my_bytes = 0.0_f64;
    let files: Vec<PathBuf> = map.files().map(PathBuf::from).collect();
    for file in &files {
        if !map.have_file(file) {
            debug!(file = %file.display(), "File determined to be invalid");
            valid = false;
        }

        if let Some(set) = set {
            if let Err(e) = ctx.erasure.add_file(set, file) {
                error!(file = %file.display(), "Failed to add file to erasure set: {e}");
                valid = false;
            }
        }

        my_bytes += std::fs::metadata(file).map(|m| m.len() as f64).unwrap_or(0.0);

        // PARTNER computes CRCs as a side effect of the copy itself.
        if ctx.settings.crc_on_copy && desc.copy_type != CopyScheme::Partner {
            if let Err(e) = map.compute_crc(file) {
                error!(file = %file.display(), "CRC computation failed: {e}");
                valid = false;
            }
        }
    }

    // Persist the filemap into the hidden directory and protect it like
    // any other member of the set.
    let map_path = filemap_path(&hidden, ctx.rank());
    match map.write_to(&map_path) {
        Ok(()) => {
            if let Some(set) = set {
                if let Err(e) = ctx.erasure.add_file(set, &map_path) {
                    error!("Failed to add filemap to erasure set: {e}");
                    valid = false;
                }
            }
        }
        Err(e) => {
            error!("Failed to persist filemap: {e}");
            valid = false;
        }
    }

    // Global gate: nobody dispatches unless everyone's files are good.
    if !all_true(&ctx.world, valid)? {
        if ctx.is_leader() {
            debug!("Exiting copy since one or more checkpoint files is invalid");
        }
        if let Some(set) = set {
            let _ = ctx.erasure.free_set(set);
        }
        return Err(Error::ConsensusFailure(
            "checkpoint files invalid on at least one rank".into(),
        ));
    }
    let set = set.expect("set exists on every rank that passed the gate");

    let start = Instant::now();

    let mut success = true;
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

    let all_ok = all_true(&ctx.world, success)?;
    let bytes = sum_reduce(&ctx.world, my_bytes)?;
    let seconds = start.elapsed().as_secs_f64();

    if ctx.is_leader() {
        let mb_per_s = bytes / (1024.0 * 1024.0 * seconds.max(f64::MIN_POSITIVE));
        debug!(
            "redundancy apply: {seconds:.6} secs, {bytes:e} bytes, {mb_per_s:.3} MB/s, {:.3} MB/s per rank",
            mb_per_s / ctx.size() as f64
        );
        if let Some(log) = &ctx.transfer_log {
            let record = TransferRecord::copy(
                &desc.store_name,
                &dataset_dir(&desc.directory, id),
                id,
                seconds,
                bytes,
            );
            if let Err(e) = log.record(&record) {
                error!("Transfer log append failed: {e}");
            }
        }
    }

    if all_ok {
        Ok(ApplyOutcome { bytes, seconds })
    } else {
        Err(Error::EncodeFailed(
            "erasure encode failed on at least one rank".into(),
        ))
    }
}
