//! Collective Descriptor Construction
//!
//! Builds one [`RedundancyDescriptor`] from a configuration subtree. Every
//! rank calls [`build`] with the same subtree and index; every rank leaves
//! with the same `enabled` value. A step that fails locally disables the
//! descriptor rather than returning early, so the collective call schedule
//! stays identical on all ranks.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::cache::{job_dir, reduce_path};
use crate::collective::{all_true, broadcast_string};
use crate::config::ConfigTree;
use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::group::NODE_GROUP;
use crate::redundancy::{
    CopyScheme, RedundancyDescriptor, KEY_ENABLED, KEY_GROUP, KEY_INTERVAL, KEY_OUTPUT,
    KEY_SET_SIZE, KEY_STORE, KEY_TYPE,
};

/// Disable the descriptor and warn once, on rank 0 only.
fn disable(desc: &mut RedundancyDescriptor, ctx: &JobContext, reason: &str) {
    desc.enabled = false;
    if ctx.is_leader() {
        warn!(index = desc.index, "{reason}; disabling redundancy descriptor");
    }
}

/// Collectively build a descriptor from a configuration subtree.
///
/// Preconditions: called on every rank with the same subtree and the same
/// `index`. Postcondition: the returned descriptor carries the same
/// `enabled` on every rank, and a built scheme when enabled.
///
/// Resolution failures (unknown store, unknown type, scheme refusal)
/// disable the descriptor and still return `Ok`; only input validation
/// that fails the opening global check returns `Err`, and it does so on
/// every rank.
pub fn build(
    ctx: &JobContext,
    index: usize,
    config: Option<&ConfigTree>,
) -> Result<RedundancyDescriptor> {
    // Step 1: validate inputs locally, then agree globally. On dissent
    // every rank backs out before any descriptor state exists.
    if !all_true(&ctx.world, config.is_some())? {
        return Err(Error::ConsensusFailure(
            "redundancy configuration missing on at least one rank".into(),
        ));
    }
    let config = config.expect("validated by the global check");

    // Step 2: start from the zeroed state, tentatively enabled.
    let mut desc = RedundancyDescriptor::unbuilt();
    desc.enabled = true;
    desc.index = index;

    // Step 3: read fields, falling back to the job-wide defaults.
    match config.get_bool_or(KEY_ENABLED, true) {
        Ok(enabled) => desc.enabled = enabled,
        Err(e) => disable(&mut desc, ctx, &e.to_string()),
    }

    desc.interval = 1;
    match config.get_i64_or(KEY_INTERVAL, 1) {
        Ok(v) if v >= 1 => desc.interval = v as u64,
        Ok(v) => disable(&mut desc, ctx, &format!("INTERVAL={v} must be at least 1")),
        Err(e) => disable(&mut desc, ctx, &e.to_string()),
    }

    match config.get_bool_or(KEY_OUTPUT, false) {
        Ok(output) => desc.output = output,
        Err(e) => disable(&mut desc, ctx, &e.to_string()),
    }

    // Step 4: resolve the store.
    let cache_base = ctx.settings.cache_base.display().to_string();
    let store_raw = config.get_str_or(KEY_STORE, &cache_base);
    desc.store_name = reduce_path(Path::new(store_raw));
    match ctx.stores.index_from_name(&desc.store_name) {
        Some(store_index) => desc.store_index = Some(store_index),
        None => {
            let msg = format!(
                "{}",
                Error::UnknownStore(desc.store_name.display().to_string())
            );
            disable(&mut desc, ctx, &msg)
        }
    }

    // Step 5: derive the cache directory.
    desc.directory = job_dir(&desc.store_name, &ctx.username, &ctx.jobid);

    // Step 6: parse the copy type, with the set size resolved first so an
    // XOR selection picks it up.
    let mut set_size = ctx.settings.set_size;
    match config.get_i64_or(KEY_SET_SIZE, i64::from(ctx.settings.set_size)) {
        Ok(v) if v >= 1 => set_size = v as u32,
        Ok(v) => disable(&mut desc, ctx, &format!("SET_SIZE={v} must be at least 1")),
        Err(e) => disable(&mut desc, ctx, &e.to_string()),
    }

    desc.copy_type = ctx.settings.copy_type.with_set_size(set_size);
    if let Some(raw) = config.get(KEY_TYPE) {
        match CopyScheme::parse(raw, set_size) {
            Ok(scheme) => desc.copy_type = scheme,
            Err(e) => disable(&mut desc, ctx, &e.to_string()),
        }
    }

    // Step 7: single-node jobs always run SINGLE so users need not adjust
    // the copy type to try a job on one node.
    if let Some(node) = ctx.groups.from_name(NODE_GROUP) {
        if node.ranks() == ctx.size() {
            if desc.copy_type != CopyScheme::Single && ctx.is_leader() {
                warn!(
                    index = desc.index,
                    "Forcing copy type to SINGLE for single-node job"
                );
            }
            desc.copy_type = CopyScheme::Single;
        }
    }

    // Step 8: resolve the failure group and agree on a failure-domain
    // identifier: the group leader's world rank, broadcast within the
    // group. The registry is identical on every rank, so a missing group
    // skips the broadcast uniformly.
    let group_name = config.get_str_or(KEY_GROUP, &ctx.settings.group);
    desc.failure_group = group_name.to_string();
    let failure_domain = match ctx.groups.from_name(group_name) {
        Some(group) => {
            let mine = (group.rank() == 0).then(|| ctx.rank().to_string());
            Some(broadcast_string(&group.comm, mine.as_deref(), 0)?)
        }
        None => {
            disable(
                &mut desc,
                ctx,
                &format!("{}", Error::UnknownGroup(group_name.to_string())),
            );
            None
        }
    };

    // Step 9: build the erasure scheme over the world. The scheme build
    // is collective, and skipping it here is safe only because every
    // disable cause above reads replicated state: `enabled` is already
    // identical on all ranks.
    if desc.enabled {
        if let Some(domain) = failure_domain {
            match ctx
                .erasure
                .create_scheme(&ctx.world, &domain, desc.copy_type.encoding())
            {
                Ok(id) => desc.attach_scheme(Arc::clone(&ctx.erasure), id),
                Err(e) => disable(&mut desc, ctx, &e.to_string()),
            }
        }
    }

    // Step 10: if any rank disabled, every rank disables.
    desc.enabled = all_true(&ctx.world, desc.enabled)?;
    Ok(desc)
}

// =============================================================================
// Tests
// =============================================================================
