//! Bundled File-Based Erasure Adapter
//!
//! A self-contained [`ErasureLib`] implementation for node-local stores that
//! share a filesystem (RAM disk in tests, a mounted burst buffer in small
//! deployments). Artifacts live next to the set prefix:
//!
//! ```text
//! <prefix>.<rank>.manifest      per-rank file inventory (JSON)
//! <prefix>.<rank>.copy/         partner-held copies (Mirror)
//! <prefix>.g<leader>.parity     parity shard for one group (Parity)
//! <prefix>.g<leader>.parity.meta group layout + member payloads (JSON)
//! ```
//!
//! Rebuild and Remove never look at a filemap: everything they need is in
//! the manifests, which is what allows restart-time recovery before any
//! checkpoint metadata has been loaded.
//!
//! Parity uses single-parity Reed-Solomon over the member payloads, so any
//! one member of a group can be rebuilt from the survivors.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::comm::CommRef;
use crate::erasure::{Direction, ErasureLib, SchemeEncoding, SchemeId, SetId};
use crate::error::{Error, Result};
use crate::filemap::{crc32_bytes, crc32_file};

const MANIFEST_VERSION: u32 = 1;

// =============================================================================
// Artifact Records
// =============================================================================

/// One protected file as recorded in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestFile {
    path: PathBuf,
    size: u64,
    crc32: u32,
}

/// Per-rank artifact manifest written at encode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankManifest {
    version: u32,
    rank: usize,
    world_size: usize,
    encoding: SchemeEncoding,
    failure_domain: String,
    files: Vec<ManifestFile>,
}

/// One group member's contribution to a parity artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberPayload {
    rank: usize,
    files: Vec<ManifestFile>,
    payload_len: u64,
}

/// Layout record written next to a parity shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParityMeta {
    version: u32,
    /// Members in ascending rank order; shard index equals position here
    members: Vec<MemberPayload>,
    /// Common padded shard length; zero when the group had no bytes
    shard_len: u64,
}

// =============================================================================
// Adapter State
// =============================================================================

struct SchemeState {
    encoding: SchemeEncoding,
    failure_domain: String,
}

struct SetState {
    world: CommRef,
    prefix: PathBuf,
    direction: Direction,
    /// Present for Encode sets; Rebuild/Remove discover it from manifests
    encoding: Option<SchemeEncoding>,
    failure_domain: String,
    files: Vec<PathBuf>,
    /// Recorded by dispatch, reported by wait
    status: Option<std::result::Result<(), String>>,
}

/// File-based erasure library for shared-filesystem stores.
pub struct LocalErasure {
    schemes: DashMap<u64, SchemeState>,
    sets: DashMap<u64, SetState>,
    next_scheme: AtomicU64,
    next_set: AtomicU64,
}

impl Default for LocalErasure {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalErasure {
    /// Create an adapter instance for this rank.
    pub fn new() -> Self {
        Self {
            schemes: DashMap::new(),
            sets: DashMap::new(),
            next_scheme: AtomicU64::new(1),
            next_set: AtomicU64::new(1),
        }
    }
}

// =============================================================================
// Path Helpers
// =============================================================================

/// Append a suffix to the prefix path itself (not a child component).
fn sibling(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn manifest_path(prefix: &Path, rank: usize) -> PathBuf {
    sibling(prefix, &format!(".{rank}.manifest"))
}

fn copy_dir(prefix: &Path, rank: usize) -> PathBuf {
    sibling(prefix, &format!(".{rank}.copy"))
}

fn parity_path(prefix: &Path, leader: usize) -> PathBuf {
    sibling(prefix, &format!(".g{leader}.parity"))
}

fn parity_meta_path(prefix: &Path, leader: usize) -> PathBuf {
    sibling(prefix, &format!(".g{leader}.parity.meta"))
}

/// Leader (lowest member rank) of the parity group containing `rank`.
fn group_leader(rank: usize, set_size: u32) -> usize {
    let set = set_size.max(1) as usize;
    (rank / set) * set
}

/// Member ranks of the parity group containing `rank`.
fn group_members(rank: usize, set_size: u32, world_size: usize) -> Vec<usize> {
    let leader = group_leader(rank, set_size);
    let set = set_size.max(1) as usize;
    (leader..world_size.min(leader + set)).collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> std::result::Result<T, String> {
    let file = File::open(path).map_err(|e| format!("open {}: {e}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("parse {}: {e}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::result::Result<(), String> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| e.to_string())?;
    let mut file = File::create(path).map_err(|e| format!("create {}: {e}", path.display()))?;
    file.write_all(&json)
        .map_err(|e| format!("write {}: {e}", path.display()))
}

// =============================================================================
// Encode
// =============================================================================

impl LocalErasure {
    /// Write this rank's manifest, and for Mirror the partner-held copies.
    fn encode_local(
        prefix: &Path,
        rank: usize,
        world_size: usize,
        encoding: SchemeEncoding,
        failure_domain: &str,
        files: &[PathBuf],
    ) -> std::result::Result<(), String> {
        if let Some(parent) = prefix.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("mkdir {}: {e}", parent.display()))?;
        }

        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let size = fs::metadata(path)
                .map_err(|e| format!("stat {}: {e}", path.display()))?
                .len();
            let crc32 =
                crc32_file(path).map_err(|e| format!("crc {}: {e}", path.display()))?;
            entries.push(ManifestFile {
                path: path.clone(),
                size,
                crc32,
            });
        }

        let manifest = RankManifest {
            version: MANIFEST_VERSION,
            rank,
            world_size,
            encoding,
            failure_domain: failure_domain.to_string(),
            files: entries,
        };
        write_json(&manifest_path(prefix, rank), &manifest)?;

        if encoding == SchemeEncoding::Mirror {
            let dir = copy_dir(prefix, rank);
            fs::create_dir_all(&dir).map_err(|e| format!("mkdir {}: {e}", dir.display()))?;
            for (i, entry) in manifest.files.iter().enumerate() {
                let dest = dir.join(format!("file.{i}"));
                fs::copy(&entry.path, &dest)
                    .map_err(|e| format!("copy {}: {e}", entry.path.display()))?;
            }
            // The manifest rides along with the copies so a rank that lost
            // everything can still find its inventory.
            write_json(&dir.join("manifest"), &manifest)?;
        }

        debug!(rank, files = manifest.files.len(), "Encoded rank manifest");
        Ok(())
    }

    /// Compute and write the parity artifact for the leader's group.
    fn encode_parity(
        prefix: &Path,
        leader: usize,
        set_size: u32,
        world_size: usize,
    ) -> std::result::Result<(), String> {
        let members = group_members(leader, set_size, world_size);

        let mut payloads = Vec::with_capacity(members.len());
        let mut metas = Vec::with_capacity(members.len());
        for &member in &members {
            let manifest: RankManifest = read_json(&manifest_path(prefix, member))?;
            let mut payload = Vec::new();
            for entry in &manifest.files {
                let bytes = fs::read(&entry.path)
                    .map_err(|e| format!("read {}: {e}", entry.path.display()))?;
                payload.extend_from_slice(&bytes);
            }
            metas.push(MemberPayload {
                rank: member,
                files: manifest.files,
                payload_len: payload.len() as u64,
            });
            payloads.push(payload);
        }

        let shard_len = payloads.iter().map(Vec::len).max().unwrap_or(0);
        let meta = ParityMeta {
            version: MANIFEST_VERSION,
            members: metas,
            shard_len: shard_len as u64,
        };
        write_json(&parity_meta_path(prefix, leader), &meta)?;

        if shard_len == 0 {
            return Ok(());
        }

        let mut shards: Vec<Vec<u8>> = payloads
            .into_iter()
            .map(|mut p| {
                p.resize(shard_len, 0);
                p
            })
            .collect();
        shards.push(vec![0u8; shard_len]);

        let rs = ReedSolomon::new(members.len(), 1)
            .map_err(|e| format!("parity codec for {} members: {e}", members.len()))?;
        rs.encode(&mut shards).map_err(|e| format!("parity encode: {e}"))?;

        let parity = shards.pop().expect("parity shard present");
        fs::write(parity_path(prefix, leader), &parity)
            .map_err(|e| format!("write parity: {e}"))?;
        debug!(leader, members = members.len(), shard_len, "Wrote group parity");
        Ok(())
    }
}

// =============================================================================
// Rebuild
// =============================================================================

impl LocalErasure {
    /// Recover this rank's manifest when the primary copy is gone.
    fn recover_manifest(prefix: &Path, rank: usize) -> std::result::Result<RankManifest, String> {
        let primary = manifest_path(prefix, rank);
        if primary.exists() {
            return read_json(&primary);
        }

        // Mirror keeps a duplicate next to the copies.
        let mirrored = copy_dir(prefix, rank).join("manifest");
        if mirrored.exists() {
            warn!(rank, "Primary manifest lost, using mirrored copy");
            return read_json(&mirrored);
        }

        // Parity metas record every member's inventory; scan for ours.
        let parent = prefix.parent().ok_or_else(|| "prefix has no parent".to_string())?;
        let stem = prefix
            .file_name()
            .ok_or_else(|| "prefix has no file name".to_string())?
            .to_string_lossy()
            .into_owned();
        let entries =
            fs::read_dir(parent).map_err(|e| format!("scan {}: {e}", parent.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&format!("{stem}.g")) || !name.ends_with(".parity.meta") {
                continue;
            }
            let meta: ParityMeta = read_json(&entry.path())?;
            if let Some(member) = meta.members.iter().find(|m| m.rank == rank) {
                warn!(rank, "Primary manifest lost, rebuilt inventory from parity meta");
                let set_size = meta.members.len() as u32;
                return Ok(RankManifest {
                    version: MANIFEST_VERSION,
                    rank,
                    world_size: 0,
                    encoding: SchemeEncoding::Parity { set_size },
                    failure_domain: String::new(),
                    files: member.files.clone(),
                });
            }
        }

        Err(format!("no manifest found for rank {rank}"))
    }

    /// Restore any of this rank's files that are missing or truncated.
    fn rebuild_local(prefix: &Path, rank: usize) -> std::result::Result<(), String> {
        let manifest = Self::recover_manifest(prefix, rank)?;

        let missing: Vec<usize> = manifest
            .files
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                fs::metadata(&entry.path)
                    .map(|m| m.len() != entry.size)
                    .unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        match manifest.encoding {
            SchemeEncoding::None => Err(format!(
                "rank {rank} lost {} file(s) and the scheme carries no redundancy",
                missing.len()
            )),
            SchemeEncoding::Mirror => Self::rebuild_from_copies(prefix, rank, &manifest, &missing),
            SchemeEncoding::Parity { set_size } => {
                Self::rebuild_from_parity(prefix, rank, set_size, &manifest, &missing)
            }
        }
    }

    fn rebuild_from_copies(
        prefix: &Path,
        rank: usize,
        manifest: &RankManifest,
        missing: &[usize],
    ) -> std::result::Result<(), String> {
        let dir = copy_dir(prefix, rank);
        for &i in missing {
            let entry = &manifest.files[i];
            let src = dir.join(format!("file.{i}"));
            if let Some(parent) = entry.path.parent() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            fs::copy(&src, &entry.path)
                .map_err(|e| format!("restore {}: {e}", entry.path.display()))?;
            let crc = crc32_file(&entry.path).map_err(|e| e.to_string())?;
            if crc != entry.crc32 {
                return Err(format!(
                    "restored {} fails CRC check",
                    entry.path.display()
                ));
            }
            debug!(rank, file = %entry.path.display(), "Restored file from partner copy");
        }
        Ok(())
    }

    fn rebuild_from_parity(
        prefix: &Path,
        rank: usize,
        set_size: u32,
        manifest: &RankManifest,
        missing: &[usize],
    ) -> std::result::Result<(), String> {
        let leader = group_leader(rank, set_size);
        let meta: ParityMeta = read_json(&parity_meta_path(prefix, leader))?;
        let my_idx = meta
            .members
            .iter()
            .position(|m| m.rank == rank)
            .ok_or_else(|| format!("rank {rank} not in parity group {leader}"))?;

        let shard_len = meta.shard_len as usize;
        if shard_len == 0 {
            return Err(format!("rank {rank} lost files but the group parity is empty"));
        }

        // Survivor payloads: every other member's files must be intact.
        let mut shards: Vec<Option<Vec<u8>>> = Vec::with_capacity(meta.members.len() + 1);
        for (idx, member) in meta.members.iter().enumerate() {
            if idx == my_idx {
                shards.push(None);
                continue;
            }
            let mut payload = Vec::with_capacity(member.payload_len as usize);
            for entry in &member.files {
                let bytes = fs::read(&entry.path).map_err(|e| {
                    format!(
                        "survivor {} unreadable, cannot rebuild rank {rank}: {e}",
                        entry.path.display()
                    )
                })?;
                if bytes.len() as u64 != entry.size {
                    return Err(format!(
                        "survivor {} changed size, cannot rebuild rank {rank}",
                        entry.path.display()
                    ));
                }
                payload.extend_from_slice(&bytes);
            }
            payload.resize(shard_len, 0);
            shards.push(Some(payload));
        }
        let parity = fs::read(parity_path(prefix, leader))
            .map_err(|e| format!("parity shard unreadable: {e}"))?;
        shards.push(Some(parity));

        let rs = ReedSolomon::new(meta.members.len(), 1)
            .map_err(|e| format!("parity codec: {e}"))?;
        rs.reconstruct(&mut shards)
            .map_err(|e| format!("parity reconstruct: {e}"))?;

        let mut payload = shards[my_idx].take().expect("reconstructed shard present");
        payload.truncate(meta.members[my_idx].payload_len as usize);

        // Slice the payload back into files at their recorded offsets.
        let mut offset = 0usize;
        for (i, entry) in manifest.files.iter().enumerate() {
            let end = offset + entry.size as usize;
            if missing.contains(&i) {
                if let Some(parent) = entry.path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(&entry.path, &payload[offset..end])
                    .map_err(|e| format!("restore {}: {e}", entry.path.display()))?;
                if crc32_bytes(&payload[offset..end]) != entry.crc32 {
                    return Err(format!(
                        "restored {} fails CRC check",
                        entry.path.display()
                    ));
                }
                debug!(rank, file = %entry.path.display(), "Restored file from group parity");
            }
            offset = end;
        }
        Ok(())
    }
}

// =============================================================================
// Remove
// =============================================================================

impl LocalErasure {
    /// Delete this rank's redundancy artifacts, leaving checkpoint files.
    fn remove_local(prefix: &Path, rank: usize) -> std::result::Result<(), String> {
        let manifest: Option<RankManifest> = {
            let path = manifest_path(prefix, rank);
            if path.exists() {
                Some(read_json(&path)?)
            } else {
                None
            }
        };

        let mut first_err = None;
        let mut remove = |path: PathBuf, is_dir: bool| {
            let res = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = res {
                if e.kind() != std::io::ErrorKind::NotFound && first_err.is_none() {
                    first_err = Some(format!("remove {}: {e}", path.display()));
                }
            }
        };

        remove(manifest_path(prefix, rank), false);
        remove(copy_dir(prefix, rank), true);
        if let Some(RankManifest {
            encoding: SchemeEncoding::Parity { set_size },
            ..
        }) = manifest
        {
            if group_leader(rank, set_size) == rank {
                remove(parity_path(prefix, rank), false);
                remove(parity_meta_path(prefix, rank), false);
            }
        }

        match first_err {
            None => Ok(()),
            Some(msg) => Err(msg),
        }
    }
}

// =============================================================================
// ErasureLib Implementation
// =============================================================================

fn direction_error(direction: Direction, msg: &str) -> Error {
    match direction {
        Direction::Encode => Error::EncodeFailed(msg.to_string()),
        Direction::Rebuild => Error::RebuildFailed(msg.to_string()),
        Direction::Remove => Error::RemoveFailed(msg.to_string()),
    }
}

impl ErasureLib for LocalErasure {
    fn create_scheme(
        &self,
        _world: &CommRef,
        failure_domain: &str,
        encoding: SchemeEncoding,
    ) -> Result<SchemeId> {
        if let SchemeEncoding::Parity { set_size } = encoding {
            if set_size == 0 {
                return Err(Error::SchemeBuildFailed(
                    "parity set size must be at least 1".into(),
                ));
            }
        }
        let id = self.next_scheme.fetch_add(1, Ordering::Relaxed);
        self.schemes.insert(
            id,
            SchemeState {
                encoding,
                failure_domain: failure_domain.to_string(),
            },
        );
        Ok(SchemeId(id))
    }

    fn free_scheme(&self, scheme: SchemeId) -> Result<()> {
        self.schemes
            .remove(&scheme.0)
            .map(|_| ())
            .ok_or_else(|| Error::Internal(format!("unknown or already freed scheme {}", scheme.0)))
    }

    fn create_set(
        &self,
        world: &CommRef,
        _store_comm: &CommRef,
        prefix: &Path,
        direction: Direction,
        scheme: Option<SchemeId>,
    ) -> Result<SetId> {
        let (encoding, failure_domain) = match (direction, scheme) {
            (Direction::Encode, Some(id)) => {
                let scheme = self.schemes.get(&id.0).ok_or_else(|| {
                    Error::Internal(format!("unknown scheme {} for encode set", id.0))
                })?;
                (Some(scheme.encoding), scheme.failure_domain.clone())
            }
            (Direction::Encode, None) => {
                return Err(Error::EncodeFailed(
                    "encode set requires a built scheme".into(),
                ))
            }
            _ => (None, String::new()),
        };

        let id = self.next_set.fetch_add(1, Ordering::Relaxed);
        self.sets.insert(
            id,
            SetState {
                world: CommRef::clone(world),
                prefix: prefix.to_path_buf(),
                direction,
                encoding,
                failure_domain,
                files: Vec::new(),
                status: None,
            },
        );
        Ok(SetId(id))
    }

    fn add_file(&self, set: SetId, file: &Path) -> Result<()> {
        let mut state = self
            .sets
            .get_mut(&set.0)
            .ok_or_else(|| Error::Internal(format!("unknown set {}", set.0)))?;
        if !file.is_absolute() {
            return Err(Error::FileInvalid {
                path: file.display().to_string(),
                reason: "erasure set paths must be absolute".into(),
            });
        }
        state.files.push(file.to_path_buf());
        Ok(())
    }

    fn dispatch(&self, set: SetId) -> Result<()> {
        // Copy out what dispatch needs so the map entry is not held across
        // the collective calls below.
        let (world, prefix, direction, encoding, failure_domain, files) = {
            let state = self
                .sets
                .get(&set.0)
                .ok_or_else(|| Error::Internal(format!("unknown set {}", set.0)))?;
            (
                CommRef::clone(&state.world),
                state.prefix.clone(),
                state.direction,
                state.encoding,
                state.failure_domain.clone(),
                state.files.clone(),
            )
        };

        let rank = world.rank();
        let world_size = world.size();

        // Every rank runs the same barrier schedule for a given direction
        // and encoding, even when its local step failed.
        let local = match direction {
            Direction::Encode => {
                let encoding = encoding.expect("encode set carries an encoding");
                let res = Self::encode_local(
                    &prefix,
                    rank,
                    world_size,
                    encoding,
                    &failure_domain,
                    &files,
                );
                world.barrier()?;
                if let SchemeEncoding::Parity { set_size } = encoding {
                    let parity = if res.is_ok() && group_leader(rank, set_size) == rank {
                        Self::encode_parity(&prefix, rank, set_size, world_size)
                    } else {
                        Ok(())
                    };
                    world.barrier()?;
                    res.and(parity)
                } else {
                    res
                }
            }
            Direction::Rebuild => {
                let res = Self::rebuild_local(&prefix, rank);
                world.barrier()?;
                res
            }
            Direction::Remove => {
                let res = Self::remove_local(&prefix, rank);
                world.barrier()?;
                res
            }
        };

        let out = local
            .as_ref()
            .map(|_| ())
            .map_err(|msg| direction_error(direction, msg));
        if let Some(mut state) = self.sets.get_mut(&set.0) {
            state.status = Some(local);
        }
        out
    }

    fn wait(&self, set: SetId) -> Result<()> {
        let state = self
            .sets
            .get(&set.0)
            .ok_or_else(|| Error::Internal(format!("unknown set {}", set.0)))?;
        match &state.status {
            Some(Ok(())) => Ok(()),
            Some(Err(msg)) => Err(direction_error(state.direction, msg)),
            None => Err(Error::Internal("wait called before dispatch".into())),
        }
    }

    fn free_set(&self, set: SetId) -> Result<()> {
        self.sets
            .remove(&set.0)
            .map(|_| ())
            .ok_or_else(|| Error::Internal(format!("unknown or already freed set {}", set.0)))
    }
}

// =============================================================================
// Tests
// =============================================================================
