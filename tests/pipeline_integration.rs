//! Pipeline Integration Tests
//!
//! End-to-end multi-rank scenarios: worlds of spawned threads over the
//! in-process communicator, with checkpoint files on tempfile-backed
//! stores.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use redstor::cache::{dataset_dir, hidden_dir};
use redstor::redundancy::{KEY_INTERVAL, KEY_SET_SIZE, KEY_STORE, KEY_TYPE};
use redstor::{
    apply, recover, unapply, CommRef, ConfigTree, CopyScheme, DescriptorTable, Filemap,
    GroupDescriptor, JobContext, LocalComm, LocalErasure, StoreDescriptor, TransferLog,
    NODE_GROUP,
};

// =============================================================================
// Harness
// =============================================================================

/// Route core tracing output through the test harness when RUST_LOG asks
/// for it.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `f` on every rank of a fresh world, returning per-rank results.
fn run_ranks<T: Send + 'static>(
    size: usize,
    f: impl Fn(usize, CommRef) -> T + Send + Sync + 'static,
) -> Vec<T> {
    init_tracing();
    let f = Arc::new(f);
    LocalComm::world(size)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let comm: CommRef = comm;
                f(rank, comm)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect()
}

/// Build a per-rank job context: one store at `store_base`, a NODE group
/// splitting the world into `nodes` equal nodes.
fn make_ctx(world: CommRef, store_base: &Path, nodes: usize) -> JobContext {
    let ranks_per_node = world.size() / nodes;
    let node = world.rank() / ranks_per_node;
    let node_comm = world.split(node as u64).unwrap();

    let mut ctx = JobContext::new(
        CommRef::clone(&world),
        "alice",
        "4242",
        Arc::new(LocalErasure::new()),
    );
    ctx.settings.cache_base = store_base.to_path_buf();
    ctx.stores
        .register(StoreDescriptor::new(store_base, CommRef::clone(&node_comm)));
    ctx.groups.register(GroupDescriptor::new(NODE_GROUP, node_comm));
    ctx
}

/// One-entry table configuration.
fn single_entry_config(entry: ConfigTree) -> ConfigTree {
    let mut cfg = ConfigTree::new();
    cfg.set_subtree("CKPT", entry);
    cfg
}

fn xor_entry(store: &Path, set_size: u32) -> ConfigTree {
    let mut entry = ConfigTree::new();
    entry.set(KEY_STORE, store.display().to_string());
    entry.set(KEY_TYPE, "xor");
    entry.set(KEY_SET_SIZE, set_size.to_string());
    entry.set(KEY_INTERVAL, "1");
    entry
}

/// Write this rank's checkpoint file into the dataset directory and
/// register it in a fresh filemap.
fn write_checkpoint(dir: &Path, rank: usize, contents: &[u8]) -> (PathBuf, Filemap) {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("rank_{rank}.ckpt"));
    fs::write(&path, contents).unwrap();
    let mut map = Filemap::new();
    map.add_file(&path).unwrap();
    (path, map)
}

/// Names of erasure artifacts (under the `reddesc` prefix) in a hidden dir.
fn redundancy_artifacts(hidden: &Path) -> Vec<String> {
    match fs::read_dir(hidden) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("reddesc"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Encode Scenarios
// =============================================================================

#[test]
fn test_xor_apply_eight_ranks_two_nodes() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();
    let log_path = base.join("transfer.jsonl");
    let log_for_ranks = log_path.clone();

    let results = run_ranks(8, move |rank, world| {
        let mut ctx = make_ctx(world, &base, 2);
        if rank == 0 {
            ctx.transfer_log = Some(TransferLog::open(&log_for_ranks).unwrap());
        }

        let cfg = single_entry_config(xor_entry(&base, 4));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();

        let desc = table.select(7).expect("descriptor eligible for id 7");
        assert!(desc.enabled);
        assert_eq!(desc.copy_type, CopyScheme::Xor { set_size: 4 });

        let dataset = dataset_dir(&desc.directory, 7);
        let (_, mut map) = write_checkpoint(&dataset, rank, &vec![rank as u8; 1 << 20]);

        let outcome = apply(&ctx, &mut map, desc, 7).unwrap();
        (outcome.bytes, hidden_dir(&desc.directory, 7))
    });

    for (bytes, hidden) in &results {
        assert_eq!(*bytes, 8.0 * 1_048_576.0);
        let artifacts = redundancy_artifacts(hidden);
        assert!(
            artifacts.iter().any(|n| n.contains("manifest")),
            "expected erasure artifacts under the reddesc prefix, found {artifacts:?}"
        );
    }

    let log = fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.lines().count(), 1, "one COPY record from rank 0");
    assert!(log.contains("\"COPY\""));
}

#[test]
fn test_single_node_job_forces_single() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(4, move |_rank, world| {
        let ctx = make_ctx(world, &base, 1);

        let mut entry = ConfigTree::new();
        entry.set(KEY_STORE, base.display().to_string());
        entry.set(KEY_TYPE, "PARTNER");
        let table = DescriptorTable::build(&ctx, &single_entry_config(entry)).unwrap();

        let desc = table.get(0).unwrap();
        (desc.enabled, desc.copy_type)
    });

    for (enabled, copy_type) in results {
        assert!(enabled);
        assert_eq!(copy_type, CopyScheme::Single);
    }
}

#[test]
fn test_unknown_store_disables_on_every_rank() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(4, move |_rank, world| {
        let ctx = make_ctx(world, &base, 2);

        let mut entry = ConfigTree::new();
        entry.set(KEY_STORE, "/no/such/path");
        let table = DescriptorTable::build(&ctx, &single_entry_config(entry)).unwrap();

        let desc = table.get(0).unwrap();
        (desc.enabled, desc.scheme_id().is_some())
    });

    for (enabled, has_scheme) in results {
        assert!(!enabled, "unknown store disables the descriptor everywhere");
        assert!(!has_scheme, "no erasure scheme is allocated");
    }
}

#[test]
fn test_selection_is_identical_across_ranks() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(4, move |_rank, world| {
        let ctx = make_ctx(world, &base, 2);

        let mut every_2 = ConfigTree::new();
        every_2.set(KEY_STORE, base.display().to_string());
        every_2.set(KEY_INTERVAL, "2");
        let mut every_6 = ConfigTree::new();
        every_6.set(KEY_STORE, base.display().to_string());
        every_6.set(KEY_INTERVAL, "6");

        let mut cfg = ConfigTree::new();
        cfg.set_subtree("A", every_2);
        cfg.set_subtree("B", every_6);
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();

        (
            table.select(12).map(|d| d.interval),
            table.select(4).map(|d| d.interval),
            table.select(7).map(|d| d.interval),
        )
    });

    for (at_12, at_4, at_7) in results {
        assert_eq!(at_12, Some(6), "interval 6 beats 2 for id 12");
        assert_eq!(at_4, Some(2));
        assert_eq!(at_7, None);
    }
}

#[test]
fn test_invalid_file_on_one_rank_blocks_dispatch() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(8, move |rank, world| {
        let ctx = make_ctx(world, &base, 2);
        let cfg = single_entry_config(xor_entry(&base, 4));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();
        let desc = table.select(3).unwrap();

        let dataset = dataset_dir(&desc.directory, 3);
        let (path, mut map) = write_checkpoint(&dataset, rank, &[42u8; 4096]);
        if rank == 5 {
            map.mark_incomplete(&path);
        }

        let result = apply(&ctx, &mut map, desc, 3);
        (result.is_err(), hidden_dir(&desc.directory, 3))
    });

    for (failed, hidden) in results {
        assert!(failed, "apply reports failure on every rank");
        assert!(
            redundancy_artifacts(&hidden).is_empty(),
            "no rank dispatched, so no erasure artifacts exist"
        );
    }
}

// =============================================================================
// Recover Scenarios
// =============================================================================

#[test]
fn test_xor_recover_round_trip() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(8, move |rank, world| {
        let mut ctx = make_ctx(world, &base, 2);
        ctx.settings.crc_on_copy = true;

        let cfg = single_entry_config(xor_entry(&base, 4));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();
        let desc = table.select(5).unwrap();

        let dataset = dataset_dir(&desc.directory, 5);
        let contents: Vec<u8> = (0..1 << 16)
            .map(|i| (i as u8).wrapping_add(rank as u8))
            .collect();
        let (path, mut map) = write_checkpoint(&dataset, rank, &contents);

        apply(&ctx, &mut map, desc, 5).unwrap();
        let recorded_crc = map.meta(&path).unwrap().crc32.expect("crc_on_copy recorded");
        let hidden = hidden_dir(&desc.directory, 5);

        // Rank 3 loses its checkpoint file between encode and restart.
        ctx.world.barrier().unwrap();
        if rank == 3 {
            fs::remove_file(&path).unwrap();
        }
        ctx.world.barrier().unwrap();

        recover(&ctx, &hidden).unwrap();

        let restored = fs::read(&path).unwrap();
        let mut check = Filemap::new();
        check.add_file(&path).unwrap();
        let restored_crc = check.compute_crc(&path).unwrap();

        (restored == contents, restored_crc == recorded_crc)
    });

    for (restored_ok, crc_ok) in results {
        assert!(restored_ok, "lost file restored byte-for-byte");
        assert!(crc_ok, "restored file matches the CRC recorded at encode");
    }
}

#[test]
fn test_partner_recover_round_trip() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(4, move |rank, world| {
        let ctx = make_ctx(world, &base, 2);

        let mut entry = ConfigTree::new();
        entry.set(KEY_STORE, base.display().to_string());
        entry.set(KEY_TYPE, "partner");
        let table = DescriptorTable::build(&ctx, &single_entry_config(entry)).unwrap();
        let desc = table.select(1).unwrap();
        assert_eq!(desc.copy_type, CopyScheme::Partner);

        let dataset = dataset_dir(&desc.directory, 1);
        let contents = vec![rank as u8 ^ 0x5A; 8192];
        let (path, mut map) = write_checkpoint(&dataset, rank, &contents);

        apply(&ctx, &mut map, desc, 1).unwrap();

        ctx.world.barrier().unwrap();
        if rank == 1 {
            fs::remove_file(&path).unwrap();
        }
        ctx.world.barrier().unwrap();

        recover(&ctx, &hidden_dir(&desc.directory, 1)).unwrap();
        fs::read(&path).unwrap() == contents
    });

    for restored_ok in results {
        assert!(restored_ok);
    }
}

#[test]
fn test_unapply_removes_artifacts_and_keeps_files() {
    let store = TempDir::new().unwrap();
    let base = store.path().to_path_buf();

    let results = run_ranks(4, move |rank, world| {
        let ctx = make_ctx(world, &base, 2);
        let cfg = single_entry_config(xor_entry(&base, 2));
        let table = DescriptorTable::build(&ctx, &cfg).unwrap();
        let desc = table.select(9).unwrap();

        let dataset = dataset_dir(&desc.directory, 9);
        let (path, mut map) = write_checkpoint(&dataset, rank, &[7u8; 2048]);
        apply(&ctx, &mut map, desc, 9).unwrap();

        let hidden = hidden_dir(&desc.directory, 9);
        assert!(!redundancy_artifacts(&hidden).is_empty());

        unapply(&ctx, &hidden).unwrap();
        (path, hidden)
    });

    for (path, hidden) in results {
        assert!(path.exists(), "checkpoint files survive unapply");
        assert!(
            redundancy_artifacts(&hidden).is_empty(),
            "unapply deletes the erasure artifacts"
        );
    }
}
