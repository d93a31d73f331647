//! Job Context
//!
//! The immutable bundle of job-wide state the redundancy core operates
//! against: the world communicator, the store and failure-group registries,
//! the erasure library, and the global defaults descriptors fall back to.
//! Construct once at job start and share read-only; nothing here mutates
//! during encode.

use std::path::PathBuf;

use crate::comm::CommRef;
use crate::erasure::ErasureRef;
use crate::group::{GroupRegistry, NODE_GROUP};
use crate::redundancy::CopyScheme;
use crate::store::StoreRegistry;
use crate::transfer::TransferLog;

/// Default XOR set size when neither the descriptor nor the job sets one.
pub const DEFAULT_SET_SIZE: u32 = 8;

/// Global defaults applied when a descriptor's configuration is silent.
pub struct JobSettings {
    /// Default cache base directory (the default STORE)
    pub cache_base: PathBuf,

    /// Default copy type
    pub copy_type: CopyScheme,

    /// Default XOR set size
    pub set_size: u32,

    /// Default failure group name
    pub group: String,

    /// Whether the encode pipeline computes CRCs into the filemap
    pub crc_on_copy: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            cache_base: PathBuf::from("/tmp"),
            copy_type: CopyScheme::Xor {
                set_size: DEFAULT_SET_SIZE,
            },
            set_size: DEFAULT_SET_SIZE,
            group: NODE_GROUP.to_string(),
            crc_on_copy: false,
        }
    }
}

/// Immutable job-wide state shared by the builder and the pipelines.
pub struct JobContext {
    /// The world communicator joining every rank of the job
    pub world: CommRef,

    /// User owning the job, used in cache directory derivation
    pub username: String,

    /// Resource-manager job id, used in cache directory derivation
    pub jobid: String,

    /// Storage tiers available for caching
    pub stores: StoreRegistry,

    /// Named failure domains
    pub groups: GroupRegistry,

    /// The erasure library
    pub erasure: ErasureRef,

    /// Global defaults
    pub settings: JobSettings,

    /// Optional rank-0 transfer log sink
    pub transfer_log: Option<TransferLog>,
}

impl JobContext {
    /// Create a context with empty registries and default settings.
    pub fn new(
        world: CommRef,
        username: impl Into<String>,
        jobid: impl Into<String>,
        erasure: ErasureRef,
    ) -> Self {
        Self {
            world,
            username: username.into(),
            jobid: jobid.into(),
            stores: StoreRegistry::new(),
            groups: GroupRegistry::new(),
            erasure,
            settings: JobSettings::default(),
            transfer_log: None,
        }
    }

    /// This process's world rank.
    pub fn rank(&self) -> usize {
        self.world.rank()
    }

    /// Number of ranks in the job.
    pub fn size(&self) -> usize {
        self.world.size()
    }

    /// Whether this rank is the job leader (world rank 0). The leader is
    /// the only rank that emits per-event warnings and transfer records.
    pub fn is_leader(&self) -> bool {
        self.world.rank() == 0
    }
}
