//! redstor - Redundancy-Encoding Core for Scalable Checkpoint/Restart
//!
//! Tightly-coupled parallel jobs periodically snapshot their state to fast
//! node-local storage. This crate encodes those snapshots into a
//! fault-tolerant representation so a lost node can be rebuilt from its
//! peers without touching the parallel file system.
//!
//! # Architecture
//!
//! ```text
//! configuration ──▶ collective builder ──▶ DescriptorTable
//!                                           │ select(id)
//!                                           ▼
//! (id, Filemap) ──▶ apply ──▶ erasure artifacts in the hidden cache dir
//! restart dir   ──▶ recover ──▶ rebuilt files
//! cleanup       ──▶ unapply ──▶ artifacts removed
//! ```
//!
//! Every public operation is collective over the job's world communicator
//! and finishes with global agreement: all ranks succeed, or all ranks see
//! the failure.
//!
//! # Modules
//!
//! - [`cache`] - Checkpoint cache path layout
//! - [`collective`] - Cross-rank helper primitives
//! - [`comm`] - Communicator port and the in-process implementation
//! - [`config`] - Hierarchical configuration tree
//! - [`context`] - Immutable per-job context
//! - [`erasure`] - Erasure library port and the bundled file-based adapter
//! - [`error`] - Error types
//! - [`filemap`] - Per-rank checkpoint file inventory
//! - [`group`] - Failure group registry
//! - [`redundancy`] - Descriptors, table, and the encode/decode pipelines
//! - [`store`] - Storage tier registry
//! - [`transfer`] - Rank-0 transfer log

pub mod cache;
pub mod collective;
pub mod comm;
pub mod config;
pub mod context;
pub mod erasure;
pub mod error;
pub mod filemap;
pub mod group;
pub mod redundancy;
pub mod store;
pub mod transfer;

// Re-export commonly used types
pub use comm::{CommRef, Communicator, LocalComm};
pub use config::ConfigTree;
pub use context::{JobContext, JobSettings};
pub use erasure::{Direction, ErasureLib, ErasureRef, LocalErasure, SchemeEncoding};
pub use error::{Error, Result};
pub use filemap::{FileMeta, Filemap};
pub use group::{GroupDescriptor, GroupRegistry, NODE_GROUP};
pub use redundancy::{
    apply, recover, unapply, ApplyOutcome, CopyScheme, DescriptorTable, RedundancyDescriptor,
};
pub use store::{StoreDescriptor, StoreRegistry};
pub use transfer::{TransferLog, TransferRecord};
