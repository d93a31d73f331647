//! Redundancy Descriptor Subsystem
//!
//! The runtime machine that turns a job's redundancy configuration into
//! erasure-protected checkpoints:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Redundancy Subsystem                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   ConfigTree ──▶ builder ──▶ DescriptorTable                     │
//! │                    (collective, per entry)                       │
//! │                                                                  │
//! │   checkpoint id ──▶ select ──▶ RedundancyDescriptor              │
//! │                                      │                           │
//! │            ┌─────────────────────────┼─────────────┐             │
//! │            ▼                         ▼             ▼             │
//! │        apply (encode)         recover (rebuild)  unapply         │
//! │            │                         │           (remove)        │
//! │            └────────── ErasureLib ───┴─────────────┘             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every public operation here is collective: all ranks enter it together
//! and leave with the same result.

pub mod builder;
pub mod descriptor;
pub mod encode;
pub mod recover;
pub mod scheme;
pub mod table;

#[cfg(test)]
mod proptest;

pub use descriptor::RedundancyDescriptor;
pub use encode::{apply, ApplyOutcome};
pub use recover::{recover, unapply};
pub use scheme::CopyScheme;
pub use table::DescriptorTable;

// =============================================================================
// Configuration Keys
// =============================================================================

/// Descriptor on/off switch.
pub const KEY_ENABLED: &str = "ENABLED";
/// Eligibility modulus.
pub const KEY_INTERVAL: &str = "INTERVAL";
/// Output-permitted flag.
pub const KEY_OUTPUT: &str = "OUTPUT";
/// Storage tier path.
pub const KEY_STORE: &str = "STORE";
/// Derived cache directory (serialization only).
pub const KEY_DIRECTORY: &str = "DIRECTORY";
/// Copy scheme token.
pub const KEY_TYPE: &str = "TYPE";
/// XOR group size.
pub const KEY_SET_SIZE: &str = "SET_SIZE";
/// Failure domain name.
pub const KEY_GROUP: &str = "GROUP";
