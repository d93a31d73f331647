//! Property-Based Tests for the Redundancy Subsystem
//!
//! Uses proptest to verify the descriptor machinery across a wide range of
//! configurations.
//!
//! # Test Properties
//!
//! 1. **Selection Maximality**: `select(id)` returns the enabled entry with
//!    the largest interval dividing `id`, or none
//! 2. **Tie Stability**: equal winning intervals resolve to the earliest
//!    table entry
//! 3. **Parser Totality**: any casing of the three tokens parses; the
//!    canonical serialization is uppercase
//! 4. **Order Determinism**: table layout depends only on entry names,
//!    never on construction order

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use crate::comm::local::LocalComm;
use crate::comm::CommRef;
use crate::config::ConfigTree;
use crate::context::JobContext;
use crate::erasure::LocalErasure;
use crate::group::{GroupDescriptor, NODE_GROUP};
use crate::redundancy::{
    CopyScheme, DescriptorTable, KEY_ENABLED, KEY_INTERVAL, KEY_STORE,
};
use crate::store::StoreDescriptor;

// =============================================================================
// Strategies
// =============================================================================

/// A descriptor entry: (interval, enabled).
fn entry_strategy() -> impl Strategy<Value = (u64, bool)> {
    (1u64..=12, any::<bool>())
}

/// A small table of descriptor entries.
fn table_strategy() -> impl Strategy<Value = Vec<(u64, bool)>> {
    prop::collection::vec(entry_strategy(), 0..6)
}

/// Mixed-case rendering of a copy scheme token.
fn mixed_case_token() -> impl Strategy<Value = String> {
    ("SINGLE|PARTNER|XOR", any::<u32>()).prop_map(|(token, seed)| {
        token
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if (seed >> (i % 32)) & 1 == 1 {
                    c.to_ascii_lowercase()
                } else {
                    c
                }
            })
            .collect()
    })
}

// =============================================================================
// Harness
// =============================================================================

fn solo_context() -> JobContext {
    let world: CommRef = LocalComm::world(1).remove(0);
    let mut ctx = JobContext::new(
        CommRef::clone(&world),
        "prop",
        "1",
        Arc::new(LocalErasure::new()),
    );
    ctx.stores
        .register(StoreDescriptor::new("/dev/shm", CommRef::clone(&world)));
    ctx.groups.register(GroupDescriptor::new(NODE_GROUP, world));
    ctx
}

fn table_config(entries: &[(u64, bool)]) -> ConfigTree {
    let mut cfg = ConfigTree::new();
    for (i, (interval, enabled)) in entries.iter().enumerate() {
        let mut tree = ConfigTree::new();
        tree.set(KEY_STORE, "/dev/shm");
        tree.set(KEY_INTERVAL, interval.to_string());
        tree.set(KEY_ENABLED, if *enabled { "1" } else { "0" });
        cfg.set_subtree(format!("D{i:02}"), tree);
    }
    cfg
}

/// Reference model of selection: first index among the enabled entries
/// holding the maximum interval that divides `id`.
fn model_select(entries: &[(u64, bool)], id: u64) -> Option<usize> {
    let best = entries
        .iter()
        .filter(|(interval, enabled)| *enabled && id % interval == 0)
        .map(|(interval, _)| *interval)
        .max()?;
    entries
        .iter()
        .position(|(interval, enabled)| *enabled && *interval == best && id % interval == 0)
}

// =============================================================================
// Selection Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: selection matches the maximal-divisor model, including
    /// first-entry tie resolution.
    #[test]
    fn prop_selection_matches_model(
        entries in table_strategy(),
        id in 1u64..=1000,
    ) {
        let ctx = solo_context();
        let table = DescriptorTable::build(&ctx, &table_config(&entries)).unwrap();

        match (table.select(id), model_select(&entries, id)) {
            (None, None) => {}
            (Some(desc), Some(index)) => {
                prop_assert_eq!(desc.index, index);
                prop_assert_eq!(desc.interval, entries[index].0);
            }
            (got, want) => {
                prop_assert!(false, "selection mismatch: got {:?}, want {:?}",
                    got.map(|d| d.index), want);
            }
        }
    }

    /// Property: a selected descriptor's interval always divides the id.
    #[test]
    fn prop_selected_interval_divides_id(
        entries in table_strategy(),
        id in 1u64..=1000,
    ) {
        let ctx = solo_context();
        let table = DescriptorTable::build(&ctx, &table_config(&entries)).unwrap();

        if let Some(desc) = table.select(id) {
            prop_assert!(desc.enabled);
            prop_assert_eq!(id % desc.interval, 0);
        }
    }
}

// =============================================================================
// Parser Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: every casing of a valid token parses, and the canonical
    /// serialization is the uppercase token.
    #[test]
    fn prop_parse_any_casing(token in mixed_case_token(), set_size in 1u32..=16) {
        let scheme = CopyScheme::parse(&token, set_size).unwrap();
        prop_assert_eq!(scheme.token(), token.to_ascii_uppercase());
        if let CopyScheme::Xor { set_size: s } = scheme {
            prop_assert_eq!(s, set_size);
        }
    }

    /// Property: tokens that are not SINGLE/PARTNER/XOR never parse.
    #[test]
    fn prop_unknown_tokens_rejected(token in "[A-Za-z0-9]{1,12}") {
        let known = ["SINGLE", "PARTNER", "XOR"]
            .contains(&token.to_ascii_uppercase().as_str());
        prop_assert_eq!(CopyScheme::parse(&token, 4).is_ok(), known);
    }
}

// =============================================================================
// Determinism Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: building twice from the same configuration yields
    /// descriptors at identical indices with identical settings.
    #[test]
    fn prop_table_build_deterministic(entries in table_strategy()) {
        let ctx = solo_context();
        let cfg = table_config(&entries);

        let first = DescriptorTable::build(&ctx, &cfg).unwrap();
        let second = DescriptorTable::build(&ctx, &cfg).unwrap();

        prop_assert_eq!(first.len(), second.len());
        for i in 0..first.len() {
            let a = first.get(i).unwrap();
            let b = second.get(i).unwrap();
            prop_assert_eq!(a.index, b.index);
            prop_assert_eq!(a.interval, b.interval);
            prop_assert_eq!(a.enabled, b.enabled);
        }
    }
}
