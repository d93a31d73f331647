//! In-Process Communicator
//!
//! A [`Communicator`] implementation for ranks running as threads of one
//! process. Each collective is a generation-numbered slot in a shared table:
//! members fold their contribution under the lock, the last arrival
//! finalizes the slot and wakes the waiters, and the last reader retires
//! the slot. Ranks may race ahead into later collectives while stragglers
//! drain earlier ones, so slots are keyed by sequence number rather than
//! double-buffered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::comm::{CommRef, Communicator};
use crate::error::Result;

// =============================================================================
// Shared Collective State
// =============================================================================

/// One in-flight collective.
struct Slot {
    op: Op,
    arrived: usize,
    read: usize,
    done: bool,
}

/// Per-kind accumulator state.
enum Op {
    And {
        acc: bool,
    },
    Sum {
        acc: f64,
    },
    Bcast {
        payload: Option<Arc<Vec<u8>>>,
    },
    Barrier,
    Split {
        /// (parent rank, color) for every arrived member
        members: Vec<(usize, u64)>,
        /// One shared group per color, created by the finalizing rank
        groups: HashMap<u64, Arc<Shared>>,
    },
}

impl Op {
    fn kind(&self) -> &'static str {
        match self {
            Op::And { .. } => "and",
            Op::Sum { .. } => "sum",
            Op::Bcast { .. } => "bcast",
            Op::Barrier => "barrier",
            Op::Split { .. } => "split",
        }
    }
}

/// State shared by every member of one communicator.
struct Shared {
    size: usize,
    slots: Mutex<HashMap<u64, Slot>>,
    cv: Condvar,
}

impl Shared {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            slots: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        })
    }
}

// =============================================================================
// LocalComm
// =============================================================================

/// In-process communicator handle for a single rank.
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
    /// Position in this rank's collective call sequence. All members issue
    /// collectives in the same order, so equal sequence numbers meet in the
    /// same slot.
    seq: AtomicU64,
}

impl LocalComm {
    /// Create a world of `size` ranks, returning one handle per rank.
    pub fn world(size: usize) -> Vec<Arc<LocalComm>> {
        assert!(size > 0, "world must have at least one rank");
        let shared = Shared::new(size);
        (0..size)
            .map(|rank| {
                Arc::new(LocalComm {
                    shared: Arc::clone(&shared),
                    rank,
                    seq: AtomicU64::new(0),
                })
            })
            .collect()
    }

    /// Run one collective: fold this rank's contribution into the slot,
    /// finalize when last to arrive, then extract the agreed result.
    fn collective<T>(
        &self,
        kind: &'static str,
        make: impl FnOnce() -> Op,
        fold: impl FnOnce(&mut Op),
        finalize: impl FnOnce(&mut Op),
        extract: impl FnOnce(&Op, usize) -> T,
    ) -> T {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.shared.slots.lock();

        {
            let slot = slots.entry(seq).or_insert_with(|| Slot {
                op: make(),
                arrived: 0,
                read: 0,
                done: false,
            });
            // Members issuing different collectives at the same sequence
            // point is a protocol violation.
            debug_assert_eq!(slot.op.kind(), kind, "collective sequence mismatch");
            fold(&mut slot.op);
            slot.arrived += 1;
            if slot.arrived == self.shared.size {
                finalize(&mut slot.op);
                slot.done = true;
                self.shared.cv.notify_all();
            }
        }

        while !slots.get(&seq).map(|s| s.done).unwrap_or(false) {
            self.shared.cv.wait(&mut slots);
        }

        let slot = slots.get_mut(&seq).expect("slot retired before read");
        let out = extract(&slot.op, self.rank);
        slot.read += 1;
        if slot.read == self.shared.size {
            slots.remove(&seq);
        }
        out
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_and(&self, value: bool) -> Result<bool> {
        Ok(self.collective(
            "and",
            || Op::And { acc: true },
            |op| {
                if let Op::And { acc } = op {
                    *acc &= value;
                }
            },
            |_| {},
            |op, _| match op {
                Op::And { acc } => *acc,
                _ => unreachable!("collective kind mismatch"),
            },
        ))
    }

    fn sum_f64(&self, value: f64) -> Result<f64> {
        Ok(self.collective(
            "sum",
            || Op::Sum { acc: 0.0 },
            |op| {
                if let Op::Sum { acc } = op {
                    *acc += value;
                }
            },
            |_| {},
            |op, _| match op {
                Op::Sum { acc } => *acc,
                _ => unreachable!("collective kind mismatch"),
            },
        ))
    }

    fn broadcast(&self, payload: Option<Vec<u8>>, root: usize) -> Result<Vec<u8>> {
        let contribute = if self.rank == root {
            payload.map(Arc::new)
        } else {
            None
        };
        Ok(self.collective(
            "bcast",
            || Op::Bcast { payload: None },
            |op| {
                if let Op::Bcast { payload } = op {
                    if let Some(bytes) = contribute {
                        *payload = Some(bytes);
                    }
                }
            },
            |_| {},
            |op, _| match op {
                Op::Bcast { payload } => payload
                    .as_ref()
                    .map(|b| b.as_ref().clone())
                    .expect("broadcast root supplied no payload"),
                _ => unreachable!("collective kind mismatch"),
            },
        ))
    }

    fn barrier(&self) -> Result<()> {
        self.collective("barrier", || Op::Barrier, |_| {}, |_| {}, |_, _| ());
        Ok(())
    }

    fn split(&self, color: u64) -> Result<CommRef> {
        let my_rank = self.rank;
        let (group, sub_rank) = self.collective(
            "split",
            || Op::Split {
                members: Vec::new(),
                groups: HashMap::new(),
            },
            |op| {
                if let Op::Split { members, .. } = op {
                    members.push((my_rank, color));
                }
            },
            |op| {
                if let Op::Split { members, groups } = op {
                    members.sort_unstable();
                    for &(_, c) in members.iter() {
                        let count = members.iter().filter(|&&(_, mc)| mc == c).count();
                        groups.entry(c).or_insert_with(|| Shared::new(count));
                    }
                }
            },
            |op, rank| match op {
                Op::Split { members, groups } => {
                    let sub_rank = members
                        .iter()
                        .filter(|&&(r, c)| c == color && r < rank)
                        .count();
                    (Arc::clone(&groups[&color]), sub_rank)
                }
                _ => unreachable!("collective kind mismatch"),
            },
        );
        Ok(Arc::new(LocalComm {
            shared: group,
            rank: sub_rank,
            seq: AtomicU64::new(0),
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Run `f` on every rank of a fresh world, returning per-rank results.
    fn run_world<T: Send + 'static>(
        size: usize,
        f: impl Fn(Arc<LocalComm>) -> T + Send + Sync + 'static,
    ) -> Vec<T> {
        let comms = LocalComm::world(size);
        let f = Arc::new(f);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = Arc::clone(&f);
                thread::spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_world_ranks() {
        let comms = LocalComm::world(4);
        assert_eq!(comms.len(), 4);
        for (i, comm) in comms.iter().enumerate() {
            assert_eq!(comm.rank(), i);
            assert_eq!(comm.size(), 4);
        }
    }

    #[test]
    fn test_all_and() {
        let results = run_world(4, |comm| {
            let unanimous = comm.all_and(true).unwrap();
            let dissent = comm.all_and(comm.rank() != 2).unwrap();
            (unanimous, dissent)
        });
        for (unanimous, dissent) in results {
            assert!(unanimous);
            assert!(!dissent);
        }
    }

    #[test]
    fn test_sum_f64() {
        let results = run_world(4, |comm| comm.sum_f64(comm.rank() as f64 + 1.0).unwrap());
        for sum in results {
            assert!((sum - 10.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_broadcast() {
        let results = run_world(3, |comm| {
            let payload = (comm.rank() == 1).then(|| b"leader".to_vec());
            comm.broadcast(payload, 1).unwrap()
        });
        for bytes in results {
            assert_eq!(bytes, b"leader");
        }
    }

    #[test]
    fn test_sequenced_collectives_do_not_cross() {
        // Each rank issues the same sequence; results must pair up even
        // though threads interleave arbitrarily.
        let results = run_world(8, |comm| {
            let a = comm.sum_f64(1.0).unwrap();
            let b = comm.sum_f64(10.0).unwrap();
            let c = comm.all_and(true).unwrap();
            (a, b, c)
        });
        for (a, b, c) in results {
            assert!((a - 8.0).abs() < f64::EPSILON);
            assert!((b - 80.0).abs() < f64::EPSILON);
            assert!(c);
        }
    }

    #[test]
    fn test_split_by_parity() {
        let results = run_world(6, |comm| {
            let sub = comm.split(comm.rank() as u64 % 2).unwrap();
            let sub_sum = sub.sum_f64(1.0).unwrap();
            (comm.rank(), sub.rank(), sub.size(), sub_sum)
        });
        for (world_rank, sub_rank, sub_size, sub_sum) in results {
            assert_eq!(sub_size, 3);
            assert!((sub_sum - 3.0).abs() < f64::EPSILON);
            // Sub-ranks follow ascending world rank within the color.
            assert_eq!(sub_rank, world_rank / 2);
        }
    }

    #[test]
    fn test_split_singleton_groups() {
        let results = run_world(3, |comm| {
            let sub = comm.split(comm.rank() as u64).unwrap();
            (sub.rank(), sub.size())
        });
        for (sub_rank, sub_size) in results {
            assert_eq!(sub_rank, 0);
            assert_eq!(sub_size, 1);
        }
    }
}
