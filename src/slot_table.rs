// SPDX-License-Identifier: MIT
//! Fixed two-dimensional array `[W][S]` of client slots (spec §3
//! `SlotTable`).
//!
//! The table is allocated once at server init and never resized; only slot
//! *fields* mutate afterward (spec §5 "Shared-resource policy"). It is
//! shared by reference (`Arc`) across the Acceptor, every IoWorker, every
//! TimeoutSweeper, and external control callers.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::slot::{ClientSlot, Location, SlotState};

/// Owns every [`ClientSlot`] for the server's lifetime (spec §3
/// "Ownership"). Workers borrow slots by [`Location`].
pub struct SlotTable {
    workers: usize,
    slots_per_worker: usize,
    rows: Vec<Vec<ClientSlot>>,
    /// `live_count[w]`: number of slots on worker `w` in `Establishing` or
    /// `Established` (spec §3 invariant 6, §5 "Shared-resource policy").
    /// Modified by the Acceptor (before registering a new slot) and by the
    /// disconnect routine; an atomic counter suffices per spec §5.
    live_count: Vec<AtomicUsize>,
}

impl SlotTable {
    pub fn new(workers: usize, slots_per_worker: usize, buffer_capacity: usize) -> Self {
        let rows = (0..workers)
            .map(|w| {
                (0..slots_per_worker)
                    .map(|s| ClientSlot::new(Location::new(w, s), buffer_capacity))
                    .collect()
            })
            .collect();
        let live_count = (0..workers).map(|_| AtomicUsize::new(0)).collect();
        SlotTable {
            workers,
            slots_per_worker,
            rows,
            live_count,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn slots_per_worker(&self) -> usize {
        self.slots_per_worker
    }

    pub fn capacity(&self) -> usize {
        self.workers * self.slots_per_worker
    }

    pub fn slot(&self, location: Location) -> &ClientSlot {
        &self.rows[location.worker_index][location.slot_index]
    }

    pub fn row(&self, worker_index: usize) -> &[ClientSlot] {
        &self.rows[worker_index]
    }

    pub fn live_count(&self, worker_index: usize) -> usize {
        self.live_count[worker_index].load(Ordering::Acquire)
    }

    pub(crate) fn increment_live(&self, worker_index: usize) {
        self.live_count[worker_index].fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement_live(&self, worker_index: usize) {
        self.live_count[worker_index].fetch_sub(1, Ordering::AcqRel);
    }

    /// `argmin(live_count[w])`, lowest index wins ties (spec §4.1 step 1,
    /// §2 "Supplemented features" on tie-break direction).
    pub fn least_loaded_worker(&self) -> usize {
        let mut best = 0;
        let mut best_count = self.live_count(0);
        for w in 1..self.workers {
            let count = self.live_count(w);
            if count < best_count {
                best = w;
                best_count = count;
            }
        }
        best
    }

    /// First slot in `Standby` on the given worker, if any (spec §4.1 step
    /// 2).
    pub fn first_standby_slot(&self, worker_index: usize) -> Option<usize> {
        self.rows[worker_index]
            .iter()
            .position(|slot| slot.state() == SlotState::Standby)
    }

    /// Total number of slots currently `Established` or `Establishing`
    /// across the whole table. Used by tests and diagnostics; not on any
    /// hot path.
    pub fn total_live(&self) -> usize {
        (0..self.workers).map(|w| self.live_count(w)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_breaks_ties_at_lowest_index() {
        let table = SlotTable::new(3, 4, 16);
        assert_eq!(table.least_loaded_worker(), 0);
        table.increment_live(0);
        assert_eq!(table.least_loaded_worker(), 1);
        table.increment_live(1);
        table.increment_live(1);
        assert_eq!(table.least_loaded_worker(), 2);
    }

    #[test]
    fn first_standby_slot_finds_free_slot() {
        let table = SlotTable::new(1, 3, 16);
        assert_eq!(table.first_standby_slot(0), Some(0));
    }

    #[test]
    fn live_count_tracks_increments_and_decrements() {
        let table = SlotTable::new(1, 2, 16);
        assert_eq!(table.live_count(0), 0);
        table.increment_live(0);
        table.increment_live(0);
        assert_eq!(table.live_count(0), 2);
        table.decrement_live(0);
        assert_eq!(table.live_count(0), 1);
    }

    #[test]
    fn capacity_is_workers_times_slots() {
        let table = SlotTable::new(4, 16, 16);
        assert_eq!(table.capacity(), 64);
    }
}
