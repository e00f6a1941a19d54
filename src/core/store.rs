use hashbrown::HashMap;
use tokio::time::Instant;

use crate::{op::Operation, types::BlockId};

/// Insertion-ordered pending operations, at most one per block id.
#[derive(Debug, Default)]
pub struct PendingStore {
    slots: HashMap<BlockId, Slot>,
    next_seq: u64,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) seq: u64,
    pub(crate) op: Operation,
}

impl PendingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending records.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No pending records.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pending record for `block_id`.
    pub fn get(&self, block_id: &BlockId) -> Option<&Operation> {
        self.slots.get(block_id).map(|slot| &slot.op)
    }

    /// Whether `block_id` has a pending record.
    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.slots.contains_key(block_id)
    }

    /// Inserts `op` keyed by its block id. A replaced record keeps its queue position.
    pub fn put(&mut self, op: Operation) -> Option<Operation> {
        let key = op.block_id.clone();
        match self.slots.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(&mut slot.op, op)),
            None => {
                let seq = self.take_next_seq();
                self.slots.insert(key, Slot { seq, op });
                None
            }
        }
    }

    /// Removes the record for `block_id`, if any.
    pub fn remove(&mut self, block_id: &BlockId) -> Option<Operation> {
        self.slots.remove(block_id).map(|slot| slot.op)
    }

    /// Removes and returns up to `limit` operations, high priority first, then
    /// insertion order. Operations gated at `now` or matched by `hold` stay put.
    pub fn drain<F>(&mut self, limit: usize, now: Instant, hold: F) -> Vec<Operation>
    where
        F: Fn(&Operation) -> bool,
    {
        let mut ready: Vec<(std::cmp::Reverse<crate::types::Priority>, u64, BlockId)> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.op.is_gated(now) && !hold(&slot.op))
            .map(|(key, slot)| (std::cmp::Reverse(slot.op.priority), slot.seq, key.clone()))
            .collect();
        ready.sort_unstable();
        ready.truncate(limit);

        ready
            .into_iter()
            .filter_map(|(_, _, key)| self.remove(&key))
            .collect()
    }

    /// Pending operations in insertion order.
    pub fn values(&self) -> Vec<&Operation> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_unstable_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| &slot.op).collect()
    }

    /// Earliest retry gate still closed at `now`.
    pub fn earliest_gate(&self, now: Instant) -> Option<Instant> {
        self.slots
            .values()
            .filter_map(|slot| slot.op.not_before)
            .filter(|at| *at > now)
            .min()
    }

    /// Number of operations that a drain at `now` could pick up, ignoring dependency holds.
    pub fn ready_len(&self, now: Instant) -> usize {
        self.slots.values().filter(|slot| !slot.op.is_gated(now)).count()
    }

    /// Block ids of every operation that targets or references `block_id`.
    pub fn keys_referencing(&self, block_id: &BlockId) -> Vec<BlockId> {
        self.slots
            .iter()
            .filter(|(key, slot)| *key == block_id || slot.op.parent_ref() == Some(block_id))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn take_slot(&mut self, block_id: &BlockId) -> Option<Slot> {
        self.slots.remove(block_id)
    }

    /// Reinserts a slot under its operation's current block id, preserving `seq`.
    pub(crate) fn put_slot(&mut self, slot: Slot) {
        self.next_seq = self.next_seq.max(slot.seq.saturating_add(1));
        self.slots.insert(slot.op.block_id.clone(), slot);
    }

    fn take_next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{block::BlockPatch, types::Priority};

    fn update(id: &str) -> Operation {
        Operation::update(BlockId::from(id), BlockPatch::default())
    }

    #[test]
    fn drain_prefers_high_priority_then_insertion_order() {
        let mut store = PendingStore::new();
        store.put(update("a"));
        store.put(update("b"));
        store.put(update("c").with_priority(Priority::High));
        store.put(update("d"));

        let now = Instant::now();
        let drained: Vec<String> = store
            .drain(3, now, |_| false)
            .into_iter()
            .map(|op| op.block_id.to_string())
            .collect();
        assert_eq!(drained, vec!["c", "a", "b"]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&BlockId::from("d")));
    }

    #[test]
    fn replaced_record_keeps_its_position() {
        let mut store = PendingStore::new();
        store.put(update("a"));
        store.put(update("b"));
        store.put(update("a"));

        let order: Vec<String> = store.values().iter().map(|op| op.block_id.to_string()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn gated_operations_are_skipped_by_drain() {
        let mut store = PendingStore::new();
        let now = Instant::now();
        let mut gated = update("late");
        gated.not_before = Some(now + Duration::from_secs(2));
        store.put(gated);
        store.put(update("early"));

        let drained = store.drain(10, now, |_| false);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].block_id, BlockId::from("early"));
        assert_eq!(store.earliest_gate(now), Some(now + Duration::from_secs(2)));

        let later = store.drain(10, now + Duration::from_secs(2), |_| false);
        assert_eq!(later.len(), 1);
        assert_eq!(store.earliest_gate(now + Duration::from_secs(2)), None);
    }
}
