//! Temp-id to server-id reconciliation.

use hashbrown::HashMap;

use crate::{op::Operation, types::BlockId};

use super::{
    coalesce::{Coalesced, fold},
    store::{PendingStore, Slot},
};

/// Flush completions an alias outlives its remap.
pub const ALIAS_RETENTION_FLUSHES: u64 = 2;

/// Recently remapped temp ids, kept briefly so late enqueues still land on the real id.
#[derive(Debug, Default)]
pub struct AliasMap {
    entries: HashMap<BlockId, (BlockId, u64)>,
}

impl AliasMap {
    /// Records `temp -> real` at flush `generation`.
    pub fn insert(&mut self, temp: BlockId, real: BlockId, generation: u64) {
        self.entries.insert(temp, (real, generation));
    }

    /// Real id for a remembered temp id.
    pub fn resolve(&self, id: &BlockId) -> Option<&BlockId> {
        self.entries.get(id).map(|(real, _)| real)
    }

    /// Rewrites target and parent of `op` through the alias table.
    pub fn translate(&self, op: &mut Operation) {
        if let Some(real) = self.resolve(&op.block_id).cloned() {
            let temp = op.block_id.clone();
            op.rewrite_block_refs(&temp, &real);
        }
        if let Some(parent) = op.parent_ref().cloned() {
            if let Some(real) = self.resolve(&parent).cloned() {
                op.rewrite_block_refs(&parent, &real);
            }
        }
    }

    /// Drops aliases recorded more than [`ALIAS_RETENTION_FLUSHES`] generations before `generation`.
    pub fn expire(&mut self, generation: u64) {
        self.entries
            .retain(|_, (_, recorded)| recorded.saturating_add(ALIAS_RETENTION_FLUSHES) > generation);
    }

    /// Live aliases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No live aliases.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rewrites every pending reference to `temp` into `real`.
///
/// A record that lands on a key already holding an operation is folded with it
/// in queue order. Returns the number of records rewritten.
pub fn remap_pending(store: &mut PendingStore, temp: &BlockId, real: &BlockId) -> usize {
    let mut rewritten = 0;
    for key in store.keys_referencing(temp) {
        let Some(mut slot) = store.take_slot(&key) else {
            continue;
        };
        if slot.op.rewrite_block_refs(temp, real) {
            rewritten += 1;
        }

        match store.take_slot(&slot.op.block_id) {
            Some(existing) => {
                let (older, newer) = if slot.seq <= existing.seq {
                    (slot, existing)
                } else {
                    (existing, slot)
                };
                let seq = older.seq;
                if let Coalesced::Merged(op) = fold(older.op, newer.op) {
                    store.put_slot(Slot { seq, op });
                }
            }
            None => store.put_slot(slot),
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BlockPatch, CreateData},
        op::OpData,
    };

    #[test]
    fn remap_rewrites_targets_and_parents() {
        let mut store = PendingStore::new();
        store.put(Operation::update(
            BlockId::from("temp-1"),
            BlockPatch {
                content: Some("B".into()),
                ..BlockPatch::default()
            },
        ));
        store.put(Operation::create(
            BlockId::from("temp-2"),
            CreateData {
                parent_block_id: Some(BlockId::from("temp-1")),
                ..CreateData::default()
            },
        ));

        let n = remap_pending(&mut store, &BlockId::from("temp-1"), &BlockId::from("real-1"));
        assert_eq!(n, 2);
        assert!(store.contains(&BlockId::from("real-1")));
        assert!(!store.contains(&BlockId::from("temp-1")));
        let child = store.get(&BlockId::from("temp-2")).expect("child");
        assert_eq!(child.parent_ref(), Some(&BlockId::from("real-1")));
    }

    #[test]
    fn remap_onto_existing_key_folds_in_queue_order() {
        let mut store = PendingStore::new();
        store.put(Operation::update(
            BlockId::from("temp-1"),
            BlockPatch {
                content: Some("older".into()),
                position: Some(4),
                ..BlockPatch::default()
            },
        ));
        store.put(Operation::update(
            BlockId::from("real-1"),
            BlockPatch {
                content: Some("newer".into()),
                ..BlockPatch::default()
            },
        ));

        remap_pending(&mut store, &BlockId::from("temp-1"), &BlockId::from("real-1"));
        assert_eq!(store.len(), 1);
        let merged = store.get(&BlockId::from("real-1")).expect("merged");
        let OpData::Update(patch) = &merged.data else {
            panic!("expected update");
        };
        assert_eq!(patch.content.as_deref(), Some("newer"));
        assert_eq!(patch.position, Some(4));
    }

    #[test]
    fn aliases_expire_after_retention() {
        let mut aliases = AliasMap::default();
        aliases.insert(BlockId::from("temp-1"), BlockId::from("real-1"), 3);
        aliases.expire(4);
        assert_eq!(aliases.resolve(&BlockId::from("temp-1")), Some(&BlockId::from("real-1")));
        aliases.expire(5);
        assert!(aliases.is_empty());
    }
}
