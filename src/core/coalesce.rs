//! Type-combination rules for folding two operations on the same block.

use crate::op::{OpData, Operation};

/// Result of folding a newer operation into an older one.
#[derive(Debug, Clone, PartialEq)]
pub enum Coalesced {
    /// One record now represents both writes.
    Merged(Operation),
    /// The writes annihilate (create followed by delete); nothing is left to send.
    Cancelled,
}

/// Folds `newer` on top of `older`; both must target the same block.
///
/// The merged record keeps `older.id`, takes `newer`'s timestamp, and carries
/// the higher priority, attempt count, and retry gate of the two.
pub fn fold(older: Operation, newer: Operation) -> Coalesced {
    debug_assert_eq!(older.block_id, newer.block_id);

    let data = match (older.data, newer.data) {
        (OpData::Create(mut data), OpData::Update(patch)) => {
            patch.apply_to(&mut data);
            OpData::Create(data)
        }
        (OpData::Create(_), OpData::Delete) => return Coalesced::Cancelled,
        (OpData::Update(mut base), OpData::Update(patch)) => {
            base.merge_from(&patch);
            OpData::Update(base)
        }
        (OpData::Update(_), OpData::Delete) | (OpData::Delete, OpData::Delete) => OpData::Delete,
        // A pending delete that was never sent is superseded by the resurrecting write.
        (OpData::Delete, data @ (OpData::Create(_) | OpData::Update(_))) => data,
        // A full create payload supersedes whatever was pending for the block.
        (OpData::Create(_) | OpData::Update(_), data @ OpData::Create(_)) => data,
    };

    Coalesced::Merged(Operation {
        id: older.id,
        block_id: newer.block_id,
        data,
        timestamp_ms: newer.timestamp_ms.max(older.timestamp_ms),
        priority: older.priority.max(newer.priority),
        attempt: older.attempt.max(newer.attempt),
        not_before: older.not_before.max(newer.not_before),
    })
}
