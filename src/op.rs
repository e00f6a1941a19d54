//! Pending operation records.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::{
    block::{BlockPatch, CreateData},
    types::{BlockId, OpKind, OperationId, Priority},
};

/// Kind-specific payload of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpData {
    /// Full payload for a new block.
    Create(CreateData),
    /// Sparse field writes for an existing block.
    Update(BlockPatch),
    /// No payload.
    Delete,
}

/// One pending mutation targeting one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Unique per enqueue call; survives coalescing.
    pub id: OperationId,
    /// Target block, possibly temporary.
    pub block_id: BlockId,
    /// Kind-specific payload.
    pub data: OpData,
    /// Enqueue time in milliseconds since epoch.
    pub timestamp_ms: u64,
    /// Batch-fill preference.
    pub priority: Priority,
    /// Failed delivery attempts so far.
    pub attempt: u32,
    /// Retry backoff gate; the operation is not drained before this instant.
    pub not_before: Option<Instant>,
}

impl Operation {
    fn new(block_id: BlockId, data: OpData, priority: Priority) -> Self {
        Self {
            id: OperationId::generate(),
            block_id,
            data,
            timestamp_ms: now_ms(),
            priority,
            attempt: 0,
            not_before: None,
        }
    }

    /// Builds a create for `block_id` (normally from [`BlockId::temporary`]).
    pub fn create(block_id: BlockId, data: CreateData) -> Self {
        Self::new(block_id, OpData::Create(data), Priority::Normal)
    }

    /// Builds a field update.
    pub fn update(block_id: BlockId, patch: BlockPatch) -> Self {
        Self::new(block_id, OpData::Update(patch), Priority::Normal)
    }

    /// Builds a delete. Deletes default to [`Priority::High`].
    pub fn delete(block_id: BlockId) -> Self {
        Self::new(block_id, OpData::Delete, Priority::High)
    }

    /// Overrides the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mutation kind derived from the payload.
    pub fn kind(&self) -> OpKind {
        match self.data {
            OpData::Create(_) => OpKind::Create,
            OpData::Update(_) => OpKind::Update,
            OpData::Delete => OpKind::Delete,
        }
    }

    /// Parent block referenced by the payload, if any.
    pub fn parent_ref(&self) -> Option<&BlockId> {
        match &self.data {
            OpData::Create(data) => data.parent_block_id.as_ref(),
            OpData::Update(patch) => patch.parent_block_id.as_ref(),
            OpData::Delete => None,
        }
    }

    /// True when the retry gate is still closed at `now`.
    pub fn is_gated(&self, now: Instant) -> bool {
        self.not_before.is_some_and(|at| at > now)
    }

    /// Rewrites every reference to `from` (target and parent) into `to`.
    ///
    /// Returns true when anything changed.
    pub fn rewrite_block_refs(&mut self, from: &BlockId, to: &BlockId) -> bool {
        let mut changed = false;
        if &self.block_id == from {
            self.block_id = to.clone();
            changed = true;
        }
        self.rewrite_parent_ref(from, to) || changed
    }

    /// Rewrites the parent reference only.
    pub fn rewrite_parent_ref(&mut self, from: &BlockId, to: &BlockId) -> bool {
        let parent = match &mut self.data {
            OpData::Create(data) => data.parent_block_id.as_mut(),
            OpData::Update(patch) => patch.parent_block_id.as_mut(),
            OpData::Delete => None,
        };
        match parent.filter(|p| **p == *from) {
            Some(parent) => {
                *parent = to.clone();
                true
            }
            None => false,
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
