use std::time::Duration;

use hashbrown::HashSet;
use log::{debug, error, warn};
use tokio::time::Instant;

use crate::{
    op::{OpData, Operation},
    transport::{BatchSyncRequest, BatchSyncResponse, TransportError},
    types::{BlockId, OpKind, OperationId},
};

use super::{
    batch::{Applied, Batch},
    coalesce::{Coalesced, fold},
    reconcile::{AliasMap, remap_pending},
    retry::{OpOutcome, RetryDecision, RetryPolicy},
    store::{PendingStore, Slot},
};

/// Enqueue rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A new block key would exceed `max_pending_ops`.
    #[error("pending queue is full ({pending} of {limit} operations)")]
    Backpressure {
        /// Records pending at the time of the call.
        pending: usize,
        /// Configured cap.
        limit: usize,
    },
    /// The operation cannot be queued at all, e.g. an empty block id.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Limits for a [`SyncQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Most operations drained into one batch.
    pub max_batch_size: usize,
    /// Cap on distinct pending blocks. Zero disables the cap.
    pub max_pending_ops: usize,
    /// Attempt ceiling and backoff.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_pending_ops: 10_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// How an enqueue landed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New record for a block with nothing pending.
    Stored,
    /// Folded into the record already pending for the block.
    Coalesced,
    /// Annihilated the pending create; nothing remains for the block.
    Cancelled,
}

/// Why an operation left the queue without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Failed `max_retries` times.
    RetriesExhausted,
    /// Failed with a non-retryable error.
    Fatal,
    /// Targets a temporary block whose create no longer exists.
    OrphanedTemporaryBlock,
    /// References a temporary parent whose create was dropped.
    ParentDropped,
}

/// Terminal failure surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} of block {block_id} dropped after {attempts} attempt(s): {error}")]
pub struct SyncFailure {
    /// Id of the dropped record.
    pub operation_id: OperationId,
    /// Kind of the dropped record.
    pub kind: OpKind,
    /// Target block.
    pub block_id: BlockId,
    /// Attempts made before the drop.
    pub attempts: u32,
    /// Why it was dropped.
    pub reason: DropReason,
    /// Last error message.
    pub error: String,
}

impl SyncFailure {
    fn new(op: &Operation, reason: DropReason, error: impl Into<String>) -> Self {
        Self {
            operation_id: op.id.clone(),
            kind: op.kind(),
            block_id: op.block_id.clone(),
            attempts: op.attempt,
            reason,
            error: error.into(),
        }
    }
}

/// One operation the server applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedOp {
    /// Id of the applied record.
    pub operation_id: OperationId,
    /// Block id as sent; the temp id for creates.
    pub block_id: BlockId,
    /// What the server returned for it.
    pub applied: Applied,
}

/// One operation sent back through the retry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriedOp {
    /// Id of the requeued record.
    pub operation_id: OperationId,
    /// Target block.
    pub block_id: BlockId,
    /// Failed attempts so far.
    pub attempt: u32,
    /// Gate before the record can be drained again.
    pub delay: Duration,
    /// Error that caused the retry.
    pub error: String,
}

/// Result of settling one in-flight batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlushReport {
    /// Raw server response, when the call reached the server.
    pub response: Option<BatchSyncResponse>,
    /// Operations the server applied.
    pub synced: Vec<SyncedOp>,
    /// `(temp, real)` pairs applied to the pending store.
    pub remapped: Vec<(BlockId, BlockId)>,
    /// Operations requeued with backoff.
    pub retried: Vec<RetriedOp>,
    /// Operations that left the queue for good.
    pub dropped: Vec<SyncFailure>,
}

impl FlushReport {
    /// Folds another report into this one, keeping the latest response.
    pub fn absorb(&mut self, other: FlushReport) {
        if other.response.is_some() {
            self.response = other.response;
        }
        self.synced.extend(other.synced);
        self.remapped.extend(other.remapped);
        self.retried.extend(other.retried);
        self.dropped.extend(other.dropped);
    }
}

/// A batch handed out for sending, plus anything dropped while assembling it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlushStart {
    /// Request to send; `None` when nothing was started.
    pub request: Option<BatchSyncRequest>,
    /// Orphans and cascades removed during the drain.
    pub dropped: Vec<SyncFailure>,
}

#[derive(Debug, Default)]
enum FlushState {
    #[default]
    Idle,
    Flushing {
        batch: Batch,
    },
}

/// Coalescing outbox for block mutations with single-flight batch delivery.
///
/// Purely synchronous: the caller sends the request returned by
/// [`SyncQueue::begin_flush`] and feeds the result to [`SyncQueue::complete_flush`].
#[derive(Debug, Default)]
pub struct SyncQueue {
    config: QueueConfig,
    store: PendingStore,
    state: FlushState,
    aliases: AliasMap,
    generation: u64,
}

impl SyncQueue {
    /// Empty idle queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Limits the queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Adds `op`, folding it into any record pending for the same block.
    ///
    /// Known temp ids are translated to their real ids first. Only a new block
    /// key is subject to back-pressure.
    pub fn enqueue(&mut self, mut op: Operation) -> Result<EnqueueOutcome, QueueError> {
        if op.block_id.as_str().is_empty() {
            return Err(QueueError::InvalidOperation("empty block id".to_string()));
        }
        self.aliases.translate(&mut op);

        let Some(existing) = self.store.take_slot(&op.block_id) else {
            let limit = self.config.max_pending_ops;
            if limit > 0 && self.store.len() >= limit {
                return Err(QueueError::Backpressure {
                    pending: self.store.len(),
                    limit,
                });
            }
            self.store.put(op);
            return Ok(EnqueueOutcome::Stored);
        };

        let block_id = op.block_id.clone();
        match fold(existing.op, op) {
            Coalesced::Merged(merged) => {
                debug!("coalesced {} into pending {} for block {block_id}", merged.kind(), merged.id);
                self.store.put_slot(Slot {
                    seq: existing.seq,
                    op: merged,
                });
                Ok(EnqueueOutcome::Coalesced)
            }
            Coalesced::Cancelled => {
                debug!("delete cancelled unsent create for block {block_id}");
                Ok(EnqueueOutcome::Cancelled)
            }
        }
    }

    /// Removes the not-yet-sent operation for `block_id`.
    pub fn dequeue(&mut self, block_id: &BlockId) -> Option<Operation> {
        self.store.remove(block_id)
    }

    /// Rewrites pending references from `temp` to `real` and remembers the alias.
    pub fn remap_block_id(&mut self, temp: &BlockId, real: &BlockId) -> usize {
        if temp == real {
            return 0;
        }
        if let FlushState::Flushing { batch } = &mut self.state {
            for op in &mut batch.ops {
                op.rewrite_parent_ref(temp, real);
            }
        }
        let rewritten = remap_pending(&mut self.store, temp, real);
        self.aliases.insert(temp.clone(), real.clone(), self.generation);
        debug!("remapped {temp} -> {real} ({rewritten} pending record(s))");
        rewritten
    }

    /// Pending records, excluding the batch in flight.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// No pending operations and nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty() && !self.is_flushing()
    }

    /// A batch is in flight.
    pub fn is_flushing(&self) -> bool {
        matches!(self.state, FlushState::Flushing { .. })
    }

    /// Operations a drain at `now` could pick up.
    pub fn ready_len(&self, now: Instant) -> usize {
        self.store.ready_len(now)
    }

    /// Earliest retry gate still closed at `now`.
    pub fn next_gate(&self, now: Instant) -> Option<Instant> {
        self.store.earliest_gate(now)
    }

    /// Clones of the pending records in insertion order.
    pub fn pending_snapshot(&self) -> Vec<Operation> {
        self.store.values().into_iter().cloned().collect()
    }

    /// Pending record for `block_id`.
    pub fn get(&self, block_id: &BlockId) -> Option<&Operation> {
        self.store.get(block_id)
    }

    /// Drains the next batch and marks the queue as flushing.
    ///
    /// Returns no request while a batch is already in flight or nothing is ready.
    pub fn begin_flush(&mut self, now: Instant) -> FlushStart {
        if self.is_flushing() {
            return FlushStart::default();
        }

        let dropped = self.purge_orphans();
        let pending_creates: HashSet<BlockId> = self
            .store
            .values()
            .into_iter()
            .filter(|op| op.kind() == OpKind::Create && op.block_id.is_temporary())
            .map(|op| op.block_id.clone())
            .collect();

        let ops = self.store.drain(self.config.max_batch_size, now, |op| {
            op.parent_ref()
                .is_some_and(|parent| parent.is_temporary() && pending_creates.contains(parent))
        });
        if ops.is_empty() {
            return FlushStart {
                request: None,
                dropped,
            };
        }

        let batch = Batch::new(ops);
        let request = batch.to_request();
        self.state = FlushState::Flushing { batch };
        FlushStart {
            request: Some(request),
            dropped,
        }
    }

    /// Settles the in-flight batch: remaps acknowledged creates, requeues retryable
    /// failures with backoff, and drops what is exhausted or fatal.
    pub fn complete_flush(
        &mut self,
        result: Result<BatchSyncResponse, TransportError>,
        now: Instant,
    ) -> FlushReport {
        let batch = match std::mem::take(&mut self.state) {
            FlushState::Flushing { batch } => batch,
            FlushState::Idle => {
                warn!("flush completion with no batch in flight");
                return FlushReport::default();
            }
        };
        self.generation += 1;

        let mut report = FlushReport::default();
        let outcomes: Vec<(Operation, OpOutcome<Applied>)> = match result {
            Ok(response) => {
                let outcomes = batch.resolve(&response);
                report.response = Some(response);
                outcomes
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let msg = err.to_string();
                batch
                    .ops
                    .into_iter()
                    .map(|op| {
                        let outcome = if retryable {
                            OpOutcome::Retryable(msg.clone())
                        } else {
                            OpOutcome::Fatal(msg.clone())
                        };
                        (op, outcome)
                    })
                    .collect()
            }
        };

        let mut failed = Vec::new();
        for (op, outcome) in outcomes {
            match outcome {
                OpOutcome::Success(applied) => {
                    if let Applied::Created(block) = &applied {
                        if op.block_id != block.id {
                            self.remap_block_id(&op.block_id, &block.id);
                            report.remapped.push((op.block_id.clone(), block.id.clone()));
                        }
                    }
                    report.synced.push(SyncedOp {
                        operation_id: op.id,
                        block_id: op.block_id,
                        applied,
                    });
                }
                other => failed.push((op, other)),
            }
        }

        for (mut op, outcome) in failed {
            match outcome {
                OpOutcome::Retryable(error) => {
                    op.attempt += 1;
                    match self.config.retry.decide(op.attempt) {
                        RetryDecision::Retry { delay } => {
                            warn!(
                                "retrying {} of block {} (attempt {}/{}) in {:?}: {error}",
                                op.kind(),
                                op.block_id,
                                op.attempt,
                                self.config.retry.max_retries,
                                delay
                            );
                            op.not_before = Some(now + delay);
                            report.retried.push(RetriedOp {
                                operation_id: op.id.clone(),
                                block_id: op.block_id.clone(),
                                attempt: op.attempt,
                                delay,
                                error,
                            });
                            self.requeue(op);
                        }
                        RetryDecision::GiveUp => {
                            self.drop_op(op, DropReason::RetriesExhausted, error, &mut report.dropped);
                        }
                    }
                }
                OpOutcome::Fatal(error) => {
                    op.attempt += 1;
                    self.drop_op(op, DropReason::Fatal, error, &mut report.dropped);
                }
                OpOutcome::Success(_) => {}
            }
        }

        self.aliases.expire(self.generation);
        report
    }

    /// Abandons the in-flight batch without settling it.
    pub fn abandon_in_flight(&mut self) -> Option<Batch> {
        match std::mem::take(&mut self.state) {
            FlushState::Flushing { batch } => Some(batch),
            FlushState::Idle => None,
        }
    }

    /// Folds a failed operation back under whatever newer write is pending for its block.
    fn requeue(&mut self, mut op: Operation) {
        self.aliases.translate(&mut op);
        match self.store.take_slot(&op.block_id) {
            Some(newer) => {
                if let Coalesced::Merged(merged) = fold(op, newer.op) {
                    self.store.put_slot(Slot {
                        seq: newer.seq,
                        op: merged,
                    });
                }
            }
            None => {
                self.store.put(op);
            }
        }
    }

    fn drop_op(&mut self, op: Operation, reason: DropReason, error: String, out: &mut Vec<SyncFailure>) {
        error!(
            "dropping {} of block {} after {} attempt(s): {error}",
            op.kind(),
            op.block_id,
            op.attempt
        );
        let cascade = op.kind() == OpKind::Create && op.block_id.is_temporary();
        out.push(SyncFailure::new(&op, reason, error));
        if cascade {
            self.cascade_drop(op.block_id, out);
        }
    }

    /// Drops every pending operation that depends on a temporary block that will never exist.
    fn cascade_drop(&mut self, temp: BlockId, out: &mut Vec<SyncFailure>) {
        let mut work = vec![temp];
        while let Some(dead) = work.pop() {
            for key in self.store.keys_referencing(&dead) {
                let Some(op) = self.store.remove(&key) else {
                    continue;
                };
                if op.block_id == dead {
                    if !matches!(op.data, OpData::Delete) {
                        out.push(SyncFailure::new(
                            &op,
                            DropReason::OrphanedTemporaryBlock,
                            format!("create of block {dead} was dropped"),
                        ));
                    }
                    continue;
                }
                if op.kind() == OpKind::Create && op.block_id.is_temporary() {
                    work.push(op.block_id.clone());
                }
                out.push(SyncFailure::new(
                    &op,
                    DropReason::ParentDropped,
                    format!("parent block {dead} was dropped"),
                ));
            }
        }
    }

    /// Removes updates/deletes on temporary ids; with nothing in flight their create is gone.
    fn purge_orphans(&mut self) -> Vec<SyncFailure> {
        let orphans: Vec<BlockId> = self
            .store
            .values()
            .into_iter()
            .filter(|op| op.kind() != OpKind::Create && op.block_id.is_temporary())
            .map(|op| op.block_id.clone())
            .collect();

        let mut dropped = Vec::new();
        for key in orphans {
            let Some(op) = self.store.remove(&key) else {
                continue;
            };
            if matches!(op.data, OpData::Delete) {
                debug!("discarding delete of never-created block {key}");
                continue;
            }
            warn!("dropping update of unknown temporary block {key}");
            dropped.push(SyncFailure::new(
                &op,
                DropReason::OrphanedTemporaryBlock,
                "temporary block has no pending create",
            ));
        }
        dropped
    }
}
