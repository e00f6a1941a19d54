//! Runtime event stream payloads.

use crate::{core::queue::SyncFailure, types::BlockId};

/// Events emitted from the sync manager loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A batch went out to the backend.
    BatchDispatched {
        /// Operations in the batch.
        size: usize,
    },
    /// The in-flight batch resolved.
    BatchSettled {
        /// Operations the server applied.
        synced: usize,
        /// Operations sent back through the retry path.
        retried: usize,
        /// Operations dropped for good.
        dropped: usize,
    },
    /// An operation will be retried after a backoff.
    RetryScheduled {
        /// Target block.
        block_id: BlockId,
        /// Failed attempts so far.
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
    /// An operation was dropped and reported.
    OperationDropped {
        /// What was lost and why.
        failure: SyncFailure,
    },
    /// A temporary id was replaced by its server id.
    BlockRemapped {
        /// Client-generated id.
        temp: BlockId,
        /// Server-assigned id.
        real: BlockId,
    },
    /// The manager stopped; pending operations were discarded.
    Destroyed {
        /// Operations still pending at teardown.
        discarded: usize,
    },
}
