//! Completion callbacks for the editor layer.

use crate::{core::queue::SyncFailure, transport::BatchSyncResponse};

/// Receives sync outcomes. Called on the manager task, so implementations
/// should hand work off rather than block.
pub trait SyncCallbacks: Send + Sync + 'static {
    /// A batch resolved with at least one applied operation.
    fn on_sync_success(&self, _response: &BatchSyncResponse) {}

    /// An operation was dropped after exhausting retries or failing fatally.
    fn on_sync_error(&self, _failure: &SyncFailure) {}
}
