//! Synchronous queue machinery: store, coalescing, retry, reconciliation.

/// Batch partitioning and response parsing.
pub mod batch;
/// Operation folding rules.
pub mod coalesce;
/// Single-flight queue state machine.
pub mod queue;
/// Temp-id reconciliation.
pub mod reconcile;
/// Backoff and failure classification.
pub mod retry;
/// Pending operation store keyed by block id.
pub mod store;
