//! Client-side outbox that coalesces block edits and syncs them in batches.
//!
//! # Examples
//!
//! Synchronous queue usage with [`core::queue::SyncQueue`]:
//! ```
//! use blocksync::{
//!     block::{BlockPatch, CreateData},
//!     core::queue::{EnqueueOutcome, SyncQueue},
//!     op::Operation,
//!     types::BlockId,
//! };
//!
//! let mut queue = SyncQueue::default();
//! let id = BlockId::temporary();
//! queue.enqueue(Operation::create(id.clone(), CreateData {
//!     page_id: "page-1".to_string(),
//!     block_type: "text".to_string(),
//!     ..CreateData::default()
//! })).expect("enqueue");
//! let outcome = queue.enqueue(Operation::update(id, BlockPatch {
//!     content: Some("hello".to_string()),
//!     ..BlockPatch::default()
//! })).expect("enqueue");
//! assert_eq!(outcome, EnqueueOutcome::Coalesced);
//! assert_eq!(queue.len(), 1);
//! ```
//!
//! Runtime usage with the HTTP transport:
//! ```no_run
//! use std::sync::Arc;
//!
//! use blocksync::{
//!     block::BlockPatch,
//!     op::Operation,
//!     runtime::handle::{spawn_block_sync, SyncConfig},
//!     transport::http::{HttpTransport, HttpTransportConfig},
//!     types::BlockId,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let transport = HttpTransport::new(HttpTransportConfig::default()).expect("client");
//! let handle = spawn_block_sync(Arc::new(transport), SyncConfig::default());
//! handle.enqueue(Operation::update(BlockId::from("block-1"), BlockPatch {
//!     content: Some("hello".to_string()),
//!     ..BlockPatch::default()
//! })).await.expect("enqueue");
//! let report = handle.force_sync().await.expect("sync");
//! println!("{} operation(s) synced", report.synced.len());
//! handle.destroy().await.expect("destroy");
//! # }
//! ```
#![warn(missing_docs)]

/// Block payloads and sparse patches.
pub mod block;
/// Synchronous queue, coalescing, retry, and reconciliation.
pub mod core;
/// Pending operation records.
pub mod op;
/// Single-writer sync manager, callbacks, and events.
pub mod runtime;
/// Batch-sync wire types and transports.
pub mod transport;
/// Shared identifiers and enums.
pub mod types;
