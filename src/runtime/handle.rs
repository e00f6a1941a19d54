use std::sync::Arc;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::{
        queue::{EnqueueOutcome, FlushReport, QueueConfig, QueueError, SyncFailure, SyncQueue},
        retry::RetryPolicy,
    },
    op::Operation,
    transport::{BatchSyncRequest, BatchSyncResponse, BatchTransport, TransportError},
    types::BlockId,
};

use super::{
    callbacks::SyncCallbacks,
    events::SyncEvent,
    lifecycle::{LifecycleEvent, LifecycleNotifier},
};

/// Handle-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The queue refused the operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The manager task has stopped.
    #[error("sync manager is not running")]
    ChannelClosed,
}

/// Manager tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Debounce window after the last enqueue.
    pub sync_interval_ms: u64,
    /// Operations per batch; reaching it flushes immediately.
    pub max_batch_size: usize,
    /// Failed attempts before an operation is dropped.
    pub max_retries: u32,
    /// Backoff unit. The nth retry waits `base * 2^n` capped at
    /// `max_retry_delay_ms`, so the first retry waits twice this.
    pub base_retry_delay_ms: u64,
    /// Cap for any retry delay.
    pub max_retry_delay_ms: u64,
    /// Back-pressure cap on distinct pending blocks; 0 disables it.
    pub max_pending_ops: usize,
    /// Capacity of the command channel.
    pub command_queue_bound: usize,
    /// Capacity of the event broadcast channel.
    pub event_queue_bound: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 100,
            max_batch_size: 50,
            max_retries: 5,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            max_pending_ops: 10_000,
            command_queue_bound: 256,
            event_queue_bound: 1024,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON object; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Debounce window as a [`Duration`].
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Queue-level slice of this config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_batch_size: self.max_batch_size.max(1),
            max_pending_ops: self.max_pending_ops,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.base_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
            },
        }
    }
}

/// Cloneable handle to a running sync manager.
#[derive(Clone)]
pub struct BlockSyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
    lifecycle_tx: mpsc::Sender<LifecycleEvent>,
}

enum Command {
    Enqueue {
        op: Operation,
        resp: oneshot::Sender<Result<EnqueueOutcome, SyncError>>,
    },
    Dequeue {
        block_id: BlockId,
        resp: oneshot::Sender<Option<Operation>>,
    },
    Remap {
        temp: BlockId,
        real: BlockId,
        resp: oneshot::Sender<usize>,
    },
    ForceSync {
        resp: oneshot::Sender<FlushReport>,
    },
    RequestSync,
    IsEmpty {
        resp: oneshot::Sender<bool>,
    },
    PendingLen {
        resp: oneshot::Sender<usize>,
    },
    PendingSnapshot {
        resp: oneshot::Sender<Vec<Operation>>,
    },
    SetCallbacks {
        callbacks: Option<Arc<dyn SyncCallbacks>>,
        resp: oneshot::Sender<()>,
    },
    Destroy {
        resp: oneshot::Sender<()>,
    },
}

type FlushResult = Result<BatchSyncResponse, TransportError>;

/// Spawns the manager task for one page and returns its handle.
pub fn spawn_block_sync<T: BatchTransport>(transport: Arc<T>, config: SyncConfig) -> BlockSyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_queue_bound.max(1));
    let (lifecycle_tx, mut lifecycle_rx) = mpsc::channel::<LifecycleEvent>(16);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<FlushResult>();

    let mut manager = Manager {
        queue: SyncQueue::new(config.queue_config()),
        transport,
        config,
        events_tx: events_tx.clone(),
        done_tx,
        callbacks: None,
        idle_deadline: None,
        trigger_pending: false,
        force_waiters: Vec::new(),
        force_report: FlushReport::default(),
    };

    tokio::spawn(async move {
        let mut lifecycle_open = true;
        loop {
            let idle = manager.idle_deadline;
            let gate = if manager.queue.is_flushing() {
                None
            } else {
                manager.queue.next_gate(Instant::now())
            };

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if manager.handle_command(cmd) {
                        break;
                    }
                }
                Some(result) = done_rx.recv() => {
                    manager.on_flush_complete(result);
                }
                event = lifecycle_rx.recv(), if lifecycle_open => {
                    match event {
                        Some(event) => manager.on_lifecycle(event),
                        None => lifecycle_open = false,
                    }
                }
                _ = tokio::time::sleep_until(idle.unwrap_or_else(Instant::now)), if idle.is_some() => {
                    manager.idle_deadline = None;
                    manager.trigger_flush();
                }
                _ = tokio::time::sleep_until(gate.unwrap_or_else(Instant::now)), if gate.is_some() => {
                    manager.trigger_flush();
                }
            }
        }
        debug!("block sync manager stopped");
    });

    BlockSyncHandle {
        cmd_tx,
        events_tx,
        lifecycle_tx,
    }
}

impl BlockSyncHandle {
    /// Subscribes to manager events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Hook for the host's visibility/unload events.
    pub fn lifecycle_notifier(&self) -> LifecycleNotifier {
        LifecycleNotifier::new(self.lifecycle_tx.clone())
    }

    /// Queues one edit. Resolves as soon as the edit is coalesced; never waits on the network.
    pub async fn enqueue(&self, op: Operation) -> Result<EnqueueOutcome, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Enqueue { op, resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Cancels the not-yet-sent operation for `block_id`.
    pub async fn dequeue(&self, block_id: BlockId) -> Result<Option<Operation>, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Dequeue { block_id, resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Rewrites pending references from `temp` to `real`.
    ///
    /// The manager already does this for every acknowledged create.
    pub async fn remap_block_id(&self, temp: BlockId, real: BlockId) -> Result<usize, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Remap { temp, real, resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Flushes everything that is ready and resolves once those batches settle.
    pub async fn force_sync(&self) -> Result<FlushReport, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ForceSync { resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Requests a flush without waiting for it.
    pub fn request_sync(&self) -> Result<(), SyncError> {
        match self.cmd_tx.try_send(Command::RequestSync) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ChannelClosed),
        }
    }

    /// True when nothing is pending and nothing is in flight.
    pub async fn is_empty(&self) -> Result<bool, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::IsEmpty { resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Clones of the pending records in queue order.
    pub async fn pending_snapshot(&self) -> Result<Vec<Operation>, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PendingSnapshot { resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Number of pending operations, excluding the in-flight batch.
    pub async fn pending_len(&self) -> Result<usize, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PendingLen { resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Installs completion callbacks, replacing any previous set.
    pub async fn set_sync_callbacks(&self, callbacks: Arc<dyn SyncCallbacks>) -> Result<(), SyncError> {
        self.send_callbacks(Some(callbacks)).await
    }

    /// Removes completion callbacks.
    pub async fn clear_sync_callbacks(&self) -> Result<(), SyncError> {
        self.send_callbacks(None).await
    }

    async fn send_callbacks(&self, callbacks: Option<Arc<dyn SyncCallbacks>>) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetCallbacks { callbacks, resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Stops the manager: cancels timers and drops callbacks and lifecycle hooks.
    ///
    /// Pending operations are discarded; call [`Self::force_sync`] first to keep them.
    pub async fn destroy(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Destroy { resp: tx })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }
}

struct Manager<T: BatchTransport> {
    queue: SyncQueue,
    transport: Arc<T>,
    config: SyncConfig,
    events_tx: broadcast::Sender<SyncEvent>,
    done_tx: mpsc::UnboundedSender<FlushResult>,
    callbacks: Option<Arc<dyn SyncCallbacks>>,
    idle_deadline: Option<Instant>,
    /// A trigger arrived while a batch was in flight.
    trigger_pending: bool,
    force_waiters: Vec<oneshot::Sender<FlushReport>>,
    force_report: FlushReport,
}

impl<T: BatchTransport> Manager<T> {
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Enqueue { op, resp } => {
                let res = self.queue.enqueue(op).map_err(SyncError::from);
                match &res {
                    Ok(_) if self.queue.len() >= self.queue.config().max_batch_size => {
                        self.trigger_flush();
                    }
                    Ok(_) => {
                        self.idle_deadline = Some(Instant::now() + self.config.sync_interval());
                    }
                    Err(SyncError::Queue(QueueError::Backpressure { pending, limit })) => {
                        warn!("back-pressure: {pending} of {limit} operations pending, forcing flush");
                        self.trigger_flush();
                    }
                    Err(_) => {}
                }
                let _ = resp.send(res);
            }
            Command::Dequeue { block_id, resp } => {
                let _ = resp.send(self.queue.dequeue(&block_id));
            }
            Command::Remap { temp, real, resp } => {
                let n = self.queue.remap_block_id(&temp, &real);
                let _ = self.events_tx.send(SyncEvent::BlockRemapped { temp, real });
                let _ = resp.send(n);
            }
            Command::ForceSync { resp } => {
                self.force_waiters.push(resp);
                self.trigger_flush();
            }
            Command::RequestSync => self.trigger_flush(),
            Command::IsEmpty { resp } => {
                let _ = resp.send(self.queue.is_empty());
            }
            Command::PendingLen { resp } => {
                let _ = resp.send(self.queue.len());
            }
            Command::PendingSnapshot { resp } => {
                let _ = resp.send(self.queue.pending_snapshot());
            }
            Command::SetCallbacks { callbacks, resp } => {
                self.callbacks = callbacks;
                let _ = resp.send(());
            }
            Command::Destroy { resp } => {
                let discarded = self.queue.len();
                if let Some(batch) = self.queue.abandon_in_flight() {
                    debug!("abandoning in-flight batch of {} operation(s)", batch.len());
                }
                if discarded > 0 {
                    warn!("destroyed with {discarded} pending operation(s)");
                }
                self.idle_deadline = None;
                self.callbacks = None;
                self.force_waiters.clear();
                let _ = self.events_tx.send(SyncEvent::Destroyed { discarded });
                let _ = resp.send(());
                return true;
            }
        }
        false
    }

    fn on_lifecycle(&mut self, event: LifecycleEvent) {
        if event.forces_flush() {
            info!("lifecycle {event:?}: flushing pending operations");
            self.trigger_flush();
        }
    }

    /// Drains and dispatches the next batch, or defers until the in-flight one settles.
    fn trigger_flush(&mut self) {
        if self.queue.is_flushing() {
            self.trigger_pending = true;
            return;
        }
        self.trigger_pending = false;
        self.idle_deadline = None;

        let start = self.queue.begin_flush(Instant::now());
        for failure in &start.dropped {
            self.report_failure(failure);
        }
        if !self.force_waiters.is_empty() {
            self.force_report.dropped.extend(start.dropped);
        }

        match start.request {
            Some(request) => self.dispatch(request),
            None => {
                let report = std::mem::take(&mut self.force_report);
                for waiter in self.force_waiters.drain(..) {
                    let _ = waiter.send(report.clone());
                }
            }
        }
    }

    fn dispatch(&mut self, request: BatchSyncRequest) {
        let size = request.len();
        info!(
            "dispatching batch: {} create(s), {} update(s), {} delete(s)",
            request.creates.len(),
            request.updates.len(),
            request.deletes.len()
        );
        let _ = self.events_tx.send(SyncEvent::BatchDispatched { size });

        let transport = Arc::clone(&self.transport);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let call = tokio::spawn(async move { transport.send_batch(request).await });
            let result = match call.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Backend(format!("join error: {e}"))),
            };
            let _ = done_tx.send(result);
        });
    }

    fn on_flush_complete(&mut self, result: FlushResult) {
        if !self.queue.is_flushing() {
            debug!("ignoring completion of an abandoned batch");
            return;
        }
        if let Err(err) = &result {
            warn!("batch failed: {err}");
        }

        let now = Instant::now();
        let report = self.queue.complete_flush(result, now);
        info!(
            "batch settled: {} synced, {} retried, {} dropped",
            report.synced.len(),
            report.retried.len(),
            report.dropped.len()
        );

        for (temp, real) in &report.remapped {
            let _ = self.events_tx.send(SyncEvent::BlockRemapped {
                temp: temp.clone(),
                real: real.clone(),
            });
        }
        if !report.synced.is_empty() {
            if let (Some(callbacks), Some(response)) = (&self.callbacks, &report.response) {
                callbacks.on_sync_success(response);
            }
        }
        for retried in &report.retried {
            let _ = self.events_tx.send(SyncEvent::RetryScheduled {
                block_id: retried.block_id.clone(),
                attempt: retried.attempt,
                delay_ms: retried.delay.as_millis() as u64,
            });
        }
        for failure in &report.dropped {
            self.report_failure(failure);
        }
        let _ = self.events_tx.send(SyncEvent::BatchSettled {
            synced: report.synced.len(),
            retried: report.retried.len(),
            dropped: report.dropped.len(),
        });

        let forced = !self.force_waiters.is_empty();
        if forced {
            self.force_report.absorb(report);
        }

        if self.trigger_pending
            || forced
            || self.queue.ready_len(now) >= self.queue.config().max_batch_size
        {
            self.trigger_flush();
        } else if self.queue.ready_len(now) > 0 && self.idle_deadline.is_none() {
            self.idle_deadline = Some(now + self.config.sync_interval());
        }
    }

    fn report_failure(&self, failure: &SyncFailure) {
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_sync_error(failure);
        }
        let _ = self.events_tx.send(SyncEvent::OperationDropped {
            failure: failure.clone(),
        });
    }
}
