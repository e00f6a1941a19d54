//! Best-effort flush triggers driven by the host's page lifecycle.
//!
//! The host (a webview bridge, a desktop window, a CLI signal handler) owns the
//! actual visibility and unload hooks and forwards them through a
//! [`FlushTrigger`]. Delivery of the resulting request is not guaranteed once
//! the host starts tearing down.

use log::debug;
use tokio::sync::mpsc;

/// Host lifecycle transitions the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The page was hidden (tab switch, minimize).
    VisibilityHidden,
    /// The page became visible again.
    VisibilityVisible,
    /// The page is about to unload or navigate away.
    BeforeUnload,
}

impl LifecycleEvent {
    /// Whether this transition should force a flush.
    pub fn forces_flush(self) -> bool {
        matches!(self, Self::VisibilityHidden | Self::BeforeUnload)
    }
}

/// Injected hook for lifecycle-driven flushes.
pub trait FlushTrigger: Send + Sync {
    /// Forwards `event`; returns false when the manager is gone or saturated.
    fn notify(&self, event: LifecycleEvent) -> bool;
}

/// [`FlushTrigger`] wired to a running sync manager.
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl LifecycleNotifier {
    pub(crate) fn new(tx: mpsc::Sender<LifecycleEvent>) -> Self {
        Self { tx }
    }
}

impl FlushTrigger for LifecycleNotifier {
    fn notify(&self, event: LifecycleEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Events already queued are still processed.
                debug!("lifecycle channel full, dropping {event:?}");
                event.forces_flush()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
