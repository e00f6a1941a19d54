//! Single-writer sync manager, callbacks, lifecycle hooks, and events.

/// Completion callbacks.
pub mod callbacks;
/// Event stream types emitted by the manager.
pub mod events;
/// Handle, configuration, and manager loop.
pub mod handle;
/// Host lifecycle flush triggers.
pub mod lifecycle;
