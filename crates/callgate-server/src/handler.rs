//! Host application callbacks.

use crate::registry::ConnectionRecord;
use callgate_core::DisconnectReason;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Hooks the embedding application implements to build on connection events.
///
/// Every method defaults to a no-op. Callbacks run on the connection's task
/// and should not block; spawn for anything long-running.
pub trait ConnectionHandler: Send + Sync {
    /// Called once per admitted connection.
    fn on_connection(&self, _record: &Arc<ConnectionRecord>) {}

    /// Called for each text frame an admitted connection sends.
    fn on_message(&self, _record: &Arc<ConnectionRecord>, _text: &str) {}

    /// Called once per admitted connection when it ends.
    fn on_disconnect(&self, _record: &Arc<ConnectionRecord>, _reason: DisconnectReason) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

/// Run a host callback, turning a panic into `false`.
pub(crate) fn guarded<F: FnOnce()>(callback: &'static str, identity: &str, f: F) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(_) => {
            error!(callback, identity, "host callback panicked");
            false
        }
    }
}
