//! Single-slot rendezvous between the motion detector and the event
//! processor.
//!
//! The detector publishes a server-acknowledged event handle; the processor
//! blocks until one is available and consumes it exactly once. A `set`
//! happens-before the matching `wait_and_get` return. Nothing is persisted:
//! a handle lost to a crash is only the loss of local artifacts — the server
//! already holds the event record.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use tokio::sync::Notify;

/// A motion event acknowledged by the central server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEventHandle {
    /// Server-assigned identity; the device never fabricates ids.
    pub event_id: i64,
    /// Local detection time, reused for every artifact filename.
    pub timestamp: DateTime<Local>,
}

/// Single-producer/single-consumer slot with overwrite semantics.
///
/// `set` replaces any unconsumed value. The detector's cooldown (floor 17s,
/// well above the processing window) makes an unconsumed overwrite
/// unreachable in normal operation; when it does happen the older event's
/// artifacts are simply never produced, which matches the no-persistence
/// contract above.
#[derive(Debug, Default)]
pub struct MotionSignal {
    slot: Mutex<Option<MotionEventHandle>>,
    notify: Notify,
}

impl MotionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a handle. Non-blocking; overwrites an unconsumed value.
    pub fn set(&self, handle: MotionEventHandle) {
        let replaced = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(handle)
        };
        if let Some(old) = replaced {
            tracing::warn!(
                dropped_event_id = old.event_id,
                event_id = handle.event_id,
                "unconsumed motion event overwritten"
            );
        }
        self.notify.notify_one();
    }

    /// Block until a handle is available, then take it, clearing the slot.
    pub async fn wait_and_get(&self) -> MotionEventHandle {
        loop {
            // Arm the waiter before checking so a concurrent `set` between
            // the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(handle) = self
                .slot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                return handle;
            }
            notified.await;
        }
    }

    /// Discard any unconsumed handle, returning it. Used by a paused
    /// consumer to drop events that arrived while it was away.
    pub fn clear(&self) -> Option<MotionEventHandle> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
