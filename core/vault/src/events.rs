//! Session lifecycle events.

use serde::Serialize;
use tokio::sync::broadcast;

use sealvault_common::VaultId;

/// Events are dropped for subscribers lagging more than this many behind.
const EVENT_CAPACITY: usize = 64;

/// Notification emitted by [`crate::SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A vault was unlocked. `is_decoy` is for local diagnostics only and
    /// must never be shown to the user.
    Unlocked {
        vault_id: VaultId,
        name: String,
        is_decoy: bool,
    },
    Locked,
    /// The unlocked vault's contents changed.
    Changed { vault_id: VaultId },
    /// A background action failed. `message` is user-safe.
    Error { action: String, message: String },
    AutoLockWarning { seconds_remaining: u64 },
    Nuked { vault_id: VaultId },
}

/// Fan-out channel for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(SessionEvent::Locked);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Locked);
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new().emit(SessionEvent::Locked);
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_value(SessionEvent::AutoLockWarning {
            seconds_remaining: 30,
        })
        .unwrap();
        assert_eq!(json["event"], "auto_lock_warning");
        assert_eq!(json["seconds_remaining"], 30);
    }
}
