//! Event types for the txsync event system
//!
//! Provides the shared event enum and the broadcast EventBus used by the
//! sync orchestrator (producer) and the SSE endpoint (consumer).

use crate::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Sync run acquired the lock and started
    SyncStarted {
        run_id: Uuid,
        sources: Vec<SourceKind>,
        timestamp: DateTime<Utc>,
    },

    /// A start request found the lock held
    SyncBlocked {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A source phase started
    PhaseStarted {
        run_id: Uuid,
        source: SourceKind,
        timestamp: DateTime<Utc>,
    },

    /// A source phase was skipped because its snapshot hash is unchanged
    PhaseSkipped {
        run_id: Uuid,
        source: SourceKind,
        content_hash: String,
        timestamp: DateTime<Utc>,
    },

    /// A source phase finished (successfully or not)
    PhaseCompleted {
        run_id: Uuid,
        source: SourceKind,
        imported: usize,
        duplicates: usize,
        failed: usize,
        /// Error message when the phase failed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Overall progress changed
    SyncProgress {
        run_id: Uuid,
        current_phase: Option<SourceKind>,
        progress_percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// Sync run finished and released the lock
    SyncCompleted {
        run_id: Uuid,
        cancelled: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event type name (used as SSE event name)
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::SyncStarted { .. } => "SyncStarted",
            SyncEvent::SyncBlocked { .. } => "SyncBlocked",
            SyncEvent::PhaseStarted { .. } => "PhaseStarted",
            SyncEvent::PhaseSkipped { .. } => "PhaseSkipped",
            SyncEvent::PhaseCompleted { .. } => "PhaseCompleted",
            SyncEvent::SyncProgress { .. } => "SyncProgress",
            SyncEvent::SyncCompleted { .. } => "SyncCompleted",
        }
    }
}

/// Broadcast bus for sync events
///
/// # Examples
///
/// ```
/// use txsync_common::events::{EventBus, SyncEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SyncEvent::SyncBlocked {
///     reason: "sync already running".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(10);
        let result = bus.emit(SyncEvent::SyncBlocked {
            reason: "busy".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let run_id = Uuid::new_v4();
        bus.emit_lossy(SyncEvent::PhaseStarted {
            run_id,
            source: SourceKind::EmailProvider,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            SyncEvent::PhaseStarted { run_id: got, source, .. } => {
                assert_eq!(got, run_id);
                assert_eq!(source, SourceKind::EmailProvider);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_serialized_event_carries_type_tag() {
        let event = SyncEvent::PhaseSkipped {
            run_id: Uuid::nil(),
            source: SourceKind::DeviceBackup,
            content_hash: "abc".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PhaseSkipped");
        assert_eq!(json["source"], "device-backup");
        assert_eq!(event.event_type(), "PhaseSkipped");
    }
}
