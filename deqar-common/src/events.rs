//! Post-commit registry events
//!
//! Events are emitted by the submission orchestrator only after a unit's
//! transaction has committed. Consumers (search index refresh, notification
//! mail, report file download) subscribe to the bus; delivery is
//! fire-and-forget with no ordering guarantee relative to later reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Registry event emitted after commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    /// A report and its institutions changed and should be re-indexed
    ReportCommitted {
        submission_id: Uuid,
        report_id: i64,
        institution_ids: Vec<i64>,
        flag_level: String,
        timestamp: DateTime<Utc>,
    },

    /// A new institution was created by a submission
    InstitutionCreated {
        institution_id: i64,
        deqar_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A report file has a source URL but no stored copy yet
    ReportFileDownloadRequested {
        report_id: i64,
        report_file_id: i64,
        url: String,
    },
}

/// Broadcast bus for registry events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RegistryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use deqar_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RegistryEvent,
    ) -> Result<usize, broadcast::error::SendError<RegistryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RegistryEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for registry event");
        }
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
