use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{AssignmentOrigin, ShiftStatus, TimeWindow};

/// All domain events emitted by the scheduling and chat engines.
///
/// Events are published on the [`EventBus`] after a state change has been
/// committed and consumed by:
/// - The notification/session layer (to tell affected users)
/// - The event log (for audit/debugging)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Shift Events
    // =========================================================================
    /// A shift was created in `PendingAssignment`.
    ShiftCreated {
        shift_id: Uuid,
        window: TimeWindow,
        timestamp: DateTime<Utc>,
    },

    /// Technicians and an assignee were bound to a shift.
    ShiftAssigned {
        shift_id: Uuid,
        assignee_id: Uuid,
        technician_ids: Vec<Uuid>,
        window: TimeWindow,
        timestamp: DateTime<Utc>,
    },

    /// A shift moved between lifecycle states.
    ShiftStatusChanged {
        shift_id: Uuid,
        from: ShiftStatus,
        to: ShiftStatus,
        timestamp: DateTime<Utc>,
    },

    /// A shift reached its start time without anyone assigned.
    ShiftLateAssignment {
        shift_id: Uuid,
        start: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A shift was soft-deleted.
    ShiftDeleted {
        shift_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Chat Assignment Events
    // =========================================================================
    /// A customer's chat is now owned by `staff_id`.
    ChatAssigned {
        assignment_id: Uuid,
        customer_id: Uuid,
        staff_id: Uuid,
        previous_staff_id: Option<Uuid>,
        origin: AssignmentOrigin,
        timestamp: DateTime<Utc>,
    },

    /// A customer's active chat assignment was removed without replacement.
    ChatUnassigned {
        assignment_id: Uuid,
        customer_id: Uuid,
        staff_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Presence Events
    // =========================================================================
    /// A user's online flag flipped.
    PresenceChanged {
        user_id: Uuid,
        online: bool,
        timestamp: DateTime<Utc>,
    },

    /// A disconnected staff member's customers were processed.
    FailoverCompleted {
        staff_id: Uuid,
        reassigned: usize,
        skipped: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::ShiftCreated { timestamp, .. }
            | DomainEvent::ShiftAssigned { timestamp, .. }
            | DomainEvent::ShiftStatusChanged { timestamp, .. }
            | DomainEvent::ShiftLateAssignment { timestamp, .. }
            | DomainEvent::ShiftDeleted { timestamp, .. }
            | DomainEvent::ChatAssigned { timestamp, .. }
            | DomainEvent::ChatUnassigned { timestamp, .. }
            | DomainEvent::PresenceChanged { timestamp, .. }
            | DomainEvent::FailoverCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a short event name for logging and transport adapters.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::ShiftCreated { .. } => "shift_created",
            DomainEvent::ShiftAssigned { .. } => "shift_assigned",
            DomainEvent::ShiftStatusChanged { .. } => "shift_status_changed",
            DomainEvent::ShiftLateAssignment { .. } => "shift_late_assignment",
            DomainEvent::ShiftDeleted { .. } => "shift_deleted",
            DomainEvent::ChatAssigned { .. } => "chat_assigned",
            DomainEvent::ChatUnassigned { .. } => "chat_unassigned",
            DomainEvent::PresenceChanged { .. } => "presence_changed",
            DomainEvent::FailoverCompleted { .. } => "failover_completed",
        }
    }
}

/// Fan-out channel for [`DomainEvent`]s.
///
/// Cloning is cheap; all clones publish to the same subscribers. Publishing
/// never blocks and never fails: with no subscribers the event is dropped, and
/// slow subscribers observe `Lagged` on their receiver.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        let name = event.event_name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
