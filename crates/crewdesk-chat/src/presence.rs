//! Online/offline tracking driven by session connect and disconnect signals.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::UserDirectory;

use crate::error::ChatError;
use crate::failover::FailoverQueue;

/// Current-state presence over the user directory's online flag.
///
/// Only a real online-to-offline flip of a staff-capable user queues a
/// failover; repeated signals are no-ops.
pub struct PresenceTracker {
    directory: Arc<dyn UserDirectory>,
    events: EventBus,
    failover: Option<FailoverQueue>,
}

impl PresenceTracker {
    pub fn new(directory: Arc<dyn UserDirectory>, events: EventBus) -> Self {
        Self {
            directory,
            events,
            failover: None,
        }
    }

    /// Queue failover jobs for staff who go offline.
    pub fn with_failover(mut self, queue: FailoverQueue) -> Self {
        self.failover = Some(queue);
        self
    }

    /// Mark a user online. Returns whether the flag changed.
    pub fn set_online(&self, user_id: Uuid) -> Result<bool, ChatError> {
        let previous = self
            .directory
            .set_online(user_id, true)?
            .ok_or(ChatError::UserNotFound(user_id))?;
        if previous {
            debug!(user_id = %user_id, "Already online");
            return Ok(false);
        }

        info!(user_id = %user_id, "User online");
        self.publish(user_id, true);
        Ok(true)
    }

    /// Mark a user offline. Returns whether the flag changed.
    pub fn set_offline(&self, user_id: Uuid) -> Result<bool, ChatError> {
        let user = self
            .directory
            .get_user(user_id)?
            .ok_or(ChatError::UserNotFound(user_id))?;
        let previous = self
            .directory
            .set_online(user_id, false)?
            .ok_or(ChatError::UserNotFound(user_id))?;
        if !previous {
            debug!(user_id = %user_id, "Already offline");
            return Ok(false);
        }

        info!(user_id = %user_id, role = %user.role, "User offline");
        self.publish(user_id, false);

        if user.role.is_staff_capable() {
            match &self.failover {
                Some(queue) => {
                    if let Err(e) = queue.enqueue(user_id) {
                        warn!(staff_id = %user_id, error = %e, "Failover not queued, customers left in place");
                    }
                }
                None => debug!(staff_id = %user_id, "No failover queue attached"),
            }
        }
        Ok(true)
    }

    pub fn is_online(&self, user_id: Uuid) -> Result<bool, ChatError> {
        self.directory
            .get_user(user_id)?
            .map(|u| u.online)
            .ok_or(ChatError::UserNotFound(user_id))
    }

    fn publish(&self, user_id: Uuid, online: bool) {
        self.events.publish(DomainEvent::PresenceChanged {
            user_id,
            online,
            timestamp: Utc::now(),
        });
    }
}
