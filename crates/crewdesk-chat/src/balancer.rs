//! Least-loaded customer to staff chat assignment.
//!
//! Candidates are online, non-deleted staff-capable users. The pick is the
//! one with the fewest active assignments, ties broken by ascending user id.
//! An optional per-staff ceiling removes saturated staff from the pool.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::{AssignmentLedger, UserDirectory};
use crewdesk_core::types::{AssignmentOrigin, ChatAssignment, Role, User};

use crate::error::ChatError;

/// Active chat count for one online staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffLoad {
    pub staff_id: Uuid,
    pub name: String,
    pub active: usize,
}

pub struct ChatBalancer {
    ledger: Arc<dyn AssignmentLedger>,
    directory: Arc<dyn UserDirectory>,
    events: EventBus,
    max_active_per_staff: Option<usize>,
}

impl ChatBalancer {
    pub fn new(
        ledger: Arc<dyn AssignmentLedger>,
        directory: Arc<dyn UserDirectory>,
        events: EventBus,
    ) -> Self {
        Self {
            ledger,
            directory,
            events,
            max_active_per_staff: None,
        }
    }

    /// Cap the number of active chats a staff member may hold. `None`
    /// means unbounded.
    pub fn with_ceiling(mut self, max_active_per_staff: Option<usize>) -> Self {
        self.max_active_per_staff = max_active_per_staff;
        self
    }

    /// Return the customer's active assignment, creating one with the
    /// least-loaded online staff member if there is none.
    pub fn ensure_assigned(&self, customer_id: Uuid) -> Result<ChatAssignment, ChatError> {
        self.require_customer(customer_id)?;

        if let Some(existing) = self.ledger.active_for_customer(customer_id)? {
            debug!(customer_id = %customer_id, staff_id = %existing.staff_id, "Customer already assigned");
            return Ok(existing);
        }

        let staff_id = self
            .pick_staff(&[])?
            .ok_or(ChatError::NoCandidateAvailable(customer_id))?;
        let assignment = ChatAssignment::new(customer_id, staff_id, None);

        match self.ledger.insert_active(&assignment) {
            Ok(()) => {}
            Err(CrewError::UniqueViolation(_)) => {
                // Lost a race with another caller; theirs is the answer.
                debug!(customer_id = %customer_id, "Concurrent assignment won, re-reading");
                return self
                    .ledger
                    .active_for_customer(customer_id)?
                    .ok_or_else(|| {
                        ChatError::Storage(CrewError::StaleWrite(format!(
                            "active assignment for customer {} vanished",
                            customer_id
                        )))
                    });
            }
            Err(e) => return Err(e.into()),
        }

        info!(customer_id = %customer_id, staff_id = %staff_id, "Chat assigned automatically");
        self.publish_assigned(&assignment, None, AssignmentOrigin::Automatic);
        Ok(assignment)
    }

    /// Admin override for an unassigned customer. The staff member need not
    /// be online.
    pub fn assign_manually(
        &self,
        customer_id: Uuid,
        staff_id: Uuid,
        admin_id: Uuid,
    ) -> Result<ChatAssignment, ChatError> {
        self.require_customer(customer_id)?;
        self.require_staff(staff_id)?;
        self.require_staff(admin_id)?;

        if let Some(existing) = self.ledger.active_for_customer(customer_id)? {
            return Err(ChatError::AlreadyAssigned {
                customer_id,
                staff_id: existing.staff_id,
            });
        }

        let assignment = ChatAssignment::new(customer_id, staff_id, Some(admin_id));
        match self.ledger.insert_active(&assignment) {
            Ok(()) => {}
            Err(CrewError::UniqueViolation(_)) => {
                let winner = self.ledger.active_for_customer(customer_id)?;
                return Err(ChatError::AlreadyAssigned {
                    customer_id,
                    staff_id: winner.map(|a| a.staff_id).unwrap_or(staff_id),
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(customer_id = %customer_id, staff_id = %staff_id, admin_id = %admin_id, "Chat assigned manually");
        self.publish_assigned(&assignment, None, AssignmentOrigin::Manual);
        Ok(assignment)
    }

    /// Move a customer to `staff_id`, replacing any active assignment in one
    /// ledger transaction.
    pub fn reassign(
        &self,
        customer_id: Uuid,
        staff_id: Uuid,
        admin_id: Uuid,
    ) -> Result<ChatAssignment, ChatError> {
        self.require_customer(customer_id)?;
        self.require_staff(staff_id)?;
        self.require_staff(admin_id)?;

        let assignment = ChatAssignment::new(customer_id, staff_id, Some(admin_id));
        let previous = self.ledger.replace_active(customer_id, None, &assignment)?;
        let previous_staff = previous.map(|p| p.staff_id);

        info!(
            customer_id = %customer_id,
            staff_id = %staff_id,
            previous_staff_id = ?previous_staff,
            "Chat reassigned"
        );
        self.publish_assigned(&assignment, previous_staff, AssignmentOrigin::Manual);
        Ok(assignment)
    }

    /// Deactivate the customer's active assignment without a replacement.
    pub fn unassign(&self, customer_id: Uuid, admin_id: Uuid) -> Result<ChatAssignment, ChatError> {
        self.require_staff(admin_id)?;
        let removed = self
            .ledger
            .deactivate_active(customer_id)?
            .ok_or(ChatError::NotAssigned(customer_id))?;

        info!(customer_id = %customer_id, staff_id = %removed.staff_id, "Chat unassigned");
        self.events.publish(DomainEvent::ChatUnassigned {
            assignment_id: removed.id,
            customer_id,
            staff_id: removed.staff_id,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    /// Every assignment row for the customer, oldest first.
    pub fn history(&self, customer_id: Uuid) -> Result<Vec<ChatAssignment>, ChatError> {
        Ok(self.ledger.history(customer_id)?)
    }

    /// Active chat counts for online staff, least loaded first.
    pub fn staff_load(&self) -> Result<Vec<StaffLoad>, ChatError> {
        let online = self.directory.online_staff()?;
        let ids: Vec<Uuid> = online.iter().map(|u| u.id).collect();
        let counts = self.ledger.active_counts(&ids)?;

        let mut load: Vec<StaffLoad> = online
            .into_iter()
            .map(|u| StaffLoad {
                active: counts.get(&u.id).copied().unwrap_or(0),
                staff_id: u.id,
                name: u.name,
            })
            .collect();
        load.sort_by_key(|l| (l.active, l.staff_id));
        Ok(load)
    }

    /// Move one assignment off its staff member onto the least-loaded other
    /// online staff member.
    ///
    /// Returns `Ok(None)` when the row is no longer the customer's active
    /// assignment (someone else moved it first).
    pub fn fail_over(&self, current: &ChatAssignment) -> Result<Option<ChatAssignment>, ChatError> {
        let staff_id = self
            .pick_staff(&[current.staff_id])?
            .ok_or(ChatError::NoCandidateAvailable(current.customer_id))?;

        let replacement = ChatAssignment::new(current.customer_id, staff_id, None)
            .with_notes(format!("failover from {}", current.staff_id));

        match self
            .ledger
            .replace_active(current.customer_id, Some(current.id), &replacement)
        {
            Ok(_) => {}
            Err(CrewError::StaleWrite(reason)) => {
                debug!(customer_id = %current.customer_id, %reason, "Assignment moved concurrently, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        self.publish_assigned(&replacement, Some(current.staff_id), AssignmentOrigin::Failover);
        Ok(Some(replacement))
    }

    /// Least-loaded online staff member not in `exclude`.
    fn pick_staff(&self, exclude: &[Uuid]) -> Result<Option<Uuid>, ChatError> {
        let candidates: Vec<Uuid> = self
            .directory
            .online_staff()?
            .into_iter()
            .filter(|u| u.role.is_staff_capable() && !u.is_deleted)
            .map(|u| u.id)
            .filter(|id| !exclude.contains(id))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let counts = self.ledger.active_counts(&candidates)?;
        let pick = candidates
            .into_iter()
            .map(|id| (counts.get(&id).copied().unwrap_or(0), id))
            .filter(|(count, _)| self.max_active_per_staff.map_or(true, |max| *count < max))
            .min()
            .map(|(_, id)| id);

        if pick.is_none() {
            warn!("All online staff are at their chat ceiling");
        }
        Ok(pick)
    }

    fn publish_assigned(
        &self,
        assignment: &ChatAssignment,
        previous_staff_id: Option<Uuid>,
        origin: AssignmentOrigin,
    ) {
        self.events.publish(DomainEvent::ChatAssigned {
            assignment_id: assignment.id,
            customer_id: assignment.customer_id,
            staff_id: assignment.staff_id,
            previous_staff_id,
            origin,
            timestamp: assignment.assigned_at,
        });
    }

    fn require_user(&self, id: Uuid) -> Result<User, ChatError> {
        match self.directory.get_user(id)? {
            Some(user) if !user.is_deleted => Ok(user),
            _ => Err(ChatError::UserNotFound(id)),
        }
    }

    fn require_customer(&self, id: Uuid) -> Result<User, ChatError> {
        let user = self.require_user(id)?;
        if user.role != Role::Customer {
            return Err(ChatError::NotCustomer(id));
        }
        Ok(user)
    }

    fn require_staff(&self, id: Uuid) -> Result<User, ChatError> {
        let user = self.require_user(id)?;
        if !user.role.is_staff_capable() {
            return Err(ChatError::NotStaff(id));
        }
        Ok(user)
    }
}
