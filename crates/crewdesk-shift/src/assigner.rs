//! Shift creation, assignment and cancellation.
//!
//! Assignment is check-then-commit under three guards: per-technician
//! in-process locks taken in ascending id order, the store's own
//! transactional re-check, and (for SQLite) the overlap trigger. Any
//! conflicting technician rejects the whole request.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::events::{DomainEvent, EventBus};
use crewdesk_core::store::{ShiftStore, UserDirectory};
use crewdesk_core::types::{Role, Shift, ShiftKind, ShiftRef, ShiftStatus, TimeWindow, User};

use crate::conflict::find_conflicts;
use crate::error::{ShiftError, TechnicianConflict};
use crate::lifecycle::validate_transition;

/// Input for [`ShiftAssigner::create_shift`].
#[derive(Debug, Clone)]
pub struct NewShift {
    pub kind: ShiftKind,
    pub window: TimeWindow,
    pub staff_id: Option<Uuid>,
    /// Technicians pre-listed at creation; checked for conflicts.
    pub technician_ids: Vec<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub notes: String,
}

impl NewShift {
    pub fn new(kind: ShiftKind, window: TimeWindow) -> Self {
        Self {
            kind,
            window,
            staff_id: None,
            technician_ids: Vec::new(),
            appointment_id: None,
            notes: String::new(),
        }
    }
}

/// Input for [`ShiftAssigner::assign`] and [`ShiftAssigner::reassign`].
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub shift_id: Uuid,
    pub assignee_id: Uuid,
    pub staff_id: Uuid,
    pub technician_ids: Vec<Uuid>,
    pub window: TimeWindow,
}

/// Lazily created mutex per technician.
#[derive(Default)]
struct TechnicianLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TechnicianLocks {
    /// Lock handles for `technicians`, in ascending id order.
    fn handles(&self, technicians: &[Uuid]) -> Result<Vec<Arc<Mutex<()>>>, CrewError> {
        let mut ids = technicians.to_vec();
        ids.sort();
        ids.dedup();

        let mut locks = self
            .locks
            .lock()
            .map_err(|e| CrewError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(ids
            .into_iter()
            .map(|id| Arc::clone(locks.entry(id).or_default()))
            .collect())
    }
}

fn acquire(handles: &[Arc<Mutex<()>>]) -> Vec<MutexGuard<'_, ()>> {
    // The guarded data is (), so a poisoned lock carries no broken state.
    handles
        .iter()
        .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
        .collect()
}

/// Collapse duplicates, keeping first-seen order.
fn dedupe(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Transactional shift scheduling over a [`ShiftStore`].
pub struct ShiftAssigner {
    store: Arc<dyn ShiftStore>,
    directory: Arc<dyn UserDirectory>,
    events: EventBus,
    locks: TechnicianLocks,
}

impl ShiftAssigner {
    pub fn new(
        store: Arc<dyn ShiftStore>,
        directory: Arc<dyn UserDirectory>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            directory,
            events,
            locks: TechnicianLocks::default(),
        }
    }

    /// Create a shift in `PendingAssignment`.
    pub fn create_shift(&self, request: NewShift) -> Result<Shift, ShiftError> {
        if let Some(staff_id) = request.staff_id {
            self.require_staff(staff_id)?;
        }
        let technicians = dedupe(&request.technician_ids);
        for technician in &technicians {
            self.require_technician(*technician)?;
        }

        let mut shift = Shift::pending(request.kind, request.window, request.staff_id);
        shift.technician_ids = technicians;
        shift.appointment_id = request.appointment_id;
        shift.notes = request.notes;

        let handles = self.locks.handles(&shift.technician_ids)?;
        let _guards = acquire(&handles);

        let conflicts = self.collect_conflicts(&shift.technician_ids, &shift.window, None)?;
        if !conflicts.is_empty() {
            warn!(technicians = conflicts.len(), "Shift creation rejected by conflicts");
            return Err(ShiftError::Conflict(conflicts));
        }

        self.store
            .insert_shift(&shift)
            .map_err(|e| self.overlap_to_conflict(e, &shift))?;

        info!(shift_id = %shift.id, kind = %shift.kind, window = %shift.window, "Shift created");
        self.events.publish(DomainEvent::ShiftCreated {
            shift_id: shift.id,
            window: shift.window,
            timestamp: Utc::now(),
        });
        Ok(shift)
    }

    /// Bind an assignee and technicians to a pending shift and move it to
    /// `Scheduled`. Rejected as a whole if any technician is double-booked.
    pub fn assign(&self, request: AssignRequest) -> Result<Shift, ShiftError> {
        self.commit(request, ShiftStatus::PendingAssignment)
    }

    /// Change the technicians, window or assignee of a `Scheduled` shift,
    /// through the same conflict check as [`assign`](Self::assign).
    pub fn reassign(&self, request: AssignRequest) -> Result<Shift, ShiftError> {
        self.commit(request, ShiftStatus::Scheduled)
    }

    fn commit(&self, request: AssignRequest, expected: ShiftStatus) -> Result<Shift, ShiftError> {
        let technicians = dedupe(&request.technician_ids);
        if technicians.is_empty() {
            return Err(ShiftError::InvalidRequest(
                "at least one technician is required".to_string(),
            ));
        }

        let current = self.load_live(request.shift_id)?;
        if current.status != expected {
            return Err(ShiftError::InvalidState(format!(
                "shift {} is {}, expected {}",
                current.id, current.status, expected
            )));
        }

        self.require_user(request.assignee_id)?;
        self.require_staff(request.staff_id)?;
        for technician in &technicians {
            self.require_technician(*technician)?;
        }

        let handles = self.locks.handles(&technicians)?;
        let _guards = acquire(&handles);

        let conflicts =
            self.collect_conflicts(&technicians, &request.window, Some(request.shift_id))?;
        if !conflicts.is_empty() {
            warn!(
                shift_id = %request.shift_id,
                technicians = conflicts.len(),
                "Assignment rejected by conflicts"
            );
            return Err(ShiftError::Conflict(conflicts));
        }

        let target = ShiftStatus::Scheduled;
        if expected != target {
            validate_transition(expected, target)?;
        }

        let mut updated = current;
        updated.assignee_id = Some(request.assignee_id);
        updated.staff_id = Some(request.staff_id);
        updated.technician_ids = technicians;
        updated.window = request.window;
        updated.status = target;
        updated.updated_at = Utc::now();

        self.store
            .commit_assignment(&updated, expected)
            .map_err(|e| match e {
                CrewError::StaleWrite(msg) => ShiftError::InvalidState(msg),
                other => self.overlap_to_conflict(other, &updated),
            })?;

        info!(
            shift_id = %updated.id,
            assignee_id = %request.assignee_id,
            technicians = updated.technician_ids.len(),
            window = %updated.window,
            "Shift assigned"
        );
        self.events.publish(DomainEvent::ShiftAssigned {
            shift_id: updated.id,
            assignee_id: request.assignee_id,
            technician_ids: updated.technician_ids.clone(),
            window: updated.window,
            timestamp: Utc::now(),
        });
        if expected != target {
            self.events.publish(DomainEvent::ShiftStatusChanged {
                shift_id: updated.id,
                from: expected,
                to: target,
                timestamp: Utc::now(),
            });
        }
        Ok(updated)
    }

    /// Move a non-terminal shift to `Cancelled`.
    pub fn cancel(&self, shift_id: Uuid) -> Result<Shift, ShiftError> {
        let mut shift = self.load_live(shift_id)?;
        let from = shift.status;
        validate_transition(from, ShiftStatus::Cancelled)?;

        if !self
            .store
            .transition_status(shift_id, from, ShiftStatus::Cancelled)?
        {
            return Err(ShiftError::InvalidState(format!(
                "shift {} changed while cancelling",
                shift_id
            )));
        }

        info!(shift_id = %shift_id, from = %from, "Shift cancelled");
        self.events.publish(DomainEvent::ShiftStatusChanged {
            shift_id,
            from,
            to: ShiftStatus::Cancelled,
            timestamp: Utc::now(),
        });
        shift.status = ShiftStatus::Cancelled;
        Ok(shift)
    }

    /// Flag a shift deleted. Its status is kept for audit.
    pub fn soft_delete(&self, shift_id: Uuid) -> Result<(), ShiftError> {
        if self.store.get_shift(shift_id)?.is_none() {
            return Err(ShiftError::NotFound(shift_id));
        }
        if !self.store.soft_delete(shift_id)? {
            return Err(ShiftError::InvalidState(format!(
                "shift {} is already deleted",
                shift_id
            )));
        }

        info!(shift_id = %shift_id, "Shift soft-deleted");
        self.events.publish(DomainEvent::ShiftDeleted {
            shift_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Shifts that would block `technician` from taking `window`.
    pub fn check_conflicts(
        &self,
        technician: Uuid,
        window: &TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<ShiftRef>, ShiftError> {
        Ok(find_conflicts(self.store.as_ref(), technician, window, exclude)?)
    }

    pub fn get(&self, shift_id: Uuid) -> Result<Shift, ShiftError> {
        self.store
            .get_shift(shift_id)?
            .ok_or(ShiftError::NotFound(shift_id))
    }

    fn load_live(&self, shift_id: Uuid) -> Result<Shift, ShiftError> {
        let shift = self.get(shift_id)?;
        if shift.is_deleted {
            return Err(ShiftError::InvalidState(format!(
                "shift {} is deleted",
                shift_id
            )));
        }
        Ok(shift)
    }

    fn collect_conflicts(
        &self,
        technicians: &[Uuid],
        window: &TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<TechnicianConflict>, ShiftError> {
        let mut conflicts = Vec::new();
        for technician in technicians {
            let blocking = find_conflicts(self.store.as_ref(), *technician, window, exclude)?;
            if !blocking.is_empty() {
                conflicts.push(TechnicianConflict {
                    technician_id: *technician,
                    blocking,
                });
            }
        }
        Ok(conflicts)
    }

    /// Translate a store-level overlap rejection into a reported conflict.
    ///
    /// Reaching this means another writer of the same store booked the
    /// technician after our in-process check.
    fn overlap_to_conflict(&self, err: CrewError, shift: &Shift) -> ShiftError {
        match err {
            CrewError::IntervalOverlap { technician, .. } => {
                debug!(shift_id = %shift.id, technician_id = %technician, "Store rejected overlap");
                match self.collect_conflicts(&shift.technician_ids, &shift.window, Some(shift.id)) {
                    Ok(conflicts) if !conflicts.is_empty() => ShiftError::Conflict(conflicts),
                    Ok(_) => ShiftError::Conflict(vec![TechnicianConflict {
                        technician_id: technician,
                        blocking: Vec::new(),
                    }]),
                    Err(e) => e,
                }
            }
            other => ShiftError::Storage(other),
        }
    }

    fn require_user(&self, id: Uuid) -> Result<User, ShiftError> {
        match self.directory.get_user(id)? {
            Some(user) if !user.is_deleted => Ok(user),
            _ => Err(ShiftError::UserNotFound(id)),
        }
    }

    fn require_staff(&self, id: Uuid) -> Result<User, ShiftError> {
        let user = self.require_user(id)?;
        if !user.role.is_staff_capable() {
            return Err(ShiftError::InvalidRequest(format!(
                "user {} ({}) cannot manage shifts",
                id, user.role
            )));
        }
        Ok(user)
    }

    fn require_technician(&self, id: Uuid) -> Result<User, ShiftError> {
        let user = self.require_user(id)?;
        if user.role != Role::Technician {
            return Err(ShiftError::InvalidRequest(format!(
                "user {} ({}) is not a technician",
                id, user.role
            )));
        }
        Ok(user)
    }
}
