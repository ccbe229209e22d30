//! In-memory store implementations.
//!
//! Same contracts as the SQLite repositories, backed by `Mutex<Vec<_>>`.
//! Each write holds the lock for its whole read-check-write sequence, which
//! gives the same atomicity the SQLite versions get from a transaction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::store::{AssignmentLedger, IntervalStore, ShiftStore, UserDirectory};
use crewdesk_core::types::{ChatAssignment, Shift, ShiftStatus, User};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, CrewError> {
    mutex
        .lock()
        .map_err(|e| CrewError::Storage(format!("Lock poisoned: {}", e)))
}

/// Ids of blocking shifts, other than `candidate` itself, that list
/// `technician` and overlap the candidate's window.
fn overlapping_ids(shifts: &[Shift], candidate: &Shift, technician: Uuid) -> Vec<Uuid> {
    shifts
        .iter()
        .filter(|s| s.id != candidate.id)
        .filter(|s| s.blocks_technicians() && s.lists_technician(technician))
        .filter(|s| s.window.overlaps(&candidate.window))
        .map(|s| s.id)
        .collect()
}

fn check_no_overlap(shifts: &[Shift], candidate: &Shift) -> Result<(), CrewError> {
    if !candidate.blocks_technicians() {
        return Ok(());
    }
    for technician in &candidate.technician_ids {
        let blocking = overlapping_ids(shifts, candidate, *technician);
        if !blocking.is_empty() {
            return Err(CrewError::IntervalOverlap {
                technician: *technician,
                blocking,
            });
        }
    }
    Ok(())
}

// =============================================================================
// Shifts
// =============================================================================

#[derive(Default)]
pub struct MemoryShiftStore {
    shifts: Mutex<Vec<Shift>>,
}

impl MemoryShiftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntervalStore for MemoryShiftStore {
    fn blocking_shifts_for(&self, technician: Uuid) -> Result<Vec<Shift>, CrewError> {
        let shifts = lock(&self.shifts)?;
        let mut found: Vec<Shift> = shifts
            .iter()
            .filter(|s| s.blocks_technicians() && s.lists_technician(technician))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.window.start());
        Ok(found)
    }
}

impl ShiftStore for MemoryShiftStore {
    fn insert_shift(&self, shift: &Shift) -> Result<(), CrewError> {
        let mut shifts = lock(&self.shifts)?;
        if shifts.iter().any(|s| s.id == shift.id) {
            return Err(CrewError::UniqueViolation(format!(
                "shift {} already exists",
                shift.id
            )));
        }
        check_no_overlap(&shifts, shift)?;
        shifts.push(shift.clone());
        Ok(())
    }

    fn get_shift(&self, id: Uuid) -> Result<Option<Shift>, CrewError> {
        let shifts = lock(&self.shifts)?;
        Ok(shifts.iter().find(|s| s.id == id).cloned())
    }

    fn shifts_with_status(&self, statuses: &[ShiftStatus]) -> Result<Vec<Shift>, CrewError> {
        let shifts = lock(&self.shifts)?;
        let mut found: Vec<Shift> = shifts
            .iter()
            .filter(|s| !s.is_deleted && statuses.contains(&s.status))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.window.start());
        Ok(found)
    }

    fn commit_assignment(&self, shift: &Shift, expected: ShiftStatus) -> Result<(), CrewError> {
        let mut shifts = lock(&self.shifts)?;
        let index = shifts
            .iter()
            .position(|s| s.id == shift.id)
            .ok_or_else(|| CrewError::StaleWrite(format!("shift {} no longer exists", shift.id)))?;

        let current = &shifts[index];
        if current.is_deleted {
            return Err(CrewError::StaleWrite(format!("shift {} was deleted", shift.id)));
        }
        if current.status != expected {
            return Err(CrewError::StaleWrite(format!(
                "shift {} is {}, expected {}",
                shift.id, current.status, expected
            )));
        }

        check_no_overlap(&shifts, shift)?;
        shifts[index] = shift.clone();
        Ok(())
    }

    fn transition_status(
        &self,
        id: Uuid,
        from: ShiftStatus,
        to: ShiftStatus,
    ) -> Result<bool, CrewError> {
        let mut shifts = lock(&self.shifts)?;
        match shifts
            .iter_mut()
            .find(|s| s.id == id && !s.is_deleted && s.status == from)
        {
            Some(shift) => {
                shift.status = to;
                shift.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn soft_delete(&self, id: Uuid) -> Result<bool, CrewError> {
        let mut shifts = lock(&self.shifts)?;
        match shifts.iter_mut().find(|s| s.id == id && !s.is_deleted) {
            Some(shift) => {
                shift.is_deleted = true;
                shift.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Chat assignments
// =============================================================================

#[derive(Default)]
pub struct MemoryAssignmentLedger {
    rows: Mutex<Vec<ChatAssignment>>,
}

impl MemoryAssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deactivate(row: &mut ChatAssignment) -> ChatAssignment {
    row.is_active = false;
    row.deactivated_at = Some(Utc::now());
    row.clone()
}

impl AssignmentLedger for MemoryAssignmentLedger {
    fn active_for_customer(&self, customer: Uuid) -> Result<Option<ChatAssignment>, CrewError> {
        let rows = lock(&self.rows)?;
        Ok(rows
            .iter()
            .find(|a| a.customer_id == customer && a.is_live())
            .cloned())
    }

    fn active_for_staff(&self, staff: Uuid) -> Result<Vec<ChatAssignment>, CrewError> {
        let rows = lock(&self.rows)?;
        Ok(rows
            .iter()
            .filter(|a| a.staff_id == staff && a.is_live())
            .cloned()
            .collect())
    }

    fn active_counts(&self, staff: &[Uuid]) -> Result<HashMap<Uuid, usize>, CrewError> {
        let rows = lock(&self.rows)?;
        let mut counts: HashMap<Uuid, usize> = staff.iter().map(|id| (*id, 0)).collect();
        for row in rows.iter().filter(|a| a.is_live()) {
            if let Some(slot) = counts.get_mut(&row.staff_id) {
                *slot += 1;
            }
        }
        Ok(counts)
    }

    fn insert_active(&self, assignment: &ChatAssignment) -> Result<(), CrewError> {
        let mut rows = lock(&self.rows)?;
        if rows
            .iter()
            .any(|a| a.customer_id == assignment.customer_id && a.is_live())
        {
            return Err(CrewError::UniqueViolation(format!(
                "customer {} already has an active assignment",
                assignment.customer_id
            )));
        }
        rows.push(assignment.clone());
        Ok(())
    }

    fn replace_active(
        &self,
        customer: Uuid,
        expected: Option<Uuid>,
        replacement: &ChatAssignment,
    ) -> Result<Option<ChatAssignment>, CrewError> {
        let mut rows = lock(&self.rows)?;
        let current = rows
            .iter()
            .position(|a| a.customer_id == customer && a.is_live());

        if let Some(expected_id) = expected {
            if current.map(|i| rows[i].id) != Some(expected_id) {
                return Err(CrewError::StaleWrite(format!(
                    "assignment {} is no longer active for customer {}",
                    expected_id, customer
                )));
            }
        }

        let previous = current.map(|i| deactivate(&mut rows[i]));
        rows.push(replacement.clone());
        Ok(previous)
    }

    fn deactivate_active(&self, customer: Uuid) -> Result<Option<ChatAssignment>, CrewError> {
        let mut rows = lock(&self.rows)?;
        Ok(rows
            .iter_mut()
            .find(|a| a.customer_id == customer && a.is_live())
            .map(deactivate))
    }

    fn history(&self, customer: Uuid) -> Result<Vec<ChatAssignment>, CrewError> {
        let rows = lock(&self.rows)?;
        Ok(rows
            .iter()
            .filter(|a| a.customer_id == customer)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user record.
    pub fn insert(&self, user: User) -> Result<(), CrewError> {
        lock(&self.users)?.insert(user.id, user);
        Ok(())
    }
}

impl UserDirectory for MemoryDirectory {
    fn get_user(&self, id: Uuid) -> Result<Option<User>, CrewError> {
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    fn online_staff(&self) -> Result<Vec<User>, CrewError> {
        let users = lock(&self.users)?;
        let mut staff: Vec<User> = users
            .values()
            .filter(|u| u.role.is_staff_capable() && u.online && !u.is_deleted)
            .cloned()
            .collect();
        staff.sort_by_key(|u| u.id);
        Ok(staff)
    }

    fn set_online(&self, id: Uuid, online: bool) -> Result<Option<bool>, CrewError> {
        let mut users = lock(&self.users)?;
        Ok(users
            .get_mut(&id)
            .map(|user| std::mem::replace(&mut user.online, online)))
    }
}
