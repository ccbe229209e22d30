//! Persistence contracts consumed by the scheduling and chat engines.
//!
//! Implementations live in `crewdesk-storage` (SQLite and in-memory). Every
//! write method is its own transaction: implementations must perform any
//! read-then-write inside one atomic unit.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::Result;
use crate::types::{ChatAssignment, Shift, ShiftStatus, User};

/// Read-only view of shift intervals per technician.
pub trait IntervalStore: Send + Sync {
    /// Shifts listing `technician` that are active, not soft-deleted and not
    /// cancelled.
    fn blocking_shifts_for(&self, technician: Uuid) -> Result<Vec<Shift>>;
}

/// Full shift persistence.
pub trait ShiftStore: IntervalStore {
    fn insert_shift(&self, shift: &Shift) -> Result<()>;

    /// Fetch a shift by id, including soft-deleted rows.
    fn get_shift(&self, id: Uuid) -> Result<Option<Shift>>;

    /// Non-deleted shifts whose status is one of `statuses`.
    fn shifts_with_status(&self, statuses: &[ShiftStatus]) -> Result<Vec<Shift>>;

    /// Persist assignee, technicians, window and status of `shift` atomically.
    ///
    /// Fails with `StaleWrite` when the stored row is not in `expected` status
    /// (or is soft-deleted), and with `IntervalOverlap` when any listed
    /// technician is already booked by another blocking shift.
    fn commit_assignment(&self, shift: &Shift, expected: ShiftStatus) -> Result<()>;

    /// Compare-and-set status change. Returns `false` when the stored status
    /// is no longer `from` or the shift is soft-deleted.
    fn transition_status(&self, id: Uuid, from: ShiftStatus, to: ShiftStatus) -> Result<bool>;

    /// Set the soft-delete flag. Returns `false` if already deleted.
    fn soft_delete(&self, id: Uuid) -> Result<bool>;
}

/// Single-active-assignment-per-customer ledger.
pub trait AssignmentLedger: Send + Sync {
    fn active_for_customer(&self, customer: Uuid) -> Result<Option<ChatAssignment>>;

    fn active_for_staff(&self, staff: Uuid) -> Result<Vec<ChatAssignment>>;

    /// Active row counts per staff member. Every id in `staff` is present in the
    /// result, with zero when it holds no assignment.
    fn active_counts(&self, staff: &[Uuid]) -> Result<HashMap<Uuid, usize>>;

    /// Insert a new active row. Fails with `UniqueViolation` when the customer
    /// already has one.
    fn insert_active(&self, assignment: &ChatAssignment) -> Result<()>;

    /// Deactivate the customer's active row (if any) and insert `replacement`
    /// in one transaction. With `expected` set, the current active row must
    /// have that id, otherwise `StaleWrite`. Returns the deactivated row.
    fn replace_active(
        &self,
        customer: Uuid,
        expected: Option<Uuid>,
        replacement: &ChatAssignment,
    ) -> Result<Option<ChatAssignment>>;

    /// Deactivate the customer's active row. Returns it, or `None` when the
    /// customer had no active assignment.
    fn deactivate_active(&self, customer: Uuid) -> Result<Option<ChatAssignment>>;

    /// Every row for the customer, oldest first.
    fn history(&self, customer: Uuid) -> Result<Vec<ChatAssignment>>;
}

/// User directory and presence flag.
pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Staff-capable, not soft-deleted users whose online flag is set.
    fn online_staff(&self) -> Result<Vec<User>>;

    /// Write the online flag. Returns the previous value, or `None` if the user
    /// does not exist.
    fn set_online(&self, id: Uuid, online: bool) -> Result<Option<bool>>;
}
