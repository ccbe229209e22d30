//! Technician interval-conflict detection.

use std::sync::Arc;

use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::store::IntervalStore;
use crewdesk_core::types::{ShiftRef, TimeWindow};

/// Every blocking shift of `technician` overlapping `window`, ordered by
/// start time. `exclude` skips the shift being edited.
///
/// Candidates are shifts the store reports as blocking (active, not deleted,
/// not cancelled). Overlap is half-open, so touching windows never conflict.
pub fn find_conflicts<S: IntervalStore + ?Sized>(
    store: &S,
    technician: Uuid,
    window: &TimeWindow,
    exclude: Option<Uuid>,
) -> Result<Vec<ShiftRef>, CrewError> {
    let mut conflicts: Vec<ShiftRef> = store
        .blocking_shifts_for(technician)?
        .into_iter()
        .filter(|s| Some(s.id) != exclude)
        .filter(|s| s.blocks_technicians() && s.window.overlaps(window))
        .map(|s| s.to_ref())
        .collect();
    conflicts.sort_by_key(|s| (s.window.start(), s.id));
    Ok(conflicts)
}

/// Read-only conflict queries over a shared interval store.
#[derive(Clone)]
pub struct ConflictChecker {
    store: Arc<dyn IntervalStore>,
}

impl ConflictChecker {
    pub fn new(store: Arc<dyn IntervalStore>) -> Self {
        Self { store }
    }

    pub fn conflicts(
        &self,
        technician: Uuid,
        window: &TimeWindow,
        exclude: Option<Uuid>,
    ) -> Result<Vec<ShiftRef>, CrewError> {
        find_conflicts(self.store.as_ref(), technician, window, exclude)
    }

    pub fn is_free(&self, technician: Uuid, window: &TimeWindow) -> Result<bool, CrewError> {
        Ok(self.conflicts(technician, window, None)?.is_empty())
    }
}
