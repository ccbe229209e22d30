//! Shift state machine with validated transitions.
//!
//! PendingAssignment -> Scheduled -> InProgress -> Completed
//! any non-terminal -> Cancelled

use chrono::{DateTime, Utc};

use crewdesk_core::types::{Shift, ShiftStatus};

use crate::error::ShiftError;

/// Validate that a status transition is allowed.
///
/// Valid transitions:
/// - PendingAssignment -> Scheduled (assignment committed)
/// - Scheduled -> InProgress (sweep, `now >= start`)
/// - InProgress -> Completed (sweep, `now >= end`)
/// - PendingAssignment | Scheduled | InProgress -> Cancelled
pub fn validate_transition(from: ShiftStatus, to: ShiftStatus) -> Result<(), ShiftError> {
    let valid = matches!(
        (from, to),
        (ShiftStatus::PendingAssignment, ShiftStatus::Scheduled)
            | (ShiftStatus::Scheduled, ShiftStatus::InProgress)
            | (ShiftStatus::InProgress, ShiftStatus::Completed)
    ) || (to == ShiftStatus::Cancelled && !from.is_terminal());

    if valid {
        Ok(())
    } else {
        Err(ShiftError::InvalidTransition(from, to))
    }
}

/// What the sweep should do with a shift at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Unchanged,
    Advance(ShiftStatus),
    /// Start time reached with nobody bound. Reported, never auto-advanced.
    LateAssignment,
}

/// Decide the next time-driven step for `shift`.
pub fn evaluate(shift: &Shift, now: DateTime<Utc>) -> Evaluation {
    if shift.is_deleted || !shift.is_active {
        return Evaluation::Unchanged;
    }
    let window = shift.window;
    match shift.status {
        ShiftStatus::PendingAssignment if now >= window.start() => Evaluation::LateAssignment,
        ShiftStatus::Scheduled if now >= window.start() => {
            Evaluation::Advance(ShiftStatus::InProgress)
        }
        ShiftStatus::InProgress if now >= window.end() => {
            Evaluation::Advance(ShiftStatus::Completed)
        }
        _ => Evaluation::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crewdesk_core::types::{ShiftKind, TimeWindow};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    fn shift(status: ShiftStatus) -> Shift {
        let window = TimeWindow::new(at(9), at(12)).unwrap();
        let mut shift = Shift::pending(ShiftKind::RoutineDuty, window, None);
        shift.status = status;
        shift
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    #[test]
    fn test_forward_path_is_valid() {
        assert!(validate_transition(ShiftStatus::PendingAssignment, ShiftStatus::Scheduled).is_ok());
        assert!(validate_transition(ShiftStatus::Scheduled, ShiftStatus::InProgress).is_ok());
        assert!(validate_transition(ShiftStatus::InProgress, ShiftStatus::Completed).is_ok());
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for from in [
            ShiftStatus::PendingAssignment,
            ShiftStatus::Scheduled,
            ShiftStatus::InProgress,
        ] {
            assert!(validate_transition(from, ShiftStatus::Cancelled).is_ok());
        }
        assert!(validate_transition(ShiftStatus::Completed, ShiftStatus::Cancelled).is_err());
        assert!(validate_transition(ShiftStatus::Cancelled, ShiftStatus::Cancelled).is_err());
    }

    #[test]
    fn test_skips_and_reversals_invalid() {
        assert!(validate_transition(ShiftStatus::PendingAssignment, ShiftStatus::InProgress).is_err());
        assert!(validate_transition(ShiftStatus::Scheduled, ShiftStatus::Completed).is_err());
        assert!(validate_transition(ShiftStatus::InProgress, ShiftStatus::Scheduled).is_err());
        assert!(validate_transition(ShiftStatus::Completed, ShiftStatus::InProgress).is_err());
    }

    #[test]
    fn test_all_valid_transitions_count() {
        let mut valid = 0;
        for from in ShiftStatus::ALL {
            for to in ShiftStatus::ALL {
                if validate_transition(from, to).is_ok() {
                    valid += 1;
                }
            }
        }
        assert_eq!(valid, 6);
    }

    #[test]
    fn test_invalid_transition_error_names_states() {
        let err = validate_transition(ShiftStatus::Completed, ShiftStatus::Scheduled).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("scheduled"));
    }

    // =====================================================================
    // Evaluation
    // =====================================================================

    #[test]
    fn test_pending_before_start_unchanged() {
        assert_eq!(
            evaluate(&shift(ShiftStatus::PendingAssignment), at(8)),
            Evaluation::Unchanged
        );
    }

    #[test]
    fn test_pending_at_start_is_late() {
        assert_eq!(
            evaluate(&shift(ShiftStatus::PendingAssignment), at(9)),
            Evaluation::LateAssignment
        );
        assert_eq!(
            evaluate(&shift(ShiftStatus::PendingAssignment), at(13)),
            Evaluation::LateAssignment
        );
    }

    #[test]
    fn test_scheduled_starts_at_start() {
        assert_eq!(
            evaluate(&shift(ShiftStatus::Scheduled), at(9)),
            Evaluation::Advance(ShiftStatus::InProgress)
        );
        assert_eq!(
            evaluate(&shift(ShiftStatus::Scheduled), at(8)),
            Evaluation::Unchanged
        );
    }

    #[test]
    fn test_in_progress_completes_at_end() {
        assert_eq!(
            evaluate(&shift(ShiftStatus::InProgress), at(11)),
            Evaluation::Unchanged
        );
        assert_eq!(
            evaluate(&shift(ShiftStatus::InProgress), at(12)),
            Evaluation::Advance(ShiftStatus::Completed)
        );
    }

    #[test]
    fn test_terminal_and_deleted_unchanged() {
        assert_eq!(
            evaluate(&shift(ShiftStatus::Completed), at(20)),
            Evaluation::Unchanged
        );
        assert_eq!(
            evaluate(&shift(ShiftStatus::Cancelled), at(20)),
            Evaluation::Unchanged
        );

        let mut deleted = shift(ShiftStatus::Scheduled);
        deleted.is_deleted = true;
        assert_eq!(evaluate(&deleted, at(10)), Evaluation::Unchanged);
    }
}
