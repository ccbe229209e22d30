//! Error types for the scheduling engine.

use std::fmt;

use crewdesk_core::error::CrewError;
use crewdesk_core::types::{ShiftRef, ShiftStatus};
use uuid::Uuid;

/// One technician that cannot take the requested window, with the shifts
/// that already hold it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicianConflict {
    pub technician_id: Uuid,
    pub blocking: Vec<ShiftRef>,
}

impl fmt::Display for TechnicianConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "technician {} blocked by", self.technician_id)?;
        for (i, shift) in self.blocking.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, shift)?;
        }
        Ok(())
    }
}

/// Errors from shift creation, assignment and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ShiftError {
    #[error("Shift not found: {0}")]
    NotFound(Uuid),
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("Schedule conflict: {}", describe(.0))]
    Conflict(Vec<TechnicianConflict>),
    #[error("Invalid shift state: {0}")]
    InvalidState(String),
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(ShiftStatus, ShiftStatus),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Storage error: {0}")]
    Storage(#[from] CrewError),
}

fn describe(conflicts: &[TechnicianConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ShiftError {
    /// The per-technician blocking shifts, if this is a conflict rejection.
    pub fn conflicts(&self) -> Option<&[TechnicianConflict]> {
        match self {
            ShiftError::Conflict(conflicts) => Some(conflicts),
            _ => None,
        }
    }
}
