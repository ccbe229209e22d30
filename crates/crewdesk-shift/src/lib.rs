//! Shift scheduling engine for CrewDesk.
//!
//! Detects technician double-booking, commits shift assignments
//! atomically, and advances shifts through their lifecycle on a periodic
//! sweep.

pub mod assigner;
pub mod conflict;
pub mod error;
pub mod lifecycle;
pub mod sweep;

pub use assigner::{AssignRequest, NewShift, ShiftAssigner};
pub use conflict::{find_conflicts, ConflictChecker};
pub use error::{ShiftError, TechnicianConflict};
pub use lifecycle::{evaluate, validate_transition, Evaluation};
pub use sweep::{ShiftSweeper, SweepReport};
