//! CrewDesk Storage crate - SQLite persistence and in-memory stores.
//!
//! Provides a WAL-mode SQLite database with migrations, repository
//! implementations of the shift, chat-assignment and user-directory
//! contracts, and lock-guarded in-memory equivalents for tests and
//! ephemeral runs.

pub mod db;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use memory::{MemoryAssignmentLedger, MemoryDirectory, MemoryShiftStore};
pub use repository::{AssignmentRepository, ShiftRepository, UserRepository};
