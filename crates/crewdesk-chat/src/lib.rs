//! Customer chat assignment for CrewDesk.
//!
//! Tracks staff presence, attaches each customer to the least-loaded online
//! staff member, and moves a disconnected staff member's customers to
//! whoever is still online.

pub mod balancer;
pub mod error;
pub mod failover;
pub mod presence;

pub use balancer::{ChatBalancer, StaffLoad};
pub use error::ChatError;
pub use failover::{
    failover_channel, FailedReassignment, FailoverCascade, FailoverQueue, FailoverReport,
    FailoverWorker, Reassignment,
};
pub use presence::PresenceTracker;
