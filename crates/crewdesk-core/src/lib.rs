pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod types;

pub use config::{ConfigSource, CrewConfig};
pub use error::{CrewError, Result};
pub use events::{DomainEvent, EventBus};
pub use store::{AssignmentLedger, IntervalStore, ShiftStore, UserDirectory};
pub use types::*;
