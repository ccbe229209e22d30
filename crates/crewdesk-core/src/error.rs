use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Crewdesk engine.
///
/// Store implementations and configuration loading report through this type.
/// The scheduling and chat crates define their own error enums and wrap
/// `CrewError` with `#[from]`, so the `?` operator works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CrewError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An insert collided with a uniqueness invariant (e.g. a second active
    /// chat assignment for the same customer).
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A shift commit would double-book a technician. Raised by the store's
    /// own transactional re-check, after any caller-side conflict check.
    #[error("Technician {technician} already booked by {} overlapping shift(s)", blocking.len())]
    IntervalOverlap { technician: Uuid, blocking: Vec<Uuid> },

    /// A compare-and-set write found the row in a different state than expected.
    #[error("Stale write: {0}")]
    StaleWrite(String),

    /// A background worker has stopped and no longer accepts jobs.
    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for CrewError {
    fn from(err: toml::de::Error) -> Self {
        CrewError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CrewError {
    fn from(err: toml::ser::Error) -> Self {
        CrewError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CrewError {
    fn from(err: serde_json::Error) -> Self {
        CrewError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Crewdesk store and config operations.
pub type Result<T> = std::result::Result<T, CrewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CrewError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let crew_err: CrewError = io_err.into();
        assert!(matches!(crew_err, CrewError::Io(_)));
        assert!(crew_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_display_all_string_variants() {
        let cases: Vec<(CrewError, &str)> = vec![
            (
                CrewError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                CrewError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                CrewError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
            (
                CrewError::InvalidInput("start >= end".to_string()),
                "Invalid input: start >= end",
            ),
            (
                CrewError::UniqueViolation("chat_assignments.customer_id".to_string()),
                "Unique constraint violated: chat_assignments.customer_id",
            ),
            (
                CrewError::StaleWrite("shift moved".to_string()),
                "Stale write: shift moved",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_interval_overlap_counts_blocking_shifts() {
        let technician = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = CrewError::IntervalOverlap {
            technician,
            blocking: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        assert_eq!(
            err.to_string(),
            "Technician 550e8400-e29b-41d4-a716-446655440000 already booked by 2 overlapping shift(s)"
        );
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let crew_err: CrewError = toml_err.into();
        assert!(matches!(crew_err, CrewError::Config(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let crew_err: CrewError = json_err.into();
        assert!(matches!(crew_err, CrewError::Serialization(_)));
    }

    #[test]
    fn test_shutting_down_display() {
        assert_eq!(CrewError::ShuttingDown.to_string(), "Shutdown in progress");
    }
}
