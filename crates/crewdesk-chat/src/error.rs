//! Error types for chat assignment.

use crewdesk_core::error::CrewError;
use uuid::Uuid;

/// Errors from presence, balancing and failover operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
    #[error("User {0} is not a customer")]
    NotCustomer(Uuid),
    #[error("User {0} cannot own customer chats")]
    NotStaff(Uuid),
    #[error("No staff available for customer {0}")]
    NoCandidateAvailable(Uuid),
    #[error("Customer {customer_id} is already assigned to {staff_id}")]
    AlreadyAssigned { customer_id: Uuid, staff_id: Uuid },
    #[error("Customer {0} has no active assignment")]
    NotAssigned(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] CrewError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidate_distinct_from_already_assigned() {
        let customer = Uuid::new_v4();
        let staff = Uuid::new_v4();

        let none = ChatError::NoCandidateAvailable(customer).to_string();
        let taken = ChatError::AlreadyAssigned {
            customer_id: customer,
            staff_id: staff,
        }
        .to_string();

        assert!(none.starts_with("No staff available"));
        assert!(taken.contains("already assigned"));
        assert!(taken.contains(&staff.to_string()));
    }

    #[test]
    fn test_chat_error_from_crew_error() {
        let err: ChatError = CrewError::UniqueViolation("dup".to_string()).into();
        assert!(matches!(err, ChatError::Storage(CrewError::UniqueViolation(_))));
    }
}
