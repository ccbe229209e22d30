use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CrewError;

// =============================================================================
// Enums
// =============================================================================

/// Directory role of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Technician,
    Customer,
}

impl Role {
    /// Roles that may own customer chats and may create or assign shifts.
    pub fn is_staff_capable(&self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Staff => write!(f, "staff"),
            Role::Technician => write!(f, "technician"),
            Role::Customer => write!(f, "customer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "technician" => Ok(Role::Technician),
            "customer" => Ok(Role::Customer),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// What a shift is for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftKind {
    /// Regular on-duty block.
    #[default]
    RoutineDuty,
    /// Bound to a customer appointment.
    Appointment,
    /// Workshop equipment or facility maintenance.
    Maintenance,
    /// Parts inventory count.
    InventoryCheck,
}

impl fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftKind::RoutineDuty => write!(f, "routine_duty"),
            ShiftKind::Appointment => write!(f, "appointment"),
            ShiftKind::Maintenance => write!(f, "maintenance"),
            ShiftKind::InventoryCheck => write!(f, "inventory_check"),
        }
    }
}

impl std::str::FromStr for ShiftKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine_duty" => Ok(ShiftKind::RoutineDuty),
            "appointment" => Ok(ShiftKind::Appointment),
            "maintenance" => Ok(ShiftKind::Maintenance),
            "inventory_check" => Ok(ShiftKind::InventoryCheck),
            _ => Err(format!("Unknown shift kind: {}", s)),
        }
    }
}

/// Shift lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    PendingAssignment,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl ShiftStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShiftStatus::Completed | ShiftStatus::Cancelled)
    }

    pub const ALL: [ShiftStatus; 5] = [
        ShiftStatus::PendingAssignment,
        ShiftStatus::Scheduled,
        ShiftStatus::InProgress,
        ShiftStatus::Completed,
        ShiftStatus::Cancelled,
    ];
}

impl fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftStatus::PendingAssignment => write!(f, "pending_assignment"),
            ShiftStatus::Scheduled => write!(f, "scheduled"),
            ShiftStatus::InProgress => write!(f, "in_progress"),
            ShiftStatus::Completed => write!(f, "completed"),
            ShiftStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ShiftStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_assignment" => Ok(ShiftStatus::PendingAssignment),
            "scheduled" => Ok(ShiftStatus::Scheduled),
            "in_progress" => Ok(ShiftStatus::InProgress),
            "completed" => Ok(ShiftStatus::Completed),
            "cancelled" => Ok(ShiftStatus::Cancelled),
            _ => Err(format!("Unknown shift status: {}", s)),
        }
    }
}

/// How a chat assignment came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOrigin {
    /// Least-loaded pick by the balancer.
    Automatic,
    /// Admin override (manual assign or reassign).
    Manual,
    /// Moved off a staff member who went offline.
    Failover,
}

impl fmt::Display for AssignmentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentOrigin::Automatic => write!(f, "automatic"),
            AssignmentOrigin::Manual => write!(f, "manual"),
            AssignmentOrigin::Failover => write!(f, "failover"),
        }
    }
}

// =============================================================================
// Temporal
// =============================================================================

/// Half-open time interval `[start, end)`.
///
/// Invariant: `start < end`. Only constructible through [`TimeWindow::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = CrewError;
    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        TimeWindow::new(raw.start, raw.end)
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CrewError> {
        if start >= end {
            return Err(CrewError::InvalidInput(format!(
                "time window start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `[s1,e1)` and `[s2,e2)` overlap iff `s1 < e2 && s2 < e1`.
    /// Touching windows do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// Directory view of a user. Presence is the `online` flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub online: bool,
    pub is_deleted: bool,
}

impl User {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            online: false,
            is_deleted: false,
        }
    }
}

/// A block of work time bound to zero or more technicians.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Uuid,
    /// Staff member who created or last assigned the shift.
    pub staff_id: Option<Uuid>,
    pub technician_ids: Vec<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub kind: ShiftKind,
    pub window: TimeWindow,
    pub status: ShiftStatus,
    pub notes: String,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    /// A fresh, unassigned shift in `PendingAssignment`.
    pub fn pending(kind: ShiftKind, window: TimeWindow, staff_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            staff_id,
            technician_ids: Vec::new(),
            assignee_id: None,
            appointment_id: None,
            kind,
            window,
            status: ShiftStatus::PendingAssignment,
            notes: String::new(),
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this shift takes part in double-booking checks.
    pub fn blocks_technicians(&self) -> bool {
        self.is_active && !self.is_deleted && self.status != ShiftStatus::Cancelled
    }

    pub fn lists_technician(&self, technician: Uuid) -> bool {
        self.technician_ids.contains(&technician)
    }

    pub fn to_ref(&self) -> ShiftRef {
        ShiftRef {
            id: self.id,
            kind: self.kind,
            window: self.window,
            status: self.status,
        }
    }
}

/// Lightweight reference to a shift, used in conflict reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRef {
    pub id: Uuid,
    pub kind: ShiftKind,
    pub window: TimeWindow,
    pub status: ShiftStatus,
}

impl fmt::Display for ShiftRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.id, self.window, self.status)
    }
}

/// Binding of one customer to one staff member for support chat.
///
/// Rows are never edited to change staff; a reassignment deactivates the old
/// row and inserts a new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAssignment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub staff_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub notes: String,
}

impl ChatAssignment {
    pub fn new(customer_id: Uuid, staff_id: Uuid, assigned_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            staff_id,
            assigned_by,
            assigned_at: Utc::now(),
            is_active: true,
            is_deleted: false,
            deactivated_at: None,
            notes: String::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Counts toward the one-active-row-per-customer invariant.
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

// =============================================================================
// Tests
// =============================================================================
