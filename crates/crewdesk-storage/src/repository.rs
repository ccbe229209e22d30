//! SQLite-backed implementations of the engine's store traits.
//!
//! Provides ShiftRepository, AssignmentRepository and UserRepository that
//! operate on the Database struct using raw SQL. Every write that reads
//! before it writes runs inside `Database::with_tx`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crewdesk_core::error::CrewError;
use crewdesk_core::store::{AssignmentLedger, IntervalStore, ShiftStore, UserDirectory};
use crewdesk_core::types::{ChatAssignment, Role, Shift, ShiftStatus, TimeWindow, User};

use crate::db::Database;
use crate::migrations::OVERLAP_TRIGGER_MESSAGE;

const SHIFT_COLUMNS: &str = "s.id, s.staff_id, s.assignee_id, s.appointment_id, s.kind, s.start_at, \
     s.end_at, s.status, s.notes, s.is_active, s.is_deleted, s.created_at, s.updated_at";

const ASSIGNMENT_COLUMNS: &str = "id, customer_id, staff_id, assigned_by, assigned_at, is_active, \
     is_deleted, deactivated_at, notes";

// =============================================================================
// Shifts
// =============================================================================

/// Repository for shifts and their technician lists.
pub struct ShiftRepository {
    db: Arc<Database>,
}

impl ShiftRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl IntervalStore for ShiftRepository {
    fn blocking_shifts_for(&self, technician: Uuid) -> Result<Vec<Shift>, CrewError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM shifts s
                 JOIN shift_technicians st ON st.shift_id = s.id
                 WHERE st.technician_id = ?1
                   AND s.is_active = 1 AND s.is_deleted = 0 AND s.status <> 'cancelled'
                 ORDER BY s.start_at ASC",
                SHIFT_COLUMNS
            );
            query_shifts(conn, &sql, rusqlite::params![technician.to_string()])
        })
    }
}

impl ShiftStore for ShiftRepository {
    fn insert_shift(&self, shift: &Shift) -> Result<(), CrewError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO shifts (id, staff_id, assignee_id, appointment_id, kind, start_at, end_at,
                                     status, notes, is_active, is_deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    shift.id.to_string(),
                    shift.staff_id.map(|id| id.to_string()),
                    shift.assignee_id.map(|id| id.to_string()),
                    shift.appointment_id.map(|id| id.to_string()),
                    shift.kind.to_string(),
                    shift.window.start().timestamp_millis(),
                    shift.window.end().timestamp_millis(),
                    shift.status.to_string(),
                    shift.notes,
                    shift.is_active as i32,
                    shift.is_deleted as i32,
                    shift.created_at.timestamp_millis(),
                    shift.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CrewError::Storage(format!("Failed to insert shift: {}", e)))?;

            bind_technicians(tx, shift)
        })
    }

    fn get_shift(&self, id: Uuid) -> Result<Option<Shift>, CrewError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM shifts s WHERE s.id = ?1", SHIFT_COLUMNS);
            let raw = conn
                .query_row(&sql, rusqlite::params![id.to_string()], read_shift_row)
                .optional()
                .map_err(|e| CrewError::Storage(e.to_string()))?;

            match raw {
                Some(raw) => {
                    let technicians = load_technicians(conn, &raw.id)?;
                    Ok(Some(raw.into_shift(technicians)?))
                }
                None => Ok(None),
            }
        })
    }

    fn shifts_with_status(&self, statuses: &[ShiftStatus]) -> Result<Vec<Shift>, CrewError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        self.db.with_conn(|conn| {
            let placeholders = (1..=statuses.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {} FROM shifts s
                 WHERE s.is_deleted = 0 AND s.status IN ({})
                 ORDER BY s.start_at ASC",
                SHIFT_COLUMNS, placeholders
            );
            let names: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
            query_shifts(conn, &sql, rusqlite::params_from_iter(names.iter()))
        })
    }

    fn commit_assignment(&self, shift: &Shift, expected: ShiftStatus) -> Result<(), CrewError> {
        self.db.with_tx(|tx| {
            let current: Option<(String, bool)> = tx
                .query_row(
                    "SELECT status, is_deleted FROM shifts WHERE id = ?1",
                    rusqlite::params![shift.id.to_string()],
                    |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
                )
                .optional()
                .map_err(|e| CrewError::Storage(e.to_string()))?;

            match current {
                None => {
                    return Err(CrewError::StaleWrite(format!("shift {} no longer exists", shift.id)))
                }
                Some((_, true)) => {
                    return Err(CrewError::StaleWrite(format!("shift {} was deleted", shift.id)))
                }
                Some((status, false)) if status != expected.to_string() => {
                    return Err(CrewError::StaleWrite(format!(
                        "shift {} is {}, expected {}",
                        shift.id, status, expected
                    )))
                }
                Some(_) => {}
            }

            for technician in &shift.technician_ids {
                let blocking = overlapping_shift_ids(tx, *technician, &shift.window, shift.id)?;
                if !blocking.is_empty() {
                    return Err(CrewError::IntervalOverlap {
                        technician: *technician,
                        blocking,
                    });
                }
            }

            tx.execute(
                "UPDATE shifts
                 SET staff_id = ?2, assignee_id = ?3, start_at = ?4, end_at = ?5,
                     status = ?6, notes = ?7, updated_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    shift.id.to_string(),
                    shift.staff_id.map(|id| id.to_string()),
                    shift.assignee_id.map(|id| id.to_string()),
                    shift.window.start().timestamp_millis(),
                    shift.window.end().timestamp_millis(),
                    shift.status.to_string(),
                    shift.notes,
                    shift.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CrewError::Storage(format!("Failed to update shift: {}", e)))?;

            tx.execute(
                "DELETE FROM shift_technicians WHERE shift_id = ?1",
                rusqlite::params![shift.id.to_string()],
            )
            .map_err(|e| CrewError::Storage(e.to_string()))?;

            bind_technicians(tx, shift)
        })
    }

    fn transition_status(
        &self,
        id: Uuid,
        from: ShiftStatus,
        to: ShiftStatus,
    ) -> Result<bool, CrewError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE shifts SET status = ?3, updated_at = ?4
                     WHERE id = ?1 AND status = ?2 AND is_deleted = 0",
                    rusqlite::params![
                        id.to_string(),
                        from.to_string(),
                        to.to_string(),
                        Utc::now().timestamp_millis(),
                    ],
                )
                .map_err(|e| CrewError::Storage(format!("Failed to update shift status: {}", e)))?;
            Ok(changed == 1)
        })
    }

    fn soft_delete(&self, id: Uuid) -> Result<bool, CrewError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE shifts SET is_deleted = 1, updated_at = ?2
                     WHERE id = ?1 AND is_deleted = 0",
                    rusqlite::params![id.to_string(), Utc::now().timestamp_millis()],
                )
                .map_err(|e| CrewError::Storage(format!("Failed to delete shift: {}", e)))?;
            Ok(changed == 1)
        })
    }
}

/// Raw column values of a `shifts` row, before parsing.
struct ShiftRow {
    id: String,
    staff_id: Option<String>,
    assignee_id: Option<String>,
    appointment_id: Option<String>,
    kind: String,
    start_at: i64,
    end_at: i64,
    status: String,
    notes: String,
    is_active: bool,
    is_deleted: bool,
    created_at: i64,
    updated_at: i64,
}

fn read_shift_row(row: &Row<'_>) -> rusqlite::Result<ShiftRow> {
    Ok(ShiftRow {
        id: row.get(0)?,
        staff_id: row.get(1)?,
        assignee_id: row.get(2)?,
        appointment_id: row.get(3)?,
        kind: row.get(4)?,
        start_at: row.get(5)?,
        end_at: row.get(6)?,
        status: row.get(7)?,
        notes: row.get(8)?,
        is_active: row.get::<_, i64>(9)? != 0,
        is_deleted: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl ShiftRow {
    fn into_shift(self, technician_ids: Vec<Uuid>) -> Result<Shift, CrewError> {
        Ok(Shift {
            id: parse_uuid(&self.id)?,
            staff_id: parse_opt_uuid(self.staff_id)?,
            technician_ids,
            assignee_id: parse_opt_uuid(self.assignee_id)?,
            appointment_id: parse_opt_uuid(self.appointment_id)?,
            kind: self.kind.parse().map_err(CrewError::Storage)?,
            window: TimeWindow::new(millis(self.start_at)?, millis(self.end_at)?)?,
            status: self.status.parse().map_err(CrewError::Storage)?,
            notes: self.notes,
            is_active: self.is_active,
            is_deleted: self.is_deleted,
            created_at: millis(self.created_at)?,
            updated_at: millis(self.updated_at)?,
        })
    }
}

fn query_shifts<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Shift>, CrewError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| CrewError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params, read_shift_row)
        .map_err(|e| CrewError::Storage(e.to_string()))?;

    let mut raws = Vec::new();
    for row in rows {
        raws.push(row.map_err(|e| CrewError::Storage(e.to_string()))?);
    }

    let mut shifts = Vec::with_capacity(raws.len());
    for raw in raws {
        let technicians = load_technicians(conn, &raw.id)?;
        shifts.push(raw.into_shift(technicians)?);
    }
    Ok(shifts)
}

fn load_technicians(conn: &Connection, shift_id: &str) -> Result<Vec<Uuid>, CrewError> {
    let mut stmt = conn
        .prepare("SELECT technician_id FROM shift_technicians WHERE shift_id = ?1 ORDER BY rowid")
        .map_err(|e| CrewError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![shift_id], |row| row.get::<_, String>(0))
        .map_err(|e| CrewError::Storage(e.to_string()))?;

    let mut ids = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| CrewError::Storage(e.to_string()))?;
        ids.push(parse_uuid(&raw)?);
    }
    Ok(ids)
}

/// Ids of blocking shifts listing `technician` that overlap `window`,
/// other than `exclude`.
fn overlapping_shift_ids(
    conn: &Connection,
    technician: Uuid,
    window: &TimeWindow,
    exclude: Uuid,
) -> Result<Vec<Uuid>, CrewError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id FROM shifts s
             JOIN shift_technicians st ON st.shift_id = s.id
             WHERE st.technician_id = ?1 AND s.id <> ?2
               AND s.is_active = 1 AND s.is_deleted = 0 AND s.status <> 'cancelled'
               AND s.start_at < ?4 AND ?3 < s.end_at
             ORDER BY s.start_at ASC",
        )
        .map_err(|e| CrewError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                technician.to_string(),
                exclude.to_string(),
                window.start().timestamp_millis(),
                window.end().timestamp_millis(),
            ],
            |row| row.get::<_, String>(0),
        )
        .map_err(|e| CrewError::Storage(e.to_string()))?;

    let mut ids = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| CrewError::Storage(e.to_string()))?;
        ids.push(parse_uuid(&raw)?);
    }
    Ok(ids)
}

fn bind_technicians(conn: &Connection, shift: &Shift) -> Result<(), CrewError> {
    for technician in &shift.technician_ids {
        conn.execute(
            "INSERT INTO shift_technicians (shift_id, technician_id) VALUES (?1, ?2)",
            rusqlite::params![shift.id.to_string(), technician.to_string()],
        )
        .map_err(|e| {
            if e.to_string().contains(OVERLAP_TRIGGER_MESSAGE) {
                CrewError::IntervalOverlap {
                    technician: *technician,
                    blocking: Vec::new(),
                }
            } else {
                CrewError::Storage(format!("Failed to bind technician: {}", e))
            }
        })?;
    }
    Ok(())
}

// =============================================================================
// Chat assignments
// =============================================================================

/// Repository for customer to staff chat assignments.
pub struct AssignmentRepository {
    db: Arc<Database>,
}

impl AssignmentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl AssignmentLedger for AssignmentRepository {
    fn active_for_customer(&self, customer: Uuid) -> Result<Option<ChatAssignment>, CrewError> {
        self.db.with_conn(|conn| active_row(conn, customer))
    }

    fn active_for_staff(&self, staff: Uuid) -> Result<Vec<ChatAssignment>, CrewError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_assignments
                 WHERE staff_id = ?1 AND is_active = 1 AND is_deleted = 0
                 ORDER BY assigned_at ASC, rowid ASC",
                ASSIGNMENT_COLUMNS
            );
            query_assignments(conn, &sql, rusqlite::params![staff.to_string()])
        })
    }

    fn active_counts(&self, staff: &[Uuid]) -> Result<HashMap<Uuid, usize>, CrewError> {
        let mut counts: HashMap<Uuid, usize> = staff.iter().map(|id| (*id, 0)).collect();
        if staff.is_empty() {
            return Ok(counts);
        }
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT staff_id, COUNT(*) FROM chat_assignments
                     WHERE is_active = 1 AND is_deleted = 0
                     GROUP BY staff_id",
                )
                .map_err(|e| CrewError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| CrewError::Storage(e.to_string()))?;

            for row in rows {
                let (raw_id, count) = row.map_err(|e| CrewError::Storage(e.to_string()))?;
                let id = parse_uuid(&raw_id)?;
                if let Some(slot) = counts.get_mut(&id) {
                    *slot = count as usize;
                }
            }
            Ok(())
        })?;
        Ok(counts)
    }

    fn insert_active(&self, assignment: &ChatAssignment) -> Result<(), CrewError> {
        self.db.with_conn(|conn| insert_assignment(conn, assignment))
    }

    fn replace_active(
        &self,
        customer: Uuid,
        expected: Option<Uuid>,
        replacement: &ChatAssignment,
    ) -> Result<Option<ChatAssignment>, CrewError> {
        self.db.with_tx(|tx| {
            let current = active_row(tx, customer)?;
            if let Some(expected_id) = expected {
                if current.as_ref().map(|a| a.id) != Some(expected_id) {
                    return Err(CrewError::StaleWrite(format!(
                        "assignment {} is no longer active for customer {}",
                        expected_id, customer
                    )));
                }
            }
            let previous = match current {
                Some(row) => Some(deactivate_row(tx, row)?),
                None => None,
            };
            insert_assignment(tx, replacement)?;
            Ok(previous)
        })
    }

    fn deactivate_active(&self, customer: Uuid) -> Result<Option<ChatAssignment>, CrewError> {
        self.db.with_tx(|tx| match active_row(tx, customer)? {
            Some(row) => Ok(Some(deactivate_row(tx, row)?)),
            None => Ok(None),
        })
    }

    fn history(&self, customer: Uuid) -> Result<Vec<ChatAssignment>, CrewError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_assignments
                 WHERE customer_id = ?1
                 ORDER BY assigned_at ASC, rowid ASC",
                ASSIGNMENT_COLUMNS
            );
            query_assignments(conn, &sql, rusqlite::params![customer.to_string()])
        })
    }
}

struct AssignmentRow {
    id: String,
    customer_id: String,
    staff_id: String,
    assigned_by: Option<String>,
    assigned_at: i64,
    is_active: bool,
    is_deleted: bool,
    deactivated_at: Option<i64>,
    notes: String,
}

fn read_assignment_row(row: &Row<'_>) -> rusqlite::Result<AssignmentRow> {
    Ok(AssignmentRow {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        staff_id: row.get(2)?,
        assigned_by: row.get(3)?,
        assigned_at: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        is_deleted: row.get::<_, i64>(6)? != 0,
        deactivated_at: row.get(7)?,
        notes: row.get(8)?,
    })
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<ChatAssignment, CrewError> {
        Ok(ChatAssignment {
            id: parse_uuid(&self.id)?,
            customer_id: parse_uuid(&self.customer_id)?,
            staff_id: parse_uuid(&self.staff_id)?,
            assigned_by: parse_opt_uuid(self.assigned_by)?,
            assigned_at: millis(self.assigned_at)?,
            is_active: self.is_active,
            is_deleted: self.is_deleted,
            deactivated_at: self.deactivated_at.map(millis).transpose()?,
            notes: self.notes,
        })
    }
}

fn query_assignments<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ChatAssignment>, CrewError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| CrewError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params, read_assignment_row)
        .map_err(|e| CrewError::Storage(e.to_string()))?;

    let mut assignments = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| CrewError::Storage(e.to_string()))?;
        assignments.push(raw.into_assignment()?);
    }
    Ok(assignments)
}

fn active_row(conn: &Connection, customer: Uuid) -> Result<Option<ChatAssignment>, CrewError> {
    let sql = format!(
        "SELECT {} FROM chat_assignments
         WHERE customer_id = ?1 AND is_active = 1 AND is_deleted = 0",
        ASSIGNMENT_COLUMNS
    );
    let raw = conn
        .query_row(&sql, rusqlite::params![customer.to_string()], read_assignment_row)
        .optional()
        .map_err(|e| CrewError::Storage(e.to_string()))?;
    raw.map(AssignmentRow::into_assignment).transpose()
}

fn insert_assignment(conn: &Connection, assignment: &ChatAssignment) -> Result<(), CrewError> {
    conn.execute(
        "INSERT INTO chat_assignments (id, customer_id, staff_id, assigned_by, assigned_at,
                                       is_active, is_deleted, deactivated_at, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            assignment.id.to_string(),
            assignment.customer_id.to_string(),
            assignment.staff_id.to_string(),
            assignment.assigned_by.map(|id| id.to_string()),
            assignment.assigned_at.timestamp_millis(),
            assignment.is_active as i32,
            assignment.is_deleted as i32,
            assignment.deactivated_at.map(|t| t.timestamp_millis()),
            assignment.notes,
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            CrewError::UniqueViolation(format!(
                "customer {} already has an active assignment",
                assignment.customer_id
            ))
        } else {
            CrewError::Storage(format!("Failed to insert assignment: {}", e))
        }
    })?;
    Ok(())
}

fn deactivate_row(conn: &Connection, mut row: ChatAssignment) -> Result<ChatAssignment, CrewError> {
    let now = Utc::now();
    conn.execute(
        "UPDATE chat_assignments SET is_active = 0, deactivated_at = ?2 WHERE id = ?1",
        rusqlite::params![row.id.to_string(), now.timestamp_millis()],
    )
    .map_err(|e| CrewError::Storage(format!("Failed to deactivate assignment: {}", e)))?;
    row.is_active = false;
    row.deactivated_at = Some(now);
    Ok(row)
}

// =============================================================================
// Users
// =============================================================================

/// Repository for the user directory and presence flag.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a directory record.
    pub fn upsert(&self, user: &User) -> Result<(), CrewError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, role, online, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    role = excluded.role,
                    online = excluded.online,
                    is_deleted = excluded.is_deleted",
                rusqlite::params![
                    user.id.to_string(),
                    user.name,
                    user.role.to_string(),
                    user.online as i32,
                    user.is_deleted as i32,
                ],
            )
            .map_err(|e| CrewError::Storage(format!("Failed to save user: {}", e)))?;
            Ok(())
        })
    }
}

impl UserDirectory for UserRepository {
    fn get_user(&self, id: Uuid) -> Result<Option<User>, CrewError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT id, name, role, online, is_deleted FROM users WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    read_user_row,
                )
                .optional()
                .map_err(|e| CrewError::Storage(e.to_string()))?;
            raw.map(UserRow::into_user).transpose()
        })
    }

    fn online_staff(&self) -> Result<Vec<User>, CrewError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, role, online, is_deleted FROM users
                     WHERE role IN ('admin', 'staff') AND online = 1 AND is_deleted = 0
                     ORDER BY id ASC",
                )
                .map_err(|e| CrewError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], read_user_row)
                .map_err(|e| CrewError::Storage(e.to_string()))?;

            let mut users = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| CrewError::Storage(e.to_string()))?;
                users.push(raw.into_user()?);
            }
            Ok(users)
        })
    }

    fn set_online(&self, id: Uuid, online: bool) -> Result<Option<bool>, CrewError> {
        self.db.with_tx(|tx| {
            let previous: Option<i64> = tx
                .query_row(
                    "SELECT online FROM users WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| CrewError::Storage(e.to_string()))?;

            let Some(previous) = previous else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE users SET online = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), online as i32],
            )
            .map_err(|e| CrewError::Storage(format!("Failed to update presence: {}", e)))?;
            Ok(Some(previous != 0))
        })
    }
}

struct UserRow {
    id: String,
    name: String,
    role: String,
    online: bool,
    is_deleted: bool,
}

fn read_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        online: row.get::<_, i64>(3)? != 0,
        is_deleted: row.get::<_, i64>(4)? != 0,
    })
}

impl UserRow {
    fn into_user(self) -> Result<User, CrewError> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            name: self.name,
            role: self.role.parse::<Role>().map_err(CrewError::Storage)?,
            online: self.online,
            is_deleted: self.is_deleted,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_uuid(raw: &str) -> Result<Uuid, CrewError> {
    Uuid::parse_str(raw).map_err(|e| CrewError::Storage(format!("Invalid UUID '{}': {}", raw, e)))
}

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>, CrewError> {
    raw.as_deref().map(parse_uuid).transpose()
}

fn millis(ms: i64) -> Result<DateTime<Utc>, CrewError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CrewError::Storage(format!("Invalid timestamp: {}", ms)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crewdesk_core::types::ShiftKind;

    fn setup() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
    }

    fn window(start: u32, end: u32) -> TimeWindow {
        TimeWindow::new(at(start), at(end)).unwrap()
    }

    fn scheduled_shift(technicians: Vec<Uuid>, w: TimeWindow) -> Shift {
        let mut shift = Shift::pending(ShiftKind::RoutineDuty, w, None);
        shift.technician_ids = technicians;
        shift.assignee_id = Some(Uuid::new_v4());
        shift.status = ShiftStatus::Scheduled;
        shift
    }

    #[test]
    fn test_insert_and_get_shift() {
        let repo = ShiftRepository::new(setup());
        let tech = Uuid::new_v4();
        let mut shift = scheduled_shift(vec![tech], window(9, 12));
        shift.notes = "brake line".to_string();
        shift.appointment_id = Some(Uuid::new_v4());
        repo.insert_shift(&shift).unwrap();

        let found = repo.get_shift(shift.id).unwrap().unwrap();
        assert_eq!(found.id, shift.id);
        assert_eq!(found.technician_ids, vec![tech]);
        assert_eq!(found.window, shift.window);
        assert_eq!(found.status, ShiftStatus::Scheduled);
        assert_eq!(found.notes, "brake line");
        assert_eq!(found.appointment_id, shift.appointment_id);
    }

    #[test]
    fn test_get_missing_shift() {
        let repo = ShiftRepository::new(setup());
        assert!(repo.get_shift(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_blocking_shifts_excludes_cancelled_and_deleted() {
        let repo = ShiftRepository::new(setup());
        let tech = Uuid::new_v4();

        let live = scheduled_shift(vec![tech], window(8, 9));
        let mut cancelled = scheduled_shift(vec![tech], window(10, 11));
        cancelled.status = ShiftStatus::Cancelled;
        let deleted = scheduled_shift(vec![tech], window(12, 13));
        let other = scheduled_shift(vec![Uuid::new_v4()], window(14, 15));

        for s in [&live, &cancelled, &deleted, &other] {
            repo.insert_shift(s).unwrap();
        }
        assert!(repo.soft_delete(deleted.id).unwrap());

        let blocking = repo.blocking_shifts_for(tech).unwrap();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].id, live.id);
    }

    #[test]
    fn test_commit_assignment_binds_technicians() {
        let repo = ShiftRepository::new(setup());
        let pending = Shift::pending(ShiftKind::Maintenance, window(9, 12), None);
        repo.insert_shift(&pending).unwrap();

        let tech = Uuid::new_v4();
        let mut assigned = pending.clone();
        assigned.technician_ids = vec![tech];
        assigned.assignee_id = Some(Uuid::new_v4());
        assigned.status = ShiftStatus::Scheduled;
        repo.commit_assignment(&assigned, ShiftStatus::PendingAssignment)
            .unwrap();

        let found = repo.get_shift(pending.id).unwrap().unwrap();
        assert_eq!(found.status, ShiftStatus::Scheduled);
        assert_eq!(found.technician_ids, vec![tech]);
        assert_eq!(found.assignee_id, assigned.assignee_id);
    }

    #[test]
    fn test_commit_assignment_rejects_overlap_atomically() {
        let repo = ShiftRepository::new(setup());
        let busy = Uuid::new_v4();
        let free = Uuid::new_v4();
        let existing = scheduled_shift(vec![busy], window(9, 12));
        repo.insert_shift(&existing).unwrap();

        let pending = Shift::pending(ShiftKind::RoutineDuty, window(11, 13), None);
        repo.insert_shift(&pending).unwrap();

        let mut assigned = pending.clone();
        assigned.technician_ids = vec![free, busy];
        assigned.status = ShiftStatus::Scheduled;
        let err = repo
            .commit_assignment(&assigned, ShiftStatus::PendingAssignment)
            .unwrap_err();
        match err {
            CrewError::IntervalOverlap { technician, blocking } => {
                assert_eq!(technician, busy);
                assert_eq!(blocking, vec![existing.id]);
            }
            other => panic!("unexpected error {:?}", other),
        }

        // Nothing was bound, including the free technician.
        let found = repo.get_shift(pending.id).unwrap().unwrap();
        assert_eq!(found.status, ShiftStatus::PendingAssignment);
        assert!(found.technician_ids.is_empty());
        assert!(repo.blocking_shifts_for(free).unwrap().is_empty());
    }

    #[test]
    fn test_commit_assignment_stale_status() {
        let repo = ShiftRepository::new(setup());
        let shift = scheduled_shift(vec![Uuid::new_v4()], window(9, 10));
        repo.insert_shift(&shift).unwrap();

        let err = repo
            .commit_assignment(&shift, ShiftStatus::PendingAssignment)
            .unwrap_err();
        assert!(matches!(err, CrewError::StaleWrite(_)));
    }

    #[test]
    fn test_insert_overlapping_shift_rejected_by_trigger() {
        let repo = ShiftRepository::new(setup());
        let tech = Uuid::new_v4();
        repo.insert_shift(&scheduled_shift(vec![tech], window(9, 12)))
            .unwrap();

        let err = repo
            .insert_shift(&scheduled_shift(vec![tech], window(10, 11)))
            .unwrap_err();
        assert!(matches!(err, CrewError::IntervalOverlap { .. }));
        // The shift row itself was rolled back.
        assert_eq!(repo.blocking_shifts_for(tech).unwrap().len(), 1);
    }

    #[test]
    fn test_transition_status_is_compare_and_set() {
        let repo = ShiftRepository::new(setup());
        let shift = scheduled_shift(vec![Uuid::new_v4()], window(9, 10));
        repo.insert_shift(&shift).unwrap();

        assert!(repo
            .transition_status(shift.id, ShiftStatus::Scheduled, ShiftStatus::InProgress)
            .unwrap());
        // Second identical call finds the row already advanced.
        assert!(!repo
            .transition_status(shift.id, ShiftStatus::Scheduled, ShiftStatus::InProgress)
            .unwrap());
    }

    #[test]
    fn test_shifts_with_status_filters() {
        let repo = ShiftRepository::new(setup());
        let pending = Shift::pending(ShiftKind::InventoryCheck, window(9, 10), None);
        let scheduled = scheduled_shift(vec![Uuid::new_v4()], window(11, 12));
        repo.insert_shift(&pending).unwrap();
        repo.insert_shift(&scheduled).unwrap();

        let found = repo
            .shifts_with_status(&[ShiftStatus::PendingAssignment])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pending.id);

        let both = repo
            .shifts_with_status(&[ShiftStatus::PendingAssignment, ShiftStatus::Scheduled])
            .unwrap();
        assert_eq!(both.len(), 2);
        assert!(repo.shifts_with_status(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_soft_delete_keeps_status() {
        let repo = ShiftRepository::new(setup());
        let shift = scheduled_shift(vec![Uuid::new_v4()], window(9, 10));
        repo.insert_shift(&shift).unwrap();

        assert!(repo.soft_delete(shift.id).unwrap());
        assert!(!repo.soft_delete(shift.id).unwrap());

        let found = repo.get_shift(shift.id).unwrap().unwrap();
        assert!(found.is_deleted);
        assert_eq!(found.status, ShiftStatus::Scheduled);
        assert!(repo
            .shifts_with_status(&[ShiftStatus::Scheduled])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_assignment_unique_active_per_customer() {
        let ledger = AssignmentRepository::new(setup());
        let customer = Uuid::new_v4();
        ledger
            .insert_active(&ChatAssignment::new(customer, Uuid::new_v4(), None))
            .unwrap();

        let err = ledger
            .insert_active(&ChatAssignment::new(customer, Uuid::new_v4(), None))
            .unwrap_err();
        assert!(matches!(err, CrewError::UniqueViolation(_)));
    }

    #[test]
    fn test_replace_active_keeps_audit_trail() {
        let ledger = AssignmentRepository::new(setup());
        let customer = Uuid::new_v4();
        let first = ChatAssignment::new(customer, Uuid::new_v4(), None);
        ledger.insert_active(&first).unwrap();

        let mut second = ChatAssignment::new(customer, Uuid::new_v4(), Some(Uuid::new_v4()));
        second.assigned_at = first.assigned_at + Duration::seconds(1);
        let previous = ledger
            .replace_active(customer, Some(first.id), &second)
            .unwrap()
            .unwrap();
        assert_eq!(previous.id, first.id);
        assert!(!previous.is_active);

        let active = ledger.active_for_customer(customer).unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let history = ledger.history(customer).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert!(!history[0].is_active);
        assert!(history[0].deactivated_at.is_some());
        assert!(history[1].is_active);
    }

    #[test]
    fn test_replace_active_with_stale_expectation() {
        let ledger = AssignmentRepository::new(setup());
        let customer = Uuid::new_v4();
        ledger
            .insert_active(&ChatAssignment::new(customer, Uuid::new_v4(), None))
            .unwrap();

        let err = ledger
            .replace_active(
                customer,
                Some(Uuid::new_v4()),
                &ChatAssignment::new(customer, Uuid::new_v4(), None),
            )
            .unwrap_err();
        assert!(matches!(err, CrewError::StaleWrite(_)));
        assert_eq!(ledger.history(customer).unwrap().len(), 1);
    }

    #[test]
    fn test_active_counts_include_zero_entries() {
        let ledger = AssignmentRepository::new(setup());
        let busy = Uuid::new_v4();
        let idle = Uuid::new_v4();
        for _ in 0..2 {
            ledger
                .insert_active(&ChatAssignment::new(Uuid::new_v4(), busy, None))
                .unwrap();
        }

        let counts = ledger.active_counts(&[busy, idle]).unwrap();
        assert_eq!(counts[&busy], 2);
        assert_eq!(counts[&idle], 0);
        assert_eq!(ledger.active_for_staff(busy).unwrap().len(), 2);
    }

    #[test]
    fn test_deactivate_active() {
        let ledger = AssignmentRepository::new(setup());
        let customer = Uuid::new_v4();
        ledger
            .insert_active(&ChatAssignment::new(customer, Uuid::new_v4(), None))
            .unwrap();

        assert!(ledger.deactivate_active(customer).unwrap().is_some());
        assert!(ledger.deactivate_active(customer).unwrap().is_none());
        assert!(ledger.active_for_customer(customer).unwrap().is_none());
    }

    #[test]
    fn test_user_presence_and_online_staff() {
        let users = UserRepository::new(setup());
        let staff = User::new("Rosa", Role::Staff);
        let tech = User::new("Ivan", Role::Technician);
        users.upsert(&staff).unwrap();
        users.upsert(&tech).unwrap();

        assert_eq!(users.set_online(staff.id, true).unwrap(), Some(false));
        assert_eq!(users.set_online(staff.id, true).unwrap(), Some(true));
        assert_eq!(users.set_online(tech.id, true).unwrap(), Some(false));
        assert_eq!(users.set_online(Uuid::new_v4(), true).unwrap(), None);

        let online = users.online_staff().unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, staff.id);
        assert_eq!(users.get_user(tech.id).unwrap().unwrap().role, Role::Technician);
    }
}
