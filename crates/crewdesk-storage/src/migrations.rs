//! Database schema migrations.
//!
//! Applies the initial schema: users, shifts, shift_technicians,
//! chat_assignments and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use crewdesk_core::error::CrewError;

/// Message raised by the overlap trigger; matched by the shift repository.
pub const OVERLAP_TRIGGER_MESSAGE: &str = "technician_interval_overlap";

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), CrewError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CrewError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CrewError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), CrewError> {
    conn.execute_batch(&format!(
        "
        -- Directory view of users; presence lives in `online`.
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL DEFAULT '',
            role            TEXT NOT NULL
                            CHECK (role IN ('admin', 'staff', 'technician', 'customer')),
            online          INTEGER NOT NULL DEFAULT 0,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_users_role_online
            ON users (role, online)
            WHERE is_deleted = 0;

        -- Shifts. Times are UTC milliseconds, interval is [start_at, end_at).
        CREATE TABLE IF NOT EXISTS shifts (
            id              TEXT PRIMARY KEY NOT NULL,
            staff_id        TEXT,
            assignee_id     TEXT,
            appointment_id  TEXT,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('routine_duty', 'appointment', 'maintenance', 'inventory_check')),
            start_at        INTEGER NOT NULL,
            end_at          INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending_assignment'
                            CHECK (status IN ('pending_assignment', 'scheduled', 'in_progress', 'completed', 'cancelled')),
            notes           TEXT NOT NULL DEFAULT '',
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            CHECK (start_at < end_at)
        );

        CREATE INDEX IF NOT EXISTS idx_shifts_status
            ON shifts (status, start_at)
            WHERE is_deleted = 0;

        CREATE TABLE IF NOT EXISTS shift_technicians (
            shift_id        TEXT NOT NULL,
            technician_id   TEXT NOT NULL,
            PRIMARY KEY (shift_id, technician_id),
            FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_shift_technicians_technician
            ON shift_technicians (technician_id);

        -- Exclusion guard: a technician may not be listed on two overlapping
        -- blocking shifts. Holds for every writer of this file, not only the
        -- engine's in-process locks.
        CREATE TRIGGER IF NOT EXISTS trg_shift_technicians_no_overlap
        BEFORE INSERT ON shift_technicians
        BEGIN
            SELECT RAISE(ABORT, '{overlap}')
            WHERE EXISTS (
                SELECT 1
                FROM shifts n
                JOIN shift_technicians st ON st.technician_id = NEW.technician_id
                JOIN shifts s ON s.id = st.shift_id
                WHERE n.id = NEW.shift_id
                  AND n.is_active = 1 AND n.is_deleted = 0 AND n.status <> 'cancelled'
                  AND s.id <> NEW.shift_id
                  AND s.is_active = 1 AND s.is_deleted = 0 AND s.status <> 'cancelled'
                  AND s.start_at < n.end_at
                  AND n.start_at < s.end_at
            );
        END;

        -- Customer to staff chat assignments. Rows are never re-pointed at a
        -- different staff member; reassignment deactivates and inserts.
        CREATE TABLE IF NOT EXISTS chat_assignments (
            id              TEXT PRIMARY KEY NOT NULL,
            customer_id     TEXT NOT NULL,
            staff_id        TEXT NOT NULL,
            assigned_by     TEXT,
            assigned_at     INTEGER NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            deactivated_at  INTEGER,
            notes           TEXT NOT NULL DEFAULT ''
        );

        -- At most one live assignment per customer.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_assignments_one_active
            ON chat_assignments (customer_id)
            WHERE is_active = 1 AND is_deleted = 0;

        CREATE INDEX IF NOT EXISTS idx_chat_assignments_staff
            ON chat_assignments (staff_id)
            WHERE is_active = 1 AND is_deleted = 0;

        CREATE INDEX IF NOT EXISTS idx_chat_assignments_customer_history
            ON chat_assignments (customer_id, assigned_at ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
        overlap = OVERLAP_TRIGGER_MESSAGE
    ))
    .map_err(|e| CrewError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_tables_exist() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        for table in ["users", "shifts", "shift_technicians", "chat_assignments"] {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_shifts_reject_inverted_window() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO shifts (id, kind, start_at, end_at, created_at, updated_at)
             VALUES ('s1', 'routine_duty', 2000, 1000, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_users_role_check() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO users (id, name, role) VALUES ('u1', 'X', 'janitor')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_one_active_assignment_per_customer() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO chat_assignments (id, customer_id, staff_id, assigned_at)
             VALUES ('a1', 'c1', 's1', 0)",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO chat_assignments (id, customer_id, staff_id, assigned_at)
             VALUES ('a2', 'c1', 's2', 0)",
            [],
        );
        assert!(dup.is_err());

        // Inactive rows do not count toward the invariant.
        conn.execute("UPDATE chat_assignments SET is_active = 0 WHERE id = 'a1'", [])
            .unwrap();
        conn.execute(
            "INSERT INTO chat_assignments (id, customer_id, staff_id, assigned_at)
             VALUES ('a2', 'c1', 's2', 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_overlap_trigger_blocks_double_booking() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO shifts (id, kind, start_at, end_at, status, created_at, updated_at)
             VALUES ('s1', 'routine_duty', 1000, 2000, 'scheduled', 0, 0),
                    ('s2', 'routine_duty', 1500, 2500, 'pending_assignment', 0, 0),
                    ('s3', 'routine_duty', 2000, 3000, 'pending_assignment', 0, 0);
             INSERT INTO shift_technicians (shift_id, technician_id) VALUES ('s1', 't1');",
        )
        .unwrap();

        let err = conn
            .execute(
                "INSERT INTO shift_technicians (shift_id, technician_id) VALUES ('s2', 't1')",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains(OVERLAP_TRIGGER_MESSAGE));

        // Touching interval is allowed.
        conn.execute(
            "INSERT INTO shift_technicians (shift_id, technician_id) VALUES ('s3', 't1')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_overlap_trigger_ignores_cancelled_shifts() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO shifts (id, kind, start_at, end_at, status, created_at, updated_at)
             VALUES ('s1', 'routine_duty', 1000, 2000, 'cancelled', 0, 0),
                    ('s2', 'routine_duty', 1500, 2500, 'pending_assignment', 0, 0);
             INSERT INTO shift_technicians (shift_id, technician_id) VALUES ('s1', 't1');",
        )
        .unwrap();

        conn.execute(
            "INSERT INTO shift_technicians (shift_id, technician_id) VALUES ('s2', 't1')",
            [],
        )
        .unwrap();
    }
}
