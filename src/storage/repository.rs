use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::import::{GoalRecord, StudentRecord};

// ── Students ───────────────────────────────────────────────────────

pub fn upsert_student(
    conn: &Connection,
    student: &StudentRecord,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO dim_students (student_gid, name, email, cohort, is_active, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
         ON CONFLICT(student_gid) DO UPDATE SET
           name=excluded.name, email=excluded.email, cohort=excluded.cohort,
           is_active=excluded.is_active, imported_at=excluded.imported_at",
        params![
            student.gid,
            student.name,
            student.email,
            student.cohort,
            student.active as i32,
        ],
    )?;
    Ok(())
}

/// Resolve a student identifier to a GID.
/// A known GID is returned as-is; anything else is looked up against the
/// email column. Returns None if no match is found.
pub fn resolve_student_identifier(
    conn: &Connection,
    identifier: &str,
) -> Result<Option<String>, rusqlite::Error> {
    let by_gid: Option<String> = conn
        .query_row(
            "SELECT student_gid FROM dim_students WHERE student_gid = ?1",
            params![identifier],
            |row| row.get(0),
        )
        .optional()?;
    if by_gid.is_some() {
        return Ok(by_gid);
    }
    conn.query_row(
        "SELECT student_gid FROM dim_students WHERE email = ?1",
        params![identifier],
        |row| row.get(0),
    )
    .optional()
}

// ── Goals ──────────────────────────────────────────────────────────

pub fn upsert_goal(conn: &Connection, goal: &GoalRecord) -> Result<(), rusqlite::Error> {
    let is_completed = goal.completed_date.is_some();
    let days_to_complete =
        compute_days_to_complete(&goal.created_date, goal.completed_date.as_deref());

    conn.execute(
        "INSERT INTO fact_goals (
            goal_gid, student_gid, title, category, is_completed,
            created_date, target_date, completed_date,
            days_to_complete, points_value, imported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))
        ON CONFLICT(goal_gid) DO UPDATE SET
            student_gid=excluded.student_gid, title=excluded.title,
            category=excluded.category, is_completed=excluded.is_completed,
            created_date=excluded.created_date, target_date=excluded.target_date,
            completed_date=excluded.completed_date,
            days_to_complete=excluded.days_to_complete,
            points_value=excluded.points_value, imported_at=excluded.imported_at",
        params![
            goal.gid,
            goal.student_gid,
            goal.title,
            goal.category,
            is_completed as i32,
            goal.created_date,
            goal.target_date,
            goal.completed_date,
            days_to_complete,
            goal.points_value,
        ],
    )?;
    Ok(())
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Warehouse status ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WarehouseStatus {
    pub students: i64,
    pub goals: i64,
    pub completed_goals: i64,
    pub points_earned: i64,
    pub earliest_created: Option<String>,
    pub latest_created: Option<String>,
    pub last_import_at: Option<String>,
}

pub fn warehouse_status(conn: &Connection) -> Result<WarehouseStatus, rusqlite::Error> {
    let students: i64 =
        conn.query_row("SELECT COUNT(*) FROM dim_students", [], |row| row.get(0))?;
    let (goals, completed_goals, points_earned): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN is_completed = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_completed = 1 THEN points_value ELSE 0 END), 0)
         FROM fact_goals",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let (earliest_created, latest_created): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_date), MAX(created_date) FROM fact_goals",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let last_import_at = get_config(conn, "last_import_at")?;

    Ok(WarehouseStatus {
        students,
        goals,
        completed_goals,
        points_earned,
        earliest_created,
        latest_created,
        last_import_at,
    })
}

// ── Helpers ────────────────────────────────────────────────────────

fn compute_days_to_complete(
    created_date: &str,
    completed_date: Option<&str>,
) -> Option<i64> {
    let completed = completed_date?;
    let created = NaiveDate::parse_from_str(created_date, "%Y-%m-%d").ok()?;
    let done = NaiveDate::parse_from_str(completed, "%Y-%m-%d").ok()?;
    Some((done - created).num_days())
}
