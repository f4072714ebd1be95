use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::date_util::parse_date;
use crate::error::{Error, Result};
use crate::storage::{repository, Database};

/// A point-in-time export of students and goals from the tracking backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub students: Vec<StudentRecord>,
    #[serde(default)]
    pub goals: Vec<GoalRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRecord {
    pub gid: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub cohort: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoalRecord {
    pub gid: String,
    pub student_gid: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    pub created_date: String,
    #[serde(default)]
    pub target_date: Option<String>,
    #[serde(default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub points_value: i64,
}

fn default_active() -> bool {
    true
}

/// Report returned after an import completes.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub students_imported: u64,
    pub goals_imported: u64,
    pub goals_skipped: u64,
}

/// Parse a snapshot from its JSON form.
pub fn parse_snapshot(json: &str) -> Result<Snapshot> {
    serde_json::from_str(json).map_err(|e| Error::Import(e.to_string()))
}

/// Why a goal cannot be stored, if anything disqualifies it. Goals with
/// unparseable dates or a completion date before the creation date are
/// skipped rather than failing the whole import.
fn goal_rejection(goal: &GoalRecord) -> Option<String> {
    let created = match parse_date(&goal.created_date) {
        Ok(d) => d,
        Err(_) => return Some(format!("bad created_date `{}`", goal.created_date)),
    };
    if let Some(target) = &goal.target_date {
        if parse_date(target).is_err() {
            return Some(format!("bad target_date `{target}`"));
        }
    }
    if let Some(completed) = &goal.completed_date {
        match parse_date(completed) {
            Ok(done) if done < created => {
                return Some(format!(
                    "completed_date `{completed}` precedes created_date"
                ));
            }
            Ok(_) => {}
            Err(_) => return Some(format!("bad completed_date `{completed}`")),
        }
    }
    None
}

/// Load a snapshot file into the warehouse.
pub async fn import_snapshot(db: &Database, path: impl AsRef<Path>) -> Result<ImportReport> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Import(format!("cannot read {}: {e}", path.display())))?;
    let snapshot = parse_snapshot(&json)?;
    apply_snapshot(db, snapshot).await
}

/// Write a parsed snapshot into the warehouse in a single transaction.
pub async fn apply_snapshot(db: &Database, snapshot: Snapshot) -> Result<ImportReport> {
    let report = db
        .writer()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let mut students_imported = 0u64;
            for student in &snapshot.students {
                repository::upsert_student(&tx, student)?;
                students_imported += 1;
            }

            let mut goals_imported = 0u64;
            let mut goals_skipped = 0u64;
            for goal in &snapshot.goals {
                if let Some(reason) = goal_rejection(goal) {
                    warn!("Skipping goal {}: {reason}", goal.gid);
                    goals_skipped += 1;
                    continue;
                }
                repository::upsert_goal(&tx, goal)?;
                goals_imported += 1;
            }

            tx.execute(
                "INSERT OR REPLACE INTO app_config (key, value, updated_at)
                 VALUES ('last_import_at', datetime('now'), datetime('now'))",
                [],
            )?;
            tx.commit()?;

            Ok::<ImportReport, rusqlite::Error>(ImportReport {
                students_imported,
                goals_imported,
                goals_skipped,
            })
        })
        .await?;

    debug!(
        "Imported {} students, {} goals ({} skipped)",
        report.students_imported, report.goals_imported, report.goals_skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "students": [
            {"gid": "s1", "name": "Alice", "email": "alice@school.edu", "cohort": "2025"},
            {"gid": "s2", "name": "Bob", "active": false}
        ],
        "goals": [
            {"gid": "g1", "student_gid": "s1", "title": "Read ten books",
             "category": "reading", "created_date": "2025-01-02",
             "completed_date": "2025-01-20", "points_value": 50},
            {"gid": "g2", "student_gid": "s2", "title": "Math drills",
             "created_date": "2025-01-03", "target_date": "2025-02-01"},
            {"gid": "g3", "student_gid": "s2", "title": "Broken row",
             "created_date": "not-a-date"},
            {"gid": "g4", "student_gid": "s1", "title": "Time traveler",
             "created_date": "2025-03-01", "completed_date": "2025-02-01"}
        ]
    }"#;

    #[test]
    fn test_parse_snapshot() {
        let snapshot = parse_snapshot(SNAPSHOT).unwrap();
        assert_eq!(snapshot.students.len(), 2);
        assert_eq!(snapshot.goals.len(), 4);
        assert!(snapshot.students[0].active);
        assert!(!snapshot.students[1].active);
        assert_eq!(snapshot.goals[0].points_value, 50);
        assert_eq!(snapshot.goals[1].points_value, 0);
    }

    #[test]
    fn test_parse_snapshot_defaults_to_empty() {
        let snapshot = parse_snapshot("{}").unwrap();
        assert!(snapshot.students.is_empty());
        assert!(snapshot.goals.is_empty());
    }

    #[test]
    fn test_parse_snapshot_rejects_garbage() {
        assert!(matches!(parse_snapshot("not json"), Err(Error::Import(_))));
        assert!(parse_snapshot(r#"{"goals": [{"gid": "g1"}]}"#).is_err());
    }

    #[test]
    fn test_goal_rejection() {
        let mut goal = GoalRecord {
            gid: "g1".to_string(),
            student_gid: "s1".to_string(),
            title: "Test".to_string(),
            category: None,
            created_date: "2025-01-01".to_string(),
            target_date: None,
            completed_date: None,
            points_value: 0,
        };
        assert_eq!(goal_rejection(&goal), None);

        goal.completed_date = Some("2025-01-01".to_string());
        assert_eq!(goal_rejection(&goal), None);

        goal.completed_date = Some("2024-12-31".to_string());
        assert!(goal_rejection(&goal).is_some());

        goal.completed_date = None;
        goal.target_date = Some("02/01/2025".to_string());
        assert!(goal_rejection(&goal).is_some());

        goal.target_date = None;
        goal.created_date = "yesterday".to_string();
        assert!(goal_rejection(&goal).is_some());
    }

    #[tokio::test]
    async fn test_apply_snapshot() {
        let db = crate::storage::Database::open_memory().await.unwrap();
        let snapshot = parse_snapshot(SNAPSHOT).unwrap();

        let report = apply_snapshot(&db, snapshot).await.unwrap();
        assert_eq!(report.students_imported, 2);
        assert_eq!(report.goals_imported, 2);
        assert_eq!(report.goals_skipped, 2);

        let (students, goals, last_import): (i64, i64, Option<String>) = db
            .reader()
            .call(|conn| {
                let students =
                    conn.query_row("SELECT COUNT(*) FROM dim_students", [], |row| row.get(0))?;
                let goals =
                    conn.query_row("SELECT COUNT(*) FROM fact_goals", [], |row| row.get(0))?;
                let last_import = repository::get_config(conn, "last_import_at")?;
                Ok::<(i64, i64, Option<String>), rusqlite::Error>((students, goals, last_import))
            })
            .await
            .unwrap();
        assert_eq!(students, 2);
        assert_eq!(goals, 2);
        assert!(last_import.is_some());
    }

    #[tokio::test]
    async fn test_import_snapshot_from_file() {
        let db = crate::storage::Database::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let report = import_snapshot(&db, &path).await.unwrap();
        assert_eq!(report.students_imported, 2);

        // Re-importing the same snapshot changes nothing but the timestamps.
        let report = import_snapshot(&db, &path).await.unwrap();
        assert_eq!(report.students_imported, 2);
        assert_eq!(report.goals_imported, 2);

        let goals: i64 = db
            .reader()
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM fact_goals", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(goals, 2);
    }

    #[tokio::test]
    async fn test_import_snapshot_missing_file() {
        let db = crate::storage::Database::open_memory().await.unwrap();
        let result = import_snapshot(&db, "/nonexistent/snapshot.json").await;
        assert!(matches!(result, Err(Error::Import(_))));
    }
}
