use chrono::NaiveDate;

use crate::analytics::goal_filter_sql;
use crate::analytics::types::{
    AgeBand, AgeBandCount, BacklogReport, GoalFilter, StudentBacklog,
};
use crate::error::Result;
use crate::stats::round2;
use crate::storage::Database;

/// Fallback when `top_n` is absent or outside `1..=100`.
const DEFAULT_TOP_N: i64 = 10;

/// Goals open as of `?1`: created on or before, and not completed or
/// completed strictly after. Every backlog read shares this predicate.
const OPEN_PREDICATE: &str = "g.created_date <= ?1
           AND (g.completed_date IS NULL OR g.completed_date > ?1)";

/// Build the backlog aging report as of a reference date.
///
/// The five reads (total, overdue, average age, age histogram, top
/// students) are independent and run concurrently; any failure fails the
/// whole report. A warehouse with no open goals still yields all four age
/// bands at zero.
pub async fn backlog_report(
    db: &Database,
    as_of: NaiveDate,
    top_n: Option<i64>,
    filter: &GoalFilter,
) -> Result<BacklogReport> {
    let as_of_str = as_of.format("%Y-%m-%d").to_string();
    let (filter_where, filter_params) = goal_filter_sql(filter, 2);
    let top_n = clamp_top_n(top_n);

    let total_fut = {
        let (as_of, fw, fp) = (as_of_str.clone(), filter_where.clone(), filter_params.clone());
        db.reader()
            .call(move |conn| count_open(conn, &as_of, &fw, &fp))
    };
    let overdue_fut = {
        let (as_of, fw, fp) = (as_of_str.clone(), filter_where.clone(), filter_params.clone());
        db.reader()
            .call(move |conn| count_overdue(conn, &as_of, &fw, &fp))
    };
    let avg_fut = {
        let (as_of, fw, fp) = (as_of_str.clone(), filter_where.clone(), filter_params.clone());
        db.reader()
            .call(move |conn| avg_days_open(conn, &as_of, &fw, &fp))
    };
    let ages_fut = {
        let (as_of, fw, fp) = (as_of_str.clone(), filter_where.clone(), filter_params.clone());
        db.reader()
            .call(move |conn| open_by_age(conn, &as_of, &fw, &fp))
    };
    let top_fut = db
        .reader()
        .call(move |conn| top_students(conn, &as_of_str, top_n, &filter_where, &filter_params));

    let (total_open, overdue, avg_days, open_by_age, top_students) =
        tokio::try_join!(total_fut, overdue_fut, avg_fut, ages_fut, top_fut)?;

    Ok(BacklogReport {
        as_of,
        total_open,
        overdue,
        avg_days_open: avg_days.map(round2),
        open_by_age,
        top_students,
    })
}

fn clamp_top_n(top_n: Option<i64>) -> i64 {
    match top_n {
        Some(n) if (1..=100).contains(&n) => n,
        _ => DEFAULT_TOP_N,
    }
}

fn count_open(
    conn: &rusqlite::Connection,
    as_of: &str,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<u64, rusqlite::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM fact_goals g
         WHERE {OPEN_PREDICATE}{filter_where}"
    );
    query_count(conn, &sql, as_of, filter_params)
}

fn count_overdue(
    conn: &rusqlite::Connection,
    as_of: &str,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<u64, rusqlite::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM fact_goals g
         WHERE {OPEN_PREDICATE}
           AND g.target_date IS NOT NULL AND g.target_date < ?1{filter_where}"
    );
    query_count(conn, &sql, as_of, filter_params)
}

fn avg_days_open(
    conn: &rusqlite::Connection,
    as_of: &str,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<Option<f64>, rusqlite::Error> {
    let sql = format!(
        "SELECT AVG(julianday(?1) - julianday(g.created_date))
         FROM fact_goals g
         WHERE {OPEN_PREDICATE}{filter_where}"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, as_of)?;
    bind_filter(&mut stmt, filter_params)?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => row.get(0),
        None => Ok(None),
    }
}

/// Open-goal counts per age band, computed as one conditional-sum row.
/// The CASE arms come from [`AgeBand::bounds`], so band edges cannot drift
/// from the in-Rust classification.
fn open_by_age(
    conn: &rusqlite::Connection,
    as_of: &str,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<Vec<AgeBandCount>, rusqlite::Error> {
    let arms: Vec<String> = AgeBand::ALL
        .iter()
        .map(|band| {
            let (min, max) = band.bounds();
            let cond = match max {
                Some(max) => {
                    format!("julianday(?1) - julianday(g.created_date) BETWEEN {min} AND {max}")
                }
                None => format!("julianday(?1) - julianday(g.created_date) >= {min}"),
            };
            format!("COALESCE(SUM(CASE WHEN {cond} THEN 1 ELSE 0 END), 0)")
        })
        .collect();
    let sql = format!(
        "SELECT {} FROM fact_goals g
         WHERE {OPEN_PREDICATE}{filter_where}",
        arms.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, as_of)?;
    bind_filter(&mut stmt, filter_params)?;
    let mut rows = stmt.raw_query();
    let mut out = Vec::with_capacity(AgeBand::ALL.len());
    if let Some(row) = rows.next()? {
        for (i, band) in AgeBand::ALL.iter().enumerate() {
            out.push(AgeBandCount {
                band: band.label(),
                count: row.get::<_, i64>(i)? as u64,
            });
        }
    }
    Ok(out)
}

fn top_students(
    conn: &rusqlite::Connection,
    as_of: &str,
    top_n: i64,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<Vec<StudentBacklog>, rusqlite::Error> {
    let sql = format!(
        "SELECT g.student_gid, s.name, COUNT(*) AS open_goals
         FROM fact_goals g
         LEFT JOIN dim_students s ON s.student_gid = g.student_gid
         WHERE {OPEN_PREDICATE}{filter_where}
         GROUP BY g.student_gid
         ORDER BY open_goals DESC, g.student_gid
         LIMIT {top_n}"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, as_of)?;
    bind_filter(&mut stmt, filter_params)?;
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(StudentBacklog {
            student_gid: row.get(0)?,
            student_name: row.get(1)?,
            open_goals: row.get::<_, i64>(2)? as u64,
        });
    }
    Ok(out)
}

fn query_count(
    conn: &rusqlite::Connection,
    sql: &str,
    as_of: &str,
    filter_params: &[String],
) -> std::result::Result<u64, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    stmt.raw_bind_parameter(1, as_of)?;
    bind_filter(&mut stmt, filter_params)?;
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(row.get::<_, i64>(0)? as u64),
        None => Ok(0),
    }
}

fn bind_filter(
    stmt: &mut rusqlite::Statement<'_>,
    filter_params: &[String],
) -> std::result::Result<(), rusqlite::Error> {
    for (i, param) in filter_params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 2, param)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{GoalRecord, StudentRecord};
    use crate::storage::repository;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct SeedGoal {
        gid: &'static str,
        student: &'static str,
        created: &'static str,
        target: Option<&'static str>,
        completed: Option<&'static str>,
    }

    async fn seed(db: &Database, students: &[(&str, &str)], goals: &[SeedGoal]) {
        let students: Vec<StudentRecord> = students
            .iter()
            .map(|(gid, name)| StudentRecord {
                gid: gid.to_string(),
                name: name.to_string(),
                email: None,
                cohort: None,
                active: true,
            })
            .collect();
        let goals: Vec<GoalRecord> = goals
            .iter()
            .map(|g| GoalRecord {
                gid: g.gid.to_string(),
                student_gid: g.student.to_string(),
                title: format!("Goal {}", g.gid),
                category: None,
                created_date: g.created.to_string(),
                target_date: g.target.map(str::to_string),
                completed_date: g.completed.map(str::to_string),
                points_value: 0,
            })
            .collect();
        db.writer()
            .call(move |conn| {
                for student in &students {
                    repository::upsert_student(conn, student)?;
                }
                for goal in &goals {
                    repository::upsert_goal(conn, goal)?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_clamp_top_n() {
        assert_eq!(clamp_top_n(Some(1)), 1);
        assert_eq!(clamp_top_n(Some(100)), 100);
        assert_eq!(clamp_top_n(Some(0)), 10);
        assert_eq!(clamp_top_n(Some(-3)), 10);
        assert_eq!(clamp_top_n(Some(101)), 10);
        assert_eq!(clamp_top_n(None), 10);
    }

    #[tokio::test]
    async fn test_backlog_report_empty_warehouse() {
        let db = Database::open_memory().await.unwrap();
        let report = backlog_report(&db, d(2025, 6, 1), None, &GoalFilter::default())
            .await
            .unwrap();

        assert_eq!(report.total_open, 0);
        assert_eq!(report.overdue, 0);
        assert_eq!(report.avg_days_open, None);
        assert!(report.top_students.is_empty());
        // All four bands still present, in order, at zero.
        let bands: Vec<&str> = report.open_by_age.iter().map(|b| b.band).collect();
        assert_eq!(bands, vec!["0-7", "8-30", "31-90", "90+"]);
        assert!(report.open_by_age.iter().all(|b| b.count == 0));
    }

    #[tokio::test]
    async fn test_backlog_report_counts_and_ages() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            &[("s1", "Alice"), ("s2", "Bob")],
            &[
                // 2 days open as of June 1.
                SeedGoal {
                    gid: "g1",
                    student: "s1",
                    created: "2025-05-30",
                    target: None,
                    completed: None,
                },
                // 20 days open, overdue.
                SeedGoal {
                    gid: "g2",
                    student: "s1",
                    created: "2025-05-12",
                    target: Some("2025-05-20"),
                    completed: None,
                },
                // 120 days open.
                SeedGoal {
                    gid: "g3",
                    student: "s2",
                    created: "2025-02-01",
                    target: None,
                    completed: None,
                },
                // Completed before as-of, not open.
                SeedGoal {
                    gid: "g4",
                    student: "s2",
                    created: "2025-05-01",
                    target: None,
                    completed: Some("2025-05-15"),
                },
                // Completed after as-of, still open on June 1.
                SeedGoal {
                    gid: "g5",
                    student: "s1",
                    created: "2025-05-25",
                    target: None,
                    completed: Some("2025-06-10"),
                },
                // Created after as-of, not open yet.
                SeedGoal {
                    gid: "g6",
                    student: "s2",
                    created: "2025-06-02",
                    target: None,
                    completed: None,
                },
            ],
        )
        .await;

        let report = backlog_report(&db, d(2025, 6, 1), None, &GoalFilter::default())
            .await
            .unwrap();

        assert_eq!(report.total_open, 4);
        assert_eq!(report.overdue, 1);
        // Days open: 2, 20, 120, 7 → mean 37.25.
        assert_eq!(report.avg_days_open, Some(37.25));

        let counts: Vec<u64> = report.open_by_age.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 0, 1]);
        assert_eq!(counts.iter().sum::<u64>(), report.total_open);

        assert_eq!(report.top_students.len(), 2);
        assert_eq!(report.top_students[0].student_gid, "s1");
        assert_eq!(report.top_students[0].student_name.as_deref(), Some("Alice"));
        assert_eq!(report.top_students[0].open_goals, 3);
        assert_eq!(report.top_students[1].student_gid, "s2");
        assert_eq!(report.top_students[1].open_goals, 1);
    }

    #[tokio::test]
    async fn test_backlog_report_due_on_as_of_is_not_overdue() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            &[("s1", "Alice")],
            &[SeedGoal {
                gid: "g1",
                student: "s1",
                created: "2025-05-01",
                target: Some("2025-06-01"),
                completed: None,
            }],
        )
        .await;

        let report = backlog_report(&db, d(2025, 6, 1), None, &GoalFilter::default())
            .await
            .unwrap();
        assert_eq!(report.total_open, 1);
        // Overdue is strictly before the as-of date.
        assert_eq!(report.overdue, 0);
    }

    #[tokio::test]
    async fn test_backlog_report_top_n_limit_and_tie_break() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            &[("s1", "Alice"), ("s2", "Bob"), ("s3", "Cleo")],
            &[
                SeedGoal {
                    gid: "g1",
                    student: "s2",
                    created: "2025-05-01",
                    target: None,
                    completed: None,
                },
                SeedGoal {
                    gid: "g2",
                    student: "s1",
                    created: "2025-05-01",
                    target: None,
                    completed: None,
                },
                SeedGoal {
                    gid: "g3",
                    student: "s3",
                    created: "2025-05-01",
                    target: None,
                    completed: None,
                },
                SeedGoal {
                    gid: "g4",
                    student: "s3",
                    created: "2025-05-02",
                    target: None,
                    completed: None,
                },
            ],
        )
        .await;

        let report = backlog_report(&db, d(2025, 6, 1), Some(2), &GoalFilter::default())
            .await
            .unwrap();
        assert_eq!(report.top_students.len(), 2);
        assert_eq!(report.top_students[0].student_gid, "s3");
        // s1 and s2 tie at one open goal; the lower GID wins the last slot.
        assert_eq!(report.top_students[1].student_gid, "s1");
    }

    #[tokio::test]
    async fn test_backlog_report_student_filter() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            &[("s1", "Alice"), ("s2", "Bob")],
            &[
                SeedGoal {
                    gid: "g1",
                    student: "s1",
                    created: "2025-05-01",
                    target: None,
                    completed: None,
                },
                SeedGoal {
                    gid: "g2",
                    student: "s2",
                    created: "2025-05-01",
                    target: None,
                    completed: None,
                },
            ],
        )
        .await;

        let filter = GoalFilter {
            student_gid: Some("s1".to_string()),
            category: None,
        };
        let report = backlog_report(&db, d(2025, 6, 1), None, &filter).await.unwrap();
        assert_eq!(report.total_open, 1);
        assert_eq!(report.top_students.len(), 1);
        assert_eq!(report.top_students[0].student_gid, "s1");
    }

    #[tokio::test]
    async fn test_backlog_age_band_edges() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            &[("s1", "Alice")],
            &[
                // Exactly 7 days open: still the first band.
                SeedGoal {
                    gid: "g1",
                    student: "s1",
                    created: "2025-05-25",
                    target: None,
                    completed: None,
                },
                // Exactly 8 days: second band.
                SeedGoal {
                    gid: "g2",
                    student: "s1",
                    created: "2025-05-24",
                    target: None,
                    completed: None,
                },
                // Exactly 90 days: third band.
                SeedGoal {
                    gid: "g3",
                    student: "s1",
                    created: "2025-03-03",
                    target: None,
                    completed: None,
                },
                // 91 days: the open-ended band.
                SeedGoal {
                    gid: "g4",
                    student: "s1",
                    created: "2025-03-02",
                    target: None,
                    completed: None,
                },
                // Created today: zero days open.
                SeedGoal {
                    gid: "g5",
                    student: "s1",
                    created: "2025-06-01",
                    target: None,
                    completed: None,
                },
            ],
        )
        .await;

        let report = backlog_report(&db, d(2025, 6, 1), None, &GoalFilter::default())
            .await
            .unwrap();
        let counts: Vec<u64> = report.open_by_age.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 1]);
    }
}
