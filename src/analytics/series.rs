use std::collections::HashMap;

use chrono::NaiveDate;

use crate::analytics::goal_filter_sql;
use crate::analytics::types::{
    AggregateRow, CompletionSeries, GoalFilter, SeriesPoint, SeriesTotals,
};
use crate::buckets::{self, Granularity, TimeBucket};
use crate::error::Result;
use crate::stats::rate;
use crate::storage::Database;

/// The goal event a series counts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalEvent {
    Created,
    Completed,
}

impl GoalEvent {
    fn date_column(self) -> &'static str {
        match self {
            GoalEvent::Created => "created_date",
            GoalEvent::Completed => "completed_date",
        }
    }
}

/// Compute the bucketed goal-throughput series for a window.
///
/// Bucket generation runs in Rust while the created and completed grouped
/// counts are fetched as two concurrent reads; either failure fails the
/// call. An inverted window yields an empty series rather than an error,
/// matching the bucket generator.
pub async fn completion_series(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
    filter: &GoalFilter,
) -> Result<CompletionSeries> {
    let buckets = buckets::generate(Some(start), Some(end), granularity);
    let start_str = start.format("%Y-%m-%d").to_string();
    let end_str = end.format("%Y-%m-%d").to_string();
    let (filter_where, filter_params) = goal_filter_sql(filter, 4);

    let created_fut = {
        let (start, end) = (start_str.clone(), end_str.clone());
        let (filter_where, filter_params) = (filter_where.clone(), filter_params.clone());
        db.reader().call(move |conn| {
            grouped_counts(
                conn,
                GoalEvent::Created,
                &start,
                &end,
                granularity,
                &filter_where,
                &filter_params,
            )
        })
    };
    let completed_fut = db.reader().call(move |conn| {
        grouped_counts(
            conn,
            GoalEvent::Completed,
            &start_str,
            &end_str,
            granularity,
            &filter_where,
            &filter_params,
        )
    });
    let (created_rows, completed_rows) = tokio::try_join!(created_fut, completed_fut)?;

    let points = reconcile(&buckets, &created_rows, &completed_rows);
    let goals_created: u64 = points.iter().map(|p| p.created).sum();
    let goals_completed: u64 = points.iter().map(|p| p.completed).sum();

    Ok(CompletionSeries {
        start,
        end,
        granularity,
        points,
        totals: SeriesTotals {
            goals_created,
            goals_completed,
            net_new: goals_created as i64 - goals_completed as i64,
            completion_rate: rate(goals_completed, goals_created),
        },
    })
}

/// Merge sparse grouped counts onto a gapless bucket sequence: one point
/// per bucket, in bucket order, zero-filled where the store had no row.
///
/// Matching is by label only; point bounds always come from the buckets.
/// A duplicate label within one row set keeps the last row's count.
pub fn reconcile(
    buckets: &[TimeBucket],
    created_rows: &[AggregateRow],
    completed_rows: &[AggregateRow],
) -> Vec<SeriesPoint> {
    let created: HashMap<&str, u64> = created_rows
        .iter()
        .map(|r| (r.label.as_str(), r.count))
        .collect();
    let completed: HashMap<&str, u64> = completed_rows
        .iter()
        .map(|r| (r.label.as_str(), r.count))
        .collect();

    buckets
        .iter()
        .map(|b| {
            let created = created.get(b.label.as_str()).copied().unwrap_or(0);
            let completed = completed.get(b.label.as_str()).copied().unwrap_or(0);
            SeriesPoint {
                label: b.label.clone(),
                start: b.start,
                end: b.end,
                created,
                completed,
                completion_rate: rate(completed, created),
            }
        })
        .collect()
}

/// Sparse grouped counts for one goal event across a window. Grouping runs
/// through the `bucket_label` SQL function, so labels line up with the
/// generator by construction.
fn grouped_counts(
    conn: &rusqlite::Connection,
    event: GoalEvent,
    start: &str,
    end: &str,
    granularity: Granularity,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<Vec<AggregateRow>, rusqlite::Error> {
    let date_col = event.date_column();
    let completed_guard = match event {
        GoalEvent::Created => "",
        GoalEvent::Completed => " AND g.is_completed = 1",
    };
    let sql = format!(
        "SELECT bucket_label(g.{date_col}, ?3) AS label, COUNT(*),
                MIN(g.{date_col}), MAX(g.{date_col})
         FROM fact_goals g
         WHERE g.{date_col} IS NOT NULL
           AND g.{date_col} >= ?1 AND g.{date_col} <= ?2{completed_guard}{filter_where}
         GROUP BY label
         ORDER BY label"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, start)?;
    stmt.raw_bind_parameter(2, end)?;
    stmt.raw_bind_parameter(3, granularity.as_str())?;
    for (i, param) in filter_params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 4, param)?;
    }

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(AggregateRow {
            label: row.get(0)?,
            count: row.get::<_, i64>(1)? as u64,
            observed_min_date: parse_date_key(row.get::<_, Option<String>>(2)?),
            observed_max_date: parse_date_key(row.get::<_, Option<String>>(3)?),
        });
    }
    Ok(out)
}

fn parse_date_key(key: Option<String>) -> Option<NaiveDate> {
    key.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}
