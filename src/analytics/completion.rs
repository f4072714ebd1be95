use chrono::NaiveDate;

use crate::analytics::goal_filter_sql;
use crate::analytics::types::{CompletionTimeStats, GoalFilter};
use crate::error::Result;
use crate::stats::{self, HistogramBucket};
use crate::storage::Database;

/// Summarize how long goals completed inside the window took, as count,
/// mean, median, p90, and a histogram.
///
/// `buckets` overrides the default histogram layout; the override is
/// validated before any data is read. An empty sample produces nulls and
/// an all-zero histogram.
pub async fn completion_time_stats(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
    filter: &GoalFilter,
    buckets: Option<Vec<HistogramBucket>>,
) -> Result<CompletionTimeStats> {
    let buckets = match buckets {
        Some(buckets) => {
            stats::validate_buckets(&buckets)?;
            buckets
        }
        None => stats::default_buckets(),
    };

    let start_str = start.format("%Y-%m-%d").to_string();
    let end_str = end.format("%Y-%m-%d").to_string();
    let (filter_where, filter_params) = goal_filter_sql(filter, 3);

    let sample = db
        .reader()
        .call(move |conn| {
            completion_sample(conn, &start_str, &end_str, &filter_where, &filter_params)
        })
        .await?;

    let summary = stats::summarize(&sample, &buckets)?;
    Ok(CompletionTimeStats {
        start,
        end,
        summary,
    })
}

/// Days-to-complete for every goal completed inside the window, sorted
/// ascending. Negative durations never reach the sample.
fn completion_sample(
    conn: &rusqlite::Connection,
    start: &str,
    end: &str,
    filter_where: &str,
    filter_params: &[String],
) -> std::result::Result<Vec<f64>, rusqlite::Error> {
    let sql = format!(
        "SELECT g.days_to_complete
         FROM fact_goals g
         WHERE g.is_completed = 1 AND g.days_to_complete IS NOT NULL
           AND g.days_to_complete >= 0
           AND g.completed_date >= ?1 AND g.completed_date <= ?2{filter_where}
         ORDER BY g.days_to_complete"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.raw_bind_parameter(1, start)?;
    stmt.raw_bind_parameter(2, end)?;
    for (i, param) in filter_params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 3, param)?;
    }

    let mut days = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        days.push(row.get::<_, i64>(0)? as f64);
    }
    Ok(days)
}
