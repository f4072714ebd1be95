pub mod backlog;
pub mod completion;
pub mod series;
pub mod types;

pub use backlog::backlog_report;
pub use completion::completion_time_stats;
pub use series::{completion_series, reconcile};
pub use types::*;

/// Render a [`GoalFilter`] as an SQL fragment against the `fact_goals g`
/// alias, with numbered placeholders starting at `first_idx`, plus the bind
/// values in placeholder order.
pub(crate) fn goal_filter_sql(filter: &GoalFilter, first_idx: usize) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut params = Vec::new();
    let mut idx = first_idx;
    if let Some(student) = &filter.student_gid {
        clause.push_str(&format!(" AND g.student_gid = ?{idx}"));
        params.push(student.clone());
        idx += 1;
    }
    if let Some(category) = &filter.category {
        clause.push_str(&format!(" AND g.category = ?{idx}"));
        params.push(category.clone());
    }
    (clause, params)
}
