use chrono::NaiveDate;
use serde::Serialize;

use crate::buckets::Granularity;
use crate::stats::SampleSummary;

/// Optional filters applied to analytics queries.
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    pub student_gid: Option<String>,
    pub category: Option<String>,
}

/// One sparse grouped-count row from the store. Only labels with at least
/// one goal appear; the observed dates are a debugging aid, never used for
/// point bounds.
#[derive(Debug, Clone)]
pub struct AggregateRow {
    pub label: String,
    pub count: u64,
    pub observed_min_date: Option<NaiveDate>,
    pub observed_max_date: Option<NaiveDate>,
}

/// One reconciled point in a throughput series. `start` and `end` are the
/// bucket bounds, both inclusive.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub created: u64,
    pub completed: u64,
    pub completion_rate: Option<f64>,
}

/// Window-wide totals for a throughput series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesTotals {
    pub goals_created: u64,
    pub goals_completed: u64,
    pub net_new: i64,
    pub completion_rate: Option<f64>,
}

/// A bucketed goal-throughput series over a window.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionSeries {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub granularity: Granularity,
    pub points: Vec<SeriesPoint>,
    pub totals: SeriesTotals,
}

/// Completion-time statistics over a window.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionTimeStats {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub summary: SampleSummary,
}

/// Fixed aging bands for open goals, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBand {
    UpToWeek,
    UpToMonth,
    UpToQuarter,
    Longer,
}

impl AgeBand {
    pub const ALL: [AgeBand; 4] = [
        AgeBand::UpToWeek,
        AgeBand::UpToMonth,
        AgeBand::UpToQuarter,
        AgeBand::Longer,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgeBand::UpToWeek => "0-7",
            AgeBand::UpToMonth => "8-30",
            AgeBand::UpToQuarter => "31-90",
            AgeBand::Longer => "90+",
        }
    }

    /// Inclusive day bounds; a `None` max is unbounded. The SQL CASE arms
    /// counting each band are generated from these bounds.
    pub fn bounds(self) -> (i64, Option<i64>) {
        match self {
            AgeBand::UpToWeek => (0, Some(7)),
            AgeBand::UpToMonth => (8, Some(30)),
            AgeBand::UpToQuarter => (31, Some(90)),
            AgeBand::Longer => (91, None),
        }
    }

    pub fn of(days: i64) -> AgeBand {
        match days {
            ..=7 => AgeBand::UpToWeek,
            8..=30 => AgeBand::UpToMonth,
            31..=90 => AgeBand::UpToQuarter,
            _ => AgeBand::Longer,
        }
    }
}

/// Count of open goals inside one aging band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeBandCount {
    pub band: &'static str,
    pub count: u64,
}

/// Open-goal load for a single student.
#[derive(Debug, Clone, Serialize)]
pub struct StudentBacklog {
    pub student_gid: String,
    pub student_name: Option<String>,
    pub open_goals: u64,
}

/// Backlog aging report as of a reference date.
#[derive(Debug, Clone, Serialize)]
pub struct BacklogReport {
    pub as_of: NaiveDate,
    pub total_open: u64,
    pub overdue: u64,
    pub avg_days_open: Option<f64>,
    pub open_by_age: Vec<AgeBandCount>,
    pub top_students: Vec<StudentBacklog>,
}
