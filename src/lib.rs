pub mod analytics;
pub mod buckets;
pub mod date_util;
pub mod error;
pub mod import;
pub mod stats;
pub mod storage;

pub use analytics::{
    backlog_report, completion_series, completion_time_stats, reconcile, AgeBand, AgeBandCount,
    AggregateRow, BacklogReport, CompletionSeries, CompletionTimeStats, GoalFilter, SeriesPoint,
    SeriesTotals, StudentBacklog,
};
pub use buckets::{bucket_label, generate, Granularity, TimeBucket};
pub use error::{Error, Result};
pub use import::{apply_snapshot, import_snapshot, ImportReport, Snapshot};
pub use stats::{HistogramBucket, SampleSummary};
pub use storage::Database;
