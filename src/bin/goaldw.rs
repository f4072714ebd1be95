use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use goaldw::storage::repository;
use goaldw::{Database, GoalFilter, Granularity};

#[derive(Parser)]
#[command(name = "goaldw", about = "Student goal analytics warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.goaldw/goaldw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a JSON snapshot of students and goals
    Import {
        /// Path to the snapshot file
        file: String,
    },
    /// Bucketed created/completed series over a window
    Series {
        /// Window start (YYYY-MM-DD); defaults to 90 days before the end
        #[arg(long)]
        from: Option<String>,
        /// Window end (YYYY-MM-DD); defaults to today
        #[arg(long)]
        to: Option<String>,
        /// Bucket granularity: day, week, month
        #[arg(long, default_value = "week")]
        granularity: String,
        /// Filter by student GID or email
        #[arg(long)]
        student: Option<String>,
        /// Filter by goal category
        #[arg(long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Completion-time statistics for goals completed in a window
    Stats {
        /// Window start (YYYY-MM-DD); defaults to 90 days before the end
        #[arg(long)]
        from: Option<String>,
        /// Window end (YYYY-MM-DD); defaults to today
        #[arg(long)]
        to: Option<String>,
        /// Filter by student GID or email
        #[arg(long)]
        student: Option<String>,
        /// Filter by goal category
        #[arg(long)]
        category: Option<String>,
        /// Histogram buckets, e.g. 0-7,8-30,31-90,90+
        #[arg(long)]
        buckets: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Backlog aging report for open goals
    Backlog {
        /// Reference date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        as_of: Option<String>,
        /// How many students to list (1-100)
        #[arg(long)]
        top: Option<i64>,
        /// Filter by student GID or email
        #[arg(long)]
        student: Option<String>,
        /// Filter by goal category
        #[arg(long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show warehouse status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("invalid date `{s}` (expected YYYY-MM-DD)"))
}

/// Resolve the analytics window: `to` defaults to today, `from` to 90 days
/// earlier. An inverted window is rejected here so the core never sees one.
fn resolve_window(from: Option<&str>, to: Option<&str>) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let end = match to {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive(),
    };
    let start = match from {
        Some(s) => parse_date(s)?,
        None => end - Duration::days(90),
    };
    if start > end {
        return Err(goaldw::Error::InvalidRange(format!("start {start} is after end {end}")).into());
    }
    Ok((start, end))
}

/// Resolve a student identifier (GID or email) against the warehouse.
/// Falls back to the original identifier if no match is found.
async fn build_filter(
    db: &Database,
    student: Option<&str>,
    category: Option<&str>,
) -> anyhow::Result<GoalFilter> {
    let student_gid = match student {
        Some(identifier) => {
            let id = identifier.to_string();
            let resolved = db
                .reader()
                .call(move |conn| repository::resolve_student_identifier(conn, &id))
                .await?;
            match resolved {
                Some(gid) => Some(gid),
                None => {
                    log::warn!("Could not resolve student '{identifier}' — using as-is");
                    Some(identifier.to_string())
                }
            }
        }
        None => None,
    };
    Ok(GoalFilter {
        student_gid,
        category: category.map(str::to_string),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };

    match cli.command {
        Commands::Import { file } => {
            let report = goaldw::import_snapshot(&db, &file).await?;
            println!("Imported {} students, {} goals", report.students_imported, report.goals_imported);
            if report.goals_skipped > 0 {
                println!("Skipped {} goals (run with -v for details)", report.goals_skipped);
            }
        }
        Commands::Series {
            from,
            to,
            granularity,
            student,
            category,
            json,
        } => {
            let (start, end) = resolve_window(from.as_deref(), to.as_deref())?;
            let granularity = Granularity::parse(&granularity)?;
            let filter = build_filter(&db, student.as_deref(), category.as_deref()).await?;
            let series = goaldw::completion_series(&db, start, end, granularity, &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&series)?);
            } else {
                print_series(&series);
            }
        }
        Commands::Stats {
            from,
            to,
            student,
            category,
            buckets,
            json,
        } => {
            let (start, end) = resolve_window(from.as_deref(), to.as_deref())?;
            let filter = build_filter(&db, student.as_deref(), category.as_deref()).await?;
            let buckets = buckets
                .as_deref()
                .map(goaldw::stats::parse_bucket_spec)
                .transpose()?;
            let stats = goaldw::completion_time_stats(&db, start, end, &filter, buckets).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Backlog {
            as_of,
            top,
            student,
            category,
            json,
        } => {
            let as_of = match as_of.as_deref() {
                Some(s) => parse_date(s)?,
                None => Utc::now().date_naive(),
            };
            let filter = build_filter(&db, student.as_deref(), category.as_deref()).await?;
            let report = goaldw::backlog_report(&db, as_of, top, &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_backlog(&report);
            }
        }
        Commands::Status => {
            print_status(&db).await?;
        }
        Commands::Config { action } => {
            handle_config(&db, action).await?;
        }
    }

    Ok(())
}

fn fmt_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "-".to_string(),
    }
}

fn print_series(series: &goaldw::CompletionSeries) {
    println!(
        "Goal throughput {} to {} by {}",
        series.start, series.end, series.granularity
    );
    println!("  {:<10} {:>8} {:>10} {:>8}", "bucket", "created", "completed", "rate");
    for point in &series.points {
        println!(
            "  {:<10} {:>8} {:>10} {:>8}",
            point.label,
            point.created,
            point.completed,
            fmt_rate(point.completion_rate)
        );
    }
    println!("  Totals:");
    println!("    Created:   {}", series.totals.goals_created);
    println!("    Completed: {}", series.totals.goals_completed);
    println!("    Net new:   {}", series.totals.net_new);
    println!("    Rate:      {}", fmt_rate(series.totals.completion_rate));
}

fn print_stats(stats: &goaldw::CompletionTimeStats) {
    println!("Completion time {} to {}", stats.start, stats.end);
    let s = &stats.summary;
    println!("  Completed: {}", s.count);
    match s.mean {
        Some(mean) => {
            println!("  Average:   {mean:.1} days");
            println!("  Median:    {:.1} days", s.median.unwrap_or(0.0));
            println!("  P90:       {:.1} days", s.p90.unwrap_or(0.0));
        }
        None => println!("  No completed goals in window"),
    }
    println!("  Histogram (days):");
    for bucket in &s.histogram {
        println!("    {:<8} {}", bucket.key, bucket.count);
    }
}

fn print_backlog(report: &goaldw::BacklogReport) {
    println!("Backlog as of {}", report.as_of);
    println!("  Open:    {}", report.total_open);
    println!("  Overdue: {}", report.overdue);
    match report.avg_days_open {
        Some(avg) => println!("  Average age: {avg:.1} days"),
        None => println!("  Average age: -"),
    }
    println!("  By age (days):");
    for band in &report.open_by_age {
        println!("    {:<8} {}", band.band, band.count);
    }
    if !report.top_students.is_empty() {
        println!("  Top students:");
        for s in &report.top_students {
            let name = s.student_name.as_deref().unwrap_or(&s.student_gid);
            println!("    {:<24} {}", name, s.open_goals);
        }
    }
}

async fn print_status(db: &Database) -> anyhow::Result<()> {
    let status = db
        .reader()
        .call(|conn| repository::warehouse_status(conn))
        .await?;
    println!("Warehouse Status");
    println!("  Students:        {}", status.students);
    println!("  Goals:           {}", status.goals);
    println!("  Completed goals: {}", status.completed_goals);
    println!("  Points earned:   {}", status.points_earned);
    println!(
        "  Goal dates:      {} to {}",
        status.earliest_created.as_deref().unwrap_or("-"),
        status.latest_created.as_deref().unwrap_or("-")
    );
    println!(
        "  Last import:     {}",
        status.last_import_at.unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_config(db: &Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let val: Option<String> = db
                .reader()
                .call({
                    let key = key.clone();
                    move |conn| repository::get_config(conn, &key)
                })
                .await?;
            match val {
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            db.writer()
                .call(move |conn| {
                    repository::set_config(conn, &key, &value)?;
                    Ok::<(), rusqlite::Error>(())
                })
                .await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items: Vec<(String, String)> = db
                .reader()
                .call(|conn| repository::list_config(conn))
                .await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
