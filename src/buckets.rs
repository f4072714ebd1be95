use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::date_util::{
    first_day_of_month, last_day_of_month, last_day_of_year, sunday_on_or_before,
};
use crate::error::{Error, Result};

/// Reporting granularity for time-bucketed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Parse a granularity keyword: `day`, `week`, or `month`.
    pub fn parse(s: &str) -> Result<Granularity> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            _ => Err(Error::GranularityParse(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reporting bucket. `start` and `end` are both inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Grouping label for a single date at a given granularity.
///
/// Day labels are `YYYY-MM-DD`, month labels `YYYY-MM`. Week labels are
/// `YYYY-WW` using the warehouse week convention rather than ISO 8601:
/// weeks run Sunday through Saturday, week 1 is the week containing
/// January 1, and a date's week number is its day-of-year offset plus the
/// weekday index of January 1 (Sunday = 0), divided by seven, plus one.
/// A week straddling two years is numbered within each year separately.
///
/// This function is also registered as the `bucket_label` SQL function on
/// every connection, so series queries group by exactly this labelling.
pub fn bucket_label(d: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => d.format("%Y-%m-%d").to_string(),
        Granularity::Week => {
            let jan1 = NaiveDate::from_ymd_opt(d.year(), 1, 1).unwrap();
            let week = (d.ordinal0() + jan1.weekday().num_days_from_sunday()) / 7 + 1;
            format!("{}-{:02}", d.year(), week)
        }
        Granularity::Month => d.format("%Y-%m").to_string(),
    }
}

/// Generate the gapless bucket sequence covering `[start, end]`.
///
/// Day buckets are single dates. Week buckets run Sunday through Saturday,
/// so the first and last may extend past the requested range; each week is
/// labelled through its first in-range day. A week whose in-range days fall
/// on both sides of Dec 31 is split at the year boundary, because the label
/// formula numbers each year separately: without the split, rows from the
/// later year would carry a label no bucket holds and their counts would
/// vanish from the series. Month buckets span whole calendar months, one
/// per month the range touches. A missing bound or an inverted range
/// yields an empty sequence.
pub fn generate(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    granularity: Granularity,
) -> Vec<TimeBucket> {
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s <= e => (s, e),
        _ => return Vec::new(),
    };
    let mut buckets = Vec::new();
    match granularity {
        Granularity::Day => {
            let mut cursor = start;
            while cursor <= end {
                buckets.push(TimeBucket {
                    label: bucket_label(cursor, Granularity::Day),
                    start: cursor,
                    end: cursor,
                });
                cursor += Duration::days(1);
            }
        }
        Granularity::Week => {
            let mut cursor = sunday_on_or_before(start);
            while cursor <= end {
                let week_end = cursor + Duration::days(6);
                let in_start = cursor.max(start);
                let in_end = week_end.min(end);
                if in_start.year() != in_end.year() {
                    // In-range days on both sides of Dec 31 carry different
                    // year-week labels; split so both label a bucket.
                    let boundary = last_day_of_year(cursor.year());
                    buckets.push(TimeBucket {
                        label: bucket_label(in_start, Granularity::Week),
                        start: cursor,
                        end: boundary,
                    });
                    buckets.push(TimeBucket {
                        label: bucket_label(boundary + Duration::days(1), Granularity::Week),
                        start: boundary + Duration::days(1),
                        end: week_end,
                    });
                } else {
                    buckets.push(TimeBucket {
                        label: bucket_label(in_start, Granularity::Week),
                        start: cursor,
                        end: week_end,
                    });
                }
                cursor += Duration::days(7);
            }
        }
        Granularity::Month => {
            let mut cursor = first_day_of_month(start);
            while cursor <= end {
                let month_end = last_day_of_month(cursor.year(), cursor.month());
                buckets.push(TimeBucket {
                    label: bucket_label(cursor, Granularity::Month),
                    start: cursor,
                    end: month_end,
                });
                cursor = month_end + Duration::days(1);
            }
        }
    }
    buckets
}
