use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static RE_BUCKET_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)$").unwrap());
static RE_BUCKET_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\+$").unwrap());

/// Round to two decimal places, half away from zero.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Round to four decimal places, half away from zero.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Ratio rounded to four decimals, or `None` when the denominator is zero.
/// A zero numerator over a nonzero denominator is a real `0.0`.
pub fn rate(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(round4(numerator as f64 / denominator as f64))
}

/// One histogram bucket over an inclusive `[min, max]` day range. A `max`
/// of `None` is an open ceiling, allowed only on the last bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub key: String,
    pub min: f64,
    pub max: Option<f64>,
}

impl HistogramBucket {
    pub fn new(key: &str, min: f64, max: Option<f64>) -> HistogramBucket {
        HistogramBucket {
            key: key.to_string(),
            min,
            max,
        }
    }

    fn contains(&self, v: f64) -> bool {
        v >= self.min && self.max.map_or(true, |max| v <= max)
    }
}

/// Default completion-time buckets.
pub fn default_buckets() -> Vec<HistogramBucket> {
    vec![
        HistogramBucket::new("0-7", 0.0, Some(7.0)),
        HistogramBucket::new("8-14", 8.0, Some(14.0)),
        HistogramBucket::new("15-30", 15.0, Some(30.0)),
        HistogramBucket::new("31-60", 31.0, Some(60.0)),
        HistogramBucket::new("61-90", 61.0, Some(90.0)),
        HistogramBucket::new("90+", 91.0, None),
    ]
}

/// Parse a comma-separated bucket spec like `0-7,8-30,31-90,90+`.
///
/// `A-B` covers `A` through `B` inclusive; `N+` is an open bucket counting
/// values strictly greater than `N`. The parsed list is validated before
/// being returned.
pub fn parse_bucket_spec(spec: &str) -> Result<Vec<HistogramBucket>> {
    let mut buckets = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if let Some(caps) = RE_BUCKET_RANGE.captures(part) {
            let min: f64 = caps[1]
                .parse()
                .map_err(|_| Error::BucketConfig(part.to_string()))?;
            let max: f64 = caps[2]
                .parse()
                .map_err(|_| Error::BucketConfig(part.to_string()))?;
            buckets.push(HistogramBucket::new(part, min, Some(max)));
        } else if let Some(caps) = RE_BUCKET_OPEN.captures(part) {
            let floor: f64 = caps[1]
                .parse()
                .map_err(|_| Error::BucketConfig(part.to_string()))?;
            buckets.push(HistogramBucket::new(part, floor + 1.0, None));
        } else {
            return Err(Error::BucketConfig(format!("unrecognized bucket `{part}`")));
        }
    }
    validate_buckets(&buckets)?;
    Ok(buckets)
}

/// Validate a histogram bucket list: non-empty, ascending, whole-day
/// contiguous, non-overlapping, with an open ceiling only on the last
/// bucket.
pub fn validate_buckets(buckets: &[HistogramBucket]) -> Result<()> {
    if buckets.is_empty() {
        return Err(Error::BucketConfig("bucket list is empty".to_string()));
    }
    for (i, b) in buckets.iter().enumerate() {
        if b.min < 0.0 {
            return Err(Error::BucketConfig(format!(
                "bucket `{}` starts below zero",
                b.key
            )));
        }
        match b.max {
            Some(max) if max < b.min => {
                return Err(Error::BucketConfig(format!(
                    "bucket `{}` has max below min",
                    b.key
                )));
            }
            None if i != buckets.len() - 1 => {
                return Err(Error::BucketConfig(format!(
                    "open-ended bucket `{}` must be last",
                    b.key
                )));
            }
            _ => {}
        }
    }
    for pair in buckets.windows(2) {
        if let Some(ceiling) = pair[0].max {
            if pair[1].min != ceiling + 1.0 {
                return Err(Error::BucketConfig(format!(
                    "buckets `{}` and `{}` are not contiguous",
                    pair[0].key, pair[1].key
                )));
            }
        }
    }
    Ok(())
}

/// Order statistics over a completion-time sample.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleSummary {
    pub count: u64,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub p90: Option<f64>,
    pub histogram: Vec<HistogramCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramCount {
    pub key: String,
    pub count: u64,
}

/// Summarize a sample against a validated bucket list.
///
/// An empty sample yields explicit nulls and an all-zero histogram, never
/// an error. A value that matches no bucket means the caller supplied a
/// bucket list that does not cover its data, and fails the whole call.
pub fn summarize(sample: &[f64], buckets: &[HistogramBucket]) -> Result<SampleSummary> {
    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut counts = vec![0u64; buckets.len()];
    for &v in &sorted {
        match buckets.iter().position(|b| b.contains(v)) {
            Some(idx) => counts[idx] += 1,
            None => return Err(Error::UnbucketedSample(v)),
        }
    }
    let histogram = buckets
        .iter()
        .zip(counts)
        .map(|(b, count)| HistogramCount {
            key: b.key.clone(),
            count,
        })
        .collect();

    if sorted.is_empty() {
        return Ok(SampleSummary {
            count: 0,
            mean: None,
            median: None,
            p90: None,
            histogram,
        });
    }
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Ok(SampleSummary {
        count: sorted.len() as u64,
        mean: Some(round2(mean)),
        median: percentile(&sorted, 0.5).map(round2),
        p90: percentile(&sorted, 0.9).map(round2),
        histogram,
    })
}

/// Percentile by linear interpolation between closest ranks. At 0.5 this
/// is the median, averaging the two middle values for even-sized samples.
fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = pct * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}
