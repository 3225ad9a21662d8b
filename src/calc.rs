use crate::error::{ServiceError, ServiceResult};
use crate::model::Score;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreEntry {
    Absent,
    /// Present but no value recorded yet.
    Unscored,
    Submitted(f64),
}

impl From<&Score> for ScoreEntry {
    fn from(score: &Score) -> Self {
        if score.is_absent {
            return ScoreEntry::Absent;
        }
        match score.value {
            Some(v) => ScoreEntry::Submitted(v),
            None => ScoreEntry::Unscored,
        }
    }
}

/// Half-up rounding to 2 decimals: `floor(100*x + 0.5) / 100`.
pub fn round_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Percentage of `total` with 2 decimals, computed as
/// `round(count / total * 10000) / 100`. Zero when `total` is zero.
pub fn percent_of(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (((count as f64) / (total as f64)) * 10000.0 + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSummary {
    pub count: usize,
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

/// Mean (2 decimals), max and min; all zero for an empty input.
pub fn summarize<I>(values: I) -> ValueSummary
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0_usize;
    let mut sum = 0.0_f64;
    let mut max = f64::MIN;
    let mut min = f64::MAX;
    for v in values {
        count += 1;
        sum += v;
        if v > max {
            max = v;
        }
        if v < min {
            min = v;
        }
    }
    if count == 0 {
        return ValueSummary::default();
    }
    ValueSummary {
        count,
        average: round_2_decimals(sum / (count as f64)),
        max,
        min,
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn cmp_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub excellent: f64,
    pub pass: f64,
    pub poor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            excellent: 85.0,
            pass: 60.0,
            poor: 40.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> ServiceResult<()> {
        for (name, v) in [
            ("excellent", self.excellent),
            ("pass", self.pass),
            ("poor", self.poor),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ServiceError::invalid(format!(
                    "thresholds.{} must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    label: &'static str,
    min: i64,
    max: i64,
}

const BUCKETS: [Bucket; 6] = [
    Bucket { label: "90-100", min: 90, max: 100 },
    Bucket { label: "80-89", min: 80, max: 89 },
    Bucket { label: "70-79", min: 70, max: 79 },
    Bucket { label: "60-69", min: 60, max: 69 },
    Bucket { label: "50-59", min: 50, max: 59 },
    Bucket { label: "0-49", min: 0, max: 49 },
];

/// Index into the fixed buckets. Fractional values fall with their integer
/// part (89.5 counts as 80-89); anything outside [0, 100] has no bucket.
fn bucket_index(value: f64) -> Option<usize> {
    if !(0.0..=100.0).contains(&value) {
        return None;
    }
    let whole = value.floor() as i64;
    BUCKETS
        .iter()
        .position(|b| whole >= b.min && whole <= b.max)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
    pub range: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAggregate {
    pub total_students: usize,
    pub submitted_count: usize,
    pub absent_count: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub excellent_count: usize,
    pub excellent_rate: f64,
    pub pass_count: usize,
    pub pass_rate: f64,
    pub poor_count: usize,
    pub poor_rate: f64,
    pub score_distribution: Vec<DistributionBucket>,
}

pub fn aggregate_exam<I>(entries: I, thresholds: &Thresholds) -> ExamAggregate
where
    I: IntoIterator<Item = ScoreEntry>,
{
    let mut total_students = 0_usize;
    let mut absent_count = 0_usize;
    let mut values: Vec<f64> = Vec::new();

    for e in entries {
        total_students += 1;
        match e {
            ScoreEntry::Absent => absent_count += 1,
            ScoreEntry::Unscored => {}
            ScoreEntry::Submitted(v) => values.push(v),
        }
    }

    let submitted_count = values.len();
    let summary = summarize(values.iter().copied());
    let excellent_count = values.iter().filter(|v| **v >= thresholds.excellent).count();
    let pass_count = values.iter().filter(|v| **v >= thresholds.pass).count();
    let poor_count = values.iter().filter(|v| **v < thresholds.poor).count();

    let mut bucket_counts = [0_usize; BUCKETS.len()];
    for v in &values {
        if let Some(i) = bucket_index(*v) {
            bucket_counts[i] += 1;
        }
    }
    let score_distribution = BUCKETS
        .iter()
        .zip(bucket_counts)
        .map(|(b, count)| DistributionBucket {
            range: b.label.to_string(),
            count,
            percentage: percent_of(count, submitted_count),
        })
        .collect();

    ExamAggregate {
        total_students,
        submitted_count,
        absent_count,
        average_score: summary.average,
        max_score: summary.max,
        min_score: summary.min,
        excellent_count,
        excellent_rate: percent_of(excellent_count, submitted_count),
        pass_count,
        pass_rate: percent_of(pass_count, submitted_count),
        poor_count,
        poor_rate: percent_of(poor_count, submitted_count),
        score_distribution,
    }
}
