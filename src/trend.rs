use crate::calc::mean;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

fn classify(earlier: f64, later: f64, margin: f64) -> Trend {
    if later > earlier + margin {
        Trend::Up
    } else if later < earlier - margin {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Semester trend: first half is `[0, ceil(n/2))`, second half is
/// `[floor(n/2), n)`, so the middle value of an odd run sits in both.
/// Needs two points; moves of 2 points or less are `Stable`.
pub fn split_half_trend(values: &[f64]) -> Trend {
    const MARGIN: f64 = 2.0;
    let n = values.len();
    if n < 2 {
        return Trend::Stable;
    }
    let first = &values[..n.div_ceil(2)];
    let second = &values[n / 2..];
    match (mean(first), mean(second)) {
        (Some(a), Some(b)) => classify(a, b, MARGIN),
        _ => Trend::Stable,
    }
}

/// Student history trend: compares the first and last `floor(n/3)` values.
/// Needs three points; moves of 3 points or less are `Stable`.
pub fn thirds_trend(values: &[f64]) -> Trend {
    const MARGIN: f64 = 3.0;
    let n = values.len();
    if n < 3 {
        return Trend::Stable;
    }
    let k = n / 3;
    match (mean(&values[..k]), mean(&values[n - k..])) {
        (Some(a), Some(b)) => classify(a, b, MARGIN),
        _ => Trend::Stable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_point_boundaries() {
        assert_eq!(split_half_trend(&[70.0, 73.0]), Trend::Up);
        assert_eq!(split_half_trend(&[70.0, 71.0]), Trend::Stable);
        assert_eq!(split_half_trend(&[73.0, 70.0]), Trend::Down);
        assert_eq!(split_half_trend(&[70.0, 72.0]), Trend::Stable);
    }

    #[test]
    fn fewer_than_two_points_is_stable() {
        assert_eq!(split_half_trend(&[]), Trend::Stable);
        assert_eq!(split_half_trend(&[99.0]), Trend::Stable);
    }

    #[test]
    fn odd_runs_share_the_middle_value() {
        // first = [60, 70], second = [70, 80]: 65 -> 75
        assert_eq!(split_half_trend(&[60.0, 70.0, 80.0]), Trend::Up);
        // first = [80, 50], second = [50, 81]: 65 -> 65.5
        assert_eq!(split_half_trend(&[80.0, 50.0, 81.0]), Trend::Stable);
    }

    #[test]
    fn thirds_needs_three_points_and_a_wider_margin() {
        assert_eq!(thirds_trend(&[60.0, 90.0]), Trend::Stable);
        assert_eq!(thirds_trend(&[60.0, 0.0, 63.0]), Trend::Stable);
        assert_eq!(thirds_trend(&[60.0, 0.0, 64.0]), Trend::Up);
        assert_eq!(thirds_trend(&[90.0, 80.0, 85.0, 70.0, 60.0, 75.0]), Trend::Down);
    }
}
