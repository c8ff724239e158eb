// Small statistics toolkit for the insight rules.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};

use super::models::WindowPoint;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Pearson correlation coefficient. `None` for fewer than two pairs,
/// mismatched lengths, or a constant series (undefined r).
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom < f64::EPSILON {
        None
    } else {
        Some((cov / denom).clamp(-1.0, 1.0))
    }
}

/// Least-squares slope of y against x. `None` for fewer than two points or
/// when every x is the same.
pub fn regression_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let mx = mean(&xs)?;
    let my = mean(&ys)?;

    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in points {
        let dx = x - mx;
        num += dx * (y - my);
        den += dx * dx;
    }
    if den < f64::EPSILON {
        None
    } else {
        Some(num / den)
    }
}

/// Slope of weekly means in points per calendar week. Weeks without data
/// keep their distance: x is the week offset from the first window.
pub fn weekly_slope(windows: &[WindowPoint]) -> Option<f64> {
    let first = week_start(&windows.first()?.window)?;
    let points = windows
        .iter()
        .map(|w| {
            let start = week_start(&w.window)?;
            Some(((start - first).num_days() as f64 / 7.0, w.mean))
        })
        .collect::<Option<Vec<_>>>()?;
    regression_slope(&points)
}

/// ISO week label such as `2025-W03`. Sorts chronologically.
pub fn iso_week_label(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Monday of the ISO week a `2025-W03` label names.
fn week_start(label: &str) -> Option<NaiveDate> {
    let (year, week) = label.split_once("-W")?;
    NaiveDate::from_isoywd_opt(year.parse().ok()?, week.parse().ok()?, Weekday::Mon)
}

/// Group dated values into ISO weeks, oldest first.
pub fn weekly_means(points: impl IntoIterator<Item = (NaiveDate, f64)>) -> Vec<WindowPoint> {
    let mut buckets: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (date, value) in points {
        let bucket = buckets.entry(iso_week_label(date)).or_insert((0.0, 0));
        bucket.0 += value;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(window, (sum, count))| WindowPoint {
            window,
            mean: sum / count as f64,
            count,
        })
        .collect()
}

/// Confidence from sample size and effect size.
///
/// Half of the weight saturates with the sample (`n == min_samples` already
/// gives 63% of it), half is the effect itself. Both parts are monotonic,
/// so more data or a stronger effect never lowers confidence.
pub fn confidence(sample_size: usize, min_samples: usize, effect: f64) -> f64 {
    let scale = min_samples.max(1) as f64;
    let sample_part = 1.0 - (-(sample_size as f64) / scale).exp();
    let effect_part = effect.clamp(0.0, 1.0);
    (0.5 * sample_part + 0.5 * effect_part).clamp(0.0, 1.0)
}
