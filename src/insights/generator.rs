// Insight rules.
//
// generate() is a pure function of the records, their analysis results, the
// thresholds, and "now". It decides which findings hold; persisting them
// (and locking per scope and kind) is the pipeline's job. Every rule skips
// cohorts smaller than `min_samples`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::models::{
    AlertData, AlertReason, CorrelationData, Insight, InsightKind, InsightThresholds, Metric,
    RecommendationData, Scope, TrendData, TrendDirection,
};
use super::stats::{confidence, mean, pearson, weekly_means, weekly_slope};
use crate::db::models::{AnalysisResult, EvaluationRecord, SentimentLabel};

/// One satisfaction point away from the threshold is full effect.
const SATISFACTION_EFFECT_SCALE: f64 = 1.0;

/// Half a point per week is full effect for a trend.
const TREND_EFFECT_SCALE: f64 = 0.5;

pub const WINDOW_ALL: &str = "all";
pub const WINDOW_WEEKLY: &str = "weekly";
pub const WINDOW_RECENT: &str = "last_7_days";

/// What the rules read.
pub struct InsightInput<'a> {
    pub records: &'a [EvaluationRecord],
    pub results: &'a [AnalysisResult],
}

/// Run every rule and return the findings that hold, optionally only those
/// for one scope. Output order is deterministic.
pub fn generate(
    input: &InsightInput<'_>,
    thresholds: &InsightThresholds,
    scope_filter: Option<&Scope>,
    now: DateTime<Utc>,
) -> Vec<Insight> {
    let wanted = |scope: &Scope| scope_filter.map_or(true, |f| f == scope);
    let mut insights = Vec::new();

    let by_trainer = group_by(input.records, |r| Scope::Trainer(r.trainer_id.clone()));
    let by_type = group_by(input.records, |r| Scope::FormationType(r.formation_type.clone()));

    for (scope, records) in by_trainer.iter().chain(by_type.iter()) {
        if !wanted(scope) {
            continue;
        }
        insights.extend(satisfaction_alert(scope, records, thresholds, now));
        if matches!(scope, Scope::Trainer(_)) {
            insights.extend(recommendation(scope, records, thresholds, now));
        }
    }

    if wanted(&Scope::Global) {
        let all: Vec<&EvaluationRecord> = input.records.iter().collect();
        insights.extend(correlations(&all, thresholds, now));
        for metric in Metric::ALL {
            insights.extend(trend(&Scope::Global, &all, metric, thresholds, now));
        }
        insights.extend(negative_surge(input, thresholds, now));
    }

    for (scope, records) in &by_type {
        if wanted(scope) {
            insights.extend(trend(scope, records, Metric::Satisfaction, thresholds, now));
        }
    }

    debug!(
        count = insights.len(),
        records = input.records.len(),
        "Insight rules evaluated"
    );
    insights
}

fn group_by<'a>(
    records: &'a [EvaluationRecord],
    key: impl Fn(&EvaluationRecord) -> Scope,
) -> BTreeMap<Scope, Vec<&'a EvaluationRecord>> {
    let mut groups: BTreeMap<Scope, Vec<&EvaluationRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(key(record)).or_default().push(record);
    }
    groups
}

fn satisfaction_values(records: &[&EvaluationRecord]) -> Vec<f64> {
    records
        .iter()
        .map(|r| Metric::Satisfaction.value(r))
        .collect()
}

fn satisfaction_alert(
    scope: &Scope,
    records: &[&EvaluationRecord],
    t: &InsightThresholds,
    now: DateTime<Utc>,
) -> Option<Insight> {
    if records.len() < t.min_samples {
        return None;
    }
    let avg = mean(&satisfaction_values(records))?;
    if avg >= t.alert_floor {
        return None;
    }

    let effect = (t.alert_floor - avg) / SATISFACTION_EFFECT_SCALE;
    Some(Insight::new(
        InsightKind::Alert(AlertData {
            reason: AlertReason::LowSatisfaction,
            value: avg,
            threshold: t.alert_floor,
            sample_size: records.len(),
        }),
        scope.clone(),
        WINDOW_ALL,
        format!("Low satisfaction for {scope}"),
        format!(
            "Mean satisfaction is {avg:.2}/5 over {} evaluations, under the {:.1} floor.",
            records.len(),
            t.alert_floor
        ),
        confidence(records.len(), t.min_samples, effect),
        now,
    ))
}

fn recommendation(
    scope: &Scope,
    records: &[&EvaluationRecord],
    t: &InsightThresholds,
    now: DateTime<Utc>,
) -> Option<Insight> {
    if records.len() < t.min_samples {
        return None;
    }
    let avg = mean(&satisfaction_values(records))?;
    if avg <= t.recommend_ceiling {
        return None;
    }

    let effect = (avg - t.recommend_ceiling) / SATISFACTION_EFFECT_SCALE;
    Some(Insight::new(
        InsightKind::Recommendation(RecommendationData {
            mean_satisfaction: avg,
            threshold: t.recommend_ceiling,
            sample_size: records.len(),
        }),
        scope.clone(),
        WINDOW_ALL,
        format!("Exemplary results for {scope}"),
        format!(
            "Mean satisfaction is {avg:.2}/5 over {} evaluations. Consider sharing this trainer's practices.",
            records.len()
        ),
        confidence(records.len(), t.min_samples, effect),
        now,
    ))
}

fn correlations(
    records: &[&EvaluationRecord],
    t: &InsightThresholds,
    now: DateTime<Utc>,
) -> Vec<Insight> {
    if records.len() < t.min_samples {
        return Vec::new();
    }

    let series: HashMap<Metric, Vec<f64>> = Metric::ALL
        .iter()
        .map(|m| (*m, records.iter().map(|r| m.value(r)).collect()))
        .collect();

    let mut found = Vec::new();
    for (i, a) in Metric::ALL.iter().enumerate() {
        for b in &Metric::ALL[i + 1..] {
            let Some(r) = pearson(&series[a], &series[b]) else {
                continue;
            };
            if r.abs() <= t.correlation {
                continue;
            }
            let direction = if r > 0.0 { "rise together" } else { "move in opposite directions" };
            found.push(Insight::new(
                InsightKind::Correlation(CorrelationData {
                    metric_a: *a,
                    metric_b: *b,
                    coefficient: r,
                    sample_size: records.len(),
                }),
                Scope::Global,
                WINDOW_ALL,
                format!("{a} and {b} are correlated (r = {r:.2})"),
                format!(
                    "Across {} evaluations, {a} and {b} scores {direction}.",
                    records.len()
                ),
                confidence(records.len(), t.min_samples, r.abs()),
                now,
            ));
        }
    }
    found
}

fn trend(
    scope: &Scope,
    records: &[&EvaluationRecord],
    metric: Metric,
    t: &InsightThresholds,
    now: DateTime<Utc>,
) -> Option<Insight> {
    if records.len() < t.min_samples {
        return None;
    }
    let windows = weekly_means(records.iter().map(|r| (r.date, metric.value(r))));
    if windows.len() < t.min_trend_windows.max(2) {
        return None;
    }

    let means: Vec<f64> = windows.iter().map(|w| w.mean).collect();
    let s = weekly_slope(&windows)?;
    if s.abs() <= t.trend_slope {
        return None;
    }

    let direction = if s > 0.0 {
        TrendDirection::Rising
    } else {
        TrendDirection::Falling
    };
    let verb = match direction {
        TrendDirection::Rising => "rising",
        TrendDirection::Falling => "falling",
    };
    let description = format!(
        "Weekly mean {metric} moved from {:.2} ({}) to {:.2} ({}), {s:+.2} points per week.",
        means[0],
        windows[0].window,
        means[means.len() - 1],
        windows[windows.len() - 1].window,
    );

    Some(Insight::new(
        InsightKind::Trend(TrendData {
            metric,
            slope: s,
            direction,
            windows,
        }),
        scope.clone(),
        WINDOW_WEEKLY,
        format!("{} {verb} for {scope}", capitalize(metric.as_str())),
        description,
        confidence(records.len(), t.min_samples, s.abs() / TREND_EFFECT_SCALE),
        now,
    ))
}

fn negative_surge(
    input: &InsightInput<'_>,
    t: &InsightThresholds,
    now: DateTime<Utc>,
) -> Option<Insight> {
    let since = (now - Duration::days(t.surge_days)).date_naive();
    let recent: HashMap<&str, &EvaluationRecord> = input
        .records
        .iter()
        .filter(|r| r.date >= since)
        .map(|r| (r.id.as_str(), r))
        .collect();

    let sentiments: Vec<SentimentLabel> = input
        .results
        .iter()
        .filter(|res| recent.contains_key(res.record_id.as_str()))
        .map(|res| res.sentiment)
        .collect();
    if sentiments.len() < t.min_samples {
        return None;
    }

    let negative = sentiments
        .iter()
        .filter(|s| **s == SentimentLabel::Negative)
        .count();
    let share = negative as f64 / sentiments.len() as f64;
    if share <= t.surge_share {
        return None;
    }

    Some(Insight::new(
        InsightKind::Alert(AlertData {
            reason: AlertReason::NegativeSurge,
            value: share,
            threshold: t.surge_share,
            sample_size: sentiments.len(),
        }),
        Scope::Global,
        WINDOW_RECENT,
        "Surge in negative comments".to_string(),
        format!(
            "{:.1}% of the {} evaluations from the last {} days are negative.",
            share * 100.0,
            sentiments.len(),
            t.surge_days
        ),
        confidence(sentiments.len(), t.min_samples, share),
        now,
    ))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
