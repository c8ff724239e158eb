// On-demand analytics: filtered trend reports and formation comparisons.
//
// Unlike the insight rules these report numbers whether or not they cross a
// threshold, and persist nothing.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use super::models::{Metric, TrendDirection, WindowPoint};
use super::stats::{mean, weekly_means, weekly_slope};
use crate::db::models::{AnalysisResult, EvaluationRecord, SentimentLabel};
use crate::themes::taxonomy::Category;

/// Weekly slopes within ±this many points are reported as stable.
pub const STABLE_SLOPE: f64 = 0.05;

/// Which evaluations a trend report covers. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendQuery {
    /// Look-back window in days; `None` covers the whole history
    pub days: Option<u32>,
    pub formation_type: Option<String>,
    pub trainer: Option<String>,
}

impl TrendQuery {
    fn matches(&self, record: &EvaluationRecord, since: Option<NaiveDate>) -> bool {
        since.map_or(true, |d| record.date >= d)
            && self
                .formation_type
                .as_ref()
                .map_or(true, |f| &record.formation_type == f)
            && self.trainer.as_ref().map_or(true, |t| &record.trainer_id == t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub metric: Metric,
    pub windows: Vec<WindowPoint>,
    /// Points per calendar week; `None` with fewer than two weeks of data
    pub slope: Option<f64>,
    /// `None` when the slope is stable or unknown
    pub direction: Option<TrendDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    /// First day included, when the query has a look-back window
    pub since: Option<NaiveDate>,
    pub evaluations: usize,
    pub metrics: Vec<MetricTrend>,
    /// Weekly mean sentiment score of the analyzed evaluations in the window
    pub sentiment: Vec<WindowPoint>,
}

/// Weekly means and slopes of every metric for the evaluations `query` selects.
pub fn trend_report(
    records: &[EvaluationRecord],
    results: &[AnalysisResult],
    query: &TrendQuery,
    now: DateTime<Utc>,
) -> TrendReport {
    let since = query.days.and_then(|days| {
        now.checked_sub_signed(Duration::days(i64::from(days)))
            .map(|start| start.date_naive())
    });
    let selected: Vec<&EvaluationRecord> =
        records.iter().filter(|r| query.matches(r, since)).collect();

    let metrics = Metric::ALL
        .iter()
        .map(|&metric| {
            let windows = weekly_means(selected.iter().map(|r| (r.date, metric.value(r))));
            let slope = weekly_slope(&windows);
            MetricTrend {
                metric,
                direction: slope.and_then(direction_of),
                slope,
                windows,
            }
        })
        .collect();

    let dates: HashMap<&str, NaiveDate> = selected.iter().map(|r| (r.id.as_str(), r.date)).collect();
    let sentiment = weekly_means(results.iter().filter_map(|res| {
        dates
            .get(res.record_id.as_str())
            .map(|date| (*date, res.score))
    }));

    TrendReport {
        since,
        evaluations: selected.len(),
        metrics,
        sentiment,
    }
}

fn direction_of(slope: f64) -> Option<TrendDirection> {
    if slope > STABLE_SLOPE {
        Some(TrendDirection::Rising)
    } else if slope < -STABLE_SLOPE {
        Some(TrendDirection::Falling)
    } else {
        None
    }
}

/// One formation type's column in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationComparison {
    pub formation_type: String,
    pub evaluations: usize,
    /// Empty when the formation type has no evaluations
    pub metric_means: Vec<(Metric, f64)>,
    /// Mean sentiment score of the analyzed evaluations
    pub mean_sentiment: Option<f64>,
    /// Share of analyzed evaluations labelled negative, 0 to 1
    pub negative_share: Option<f64>,
    /// Theme mentions per category
    pub categories: BTreeMap<Category, usize>,
    /// Most mentioned themes, most frequent first
    pub top_themes: Vec<(String, usize)>,
}

/// Side-by-side scores, sentiment and theme mix per formation type.
///
/// With an empty `formation_types` every type in the corpus is compared, in
/// name order. Requested types without evaluations still get a column.
pub fn compare_formations(
    records: &[EvaluationRecord],
    results: &[AnalysisResult],
    formation_types: &[String],
    top_themes: usize,
) -> Vec<FormationComparison> {
    let mut by_type: BTreeMap<&str, Vec<&EvaluationRecord>> = BTreeMap::new();
    for record in records {
        by_type.entry(record.formation_type.as_str()).or_default().push(record);
    }
    let results: HashMap<&str, &AnalysisResult> =
        results.iter().map(|r| (r.record_id.as_str(), r)).collect();

    let wanted: Vec<&str> = if formation_types.is_empty() {
        by_type.keys().copied().collect()
    } else {
        formation_types.iter().map(String::as_str).collect()
    };

    wanted
        .into_iter()
        .map(|formation_type| {
            let members = by_type.get(&formation_type).map_or(&[][..], Vec::as_slice);
            let analyzed: Vec<&AnalysisResult> = members
                .iter()
                .filter_map(|r| results.get(r.id.as_str()).copied())
                .collect();
            column(formation_type, members, &analyzed, top_themes)
        })
        .collect()
}

fn column(
    formation_type: &str,
    members: &[&EvaluationRecord],
    analyzed: &[&AnalysisResult],
    top_themes: usize,
) -> FormationComparison {
    let metric_means = Metric::ALL
        .iter()
        .filter_map(|metric| {
            let values: Vec<f64> = members.iter().map(|r| metric.value(r)).collect();
            mean(&values).map(|m| (*metric, m))
        })
        .collect();

    let scores: Vec<f64> = analyzed.iter().map(|r| r.score).collect();
    let negative_share = (!analyzed.is_empty()).then(|| {
        let negative = analyzed
            .iter()
            .filter(|r| r.sentiment == SentimentLabel::Negative)
            .count();
        negative as f64 / analyzed.len() as f64
    });

    let mut categories: BTreeMap<Category, usize> = BTreeMap::new();
    let mut themes: HashMap<&str, usize> = HashMap::new();
    for tag in analyzed.iter().flat_map(|r| &r.themes) {
        *categories.entry(tag.category).or_insert(0) += 1;
        *themes.entry(tag.name.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = themes
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_themes);

    FormationComparison {
        formation_type: formation_type.to_string(),
        evaluations: members.len(),
        metric_means,
        mean_sentiment: mean(&scores),
        negative_share,
        categories,
        top_themes: ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ThemeTag;
    use crate::language::Language;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        day(3, 31).and_hms_opt(12, 0, 0).unwrap().and_utc()
    }

    fn record(id: &str, kind: &str, trainer: &str, satisfaction: u8, date: NaiveDate) -> EvaluationRecord {
        EvaluationRecord {
            id: id.into(),
            formation_id: "F-1".into(),
            formation_type: kind.into(),
            trainer_id: trainer.into(),
            satisfaction,
            content: 4,
            logistics: 3,
            applicability: 4,
            comment: String::new(),
            language: None,
            date,
        }
    }

    fn result(id: &str, score: f64, themes: &[(&str, Category)]) -> AnalysisResult {
        AnalysisResult {
            record_id: id.into(),
            language: Language::Fr,
            sentiment: SentimentLabel::from_score(score),
            score,
            confidence: 0.9,
            themes: themes
                .iter()
                .map(|(name, category)| ThemeTag {
                    name: (*name).into(),
                    category: *category,
                })
                .collect(),
            cluster_id: None,
            fingerprint: String::new(),
            model_version: "1".into(),
            needs_reprocessing: false,
            analyzed_at: now(),
        }
    }

    fn satisfaction(report: &TrendReport) -> &MetricTrend {
        &report.metrics[0]
    }

    #[test]
    fn test_trend_filters_by_trainer() {
        let records = vec![
            record("a1", "Excel", "T1", 5, day(3, 3)),
            record("a2", "Excel", "T1", 4, day(3, 10)),
            record("a3", "Excel", "T1", 3, day(3, 17)),
            record("b1", "Excel", "T2", 1, day(3, 3)),
            record("b2", "Excel", "T2", 5, day(3, 17)),
        ];
        let query = TrendQuery {
            trainer: Some("T1".into()),
            ..TrendQuery::default()
        };
        let report = trend_report(&records, &[], &query, now());

        assert_eq!(report.evaluations, 3);
        let trend = satisfaction(&report);
        assert_eq!(trend.metric, Metric::Satisfaction);
        assert!((trend.slope.unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(trend.direction, Some(TrendDirection::Falling));
    }

    #[test]
    fn test_trend_window_drops_old_evaluations() {
        let records = vec![
            record("old", "Excel", "T1", 1, day(1, 6)),
            record("new1", "Excel", "T1", 4, day(3, 17)),
            record("new2", "Excel", "T1", 4, day(3, 24)),
        ];
        let query = TrendQuery {
            days: Some(30),
            ..TrendQuery::default()
        };
        let report = trend_report(&records, &[], &query, now());

        assert_eq!(report.since, Some(day(3, 1)));
        assert_eq!(report.evaluations, 2);
        let trend = satisfaction(&report);
        assert_eq!(trend.windows.len(), 2);
        assert_eq!(trend.slope, Some(0.0));
        // flat is stable, not rising or falling
        assert_eq!(trend.direction, None);
    }

    #[test]
    fn test_single_week_has_no_slope() {
        let records = vec![record("a1", "Excel", "T1", 4, day(3, 3))];
        let report = trend_report(&records, &[], &TrendQuery::default(), now());
        assert_eq!(satisfaction(&report).slope, None);
    }

    #[test]
    fn test_trend_sentiment_follows_selection() {
        let records = vec![
            record("a1", "Excel", "T1", 4, day(3, 3)),
            record("b1", "Word", "T1", 4, day(3, 3)),
        ];
        let results = vec![result("a1", 0.8, &[]), result("b1", -0.8, &[])];
        let query = TrendQuery {
            formation_type: Some("Excel".into()),
            ..TrendQuery::default()
        };
        let report = trend_report(&records, &results, &query, now());
        assert_eq!(report.sentiment.len(), 1);
        assert!((report.sentiment[0].mean - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_compare_formations_side_by_side() {
        let records = vec![
            record("e1", "Excel", "T1", 5, day(3, 3)),
            record("e2", "Excel", "T1", 3, day(3, 4)),
            record("w1", "Word", "T2", 2, day(3, 3)),
        ];
        let results = vec![
            result("e1", 0.9, &[("formateur", Category::Trainer), ("contenu", Category::Quality)]),
            result("e2", 0.5, &[("formateur", Category::Trainer)]),
            result("w1", -0.7, &[("salle", Category::Logistics)]),
        ];

        let columns = compare_formations(&records, &results, &[], 5);
        assert_eq!(columns.len(), 2);

        let excel = &columns[0];
        assert_eq!(excel.formation_type, "Excel");
        assert_eq!(excel.evaluations, 2);
        assert_eq!(excel.metric_means[0], (Metric::Satisfaction, 4.0));
        assert!((excel.mean_sentiment.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(excel.negative_share, Some(0.0));
        assert_eq!(excel.categories[&Category::Trainer], 2);
        assert_eq!(excel.top_themes[0], ("formateur".to_string(), 2));

        let word = &columns[1];
        assert_eq!(word.negative_share, Some(1.0));
        assert_eq!(word.categories.get(&Category::Logistics), Some(&1));
    }

    #[test]
    fn test_compare_unknown_formation_gets_empty_column() {
        let records = vec![record("e1", "Excel", "T1", 5, day(3, 3))];
        let wanted = vec!["Excel".to_string(), "Python".to_string()];
        let columns = compare_formations(&records, &[], &wanted, 5);

        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].formation_type, "Python");
        assert_eq!(columns[1].evaluations, 0);
        assert!(columns[1].metric_means.is_empty());
        assert_eq!(columns[1].mean_sentiment, None);
    }
}
