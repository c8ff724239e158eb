// Insight types.
//
// An insight is a closed tagged variant: each kind carries its own typed
// payload, so producer and consumers cannot drift apart on what a "trend"
// contains. The stable key makes regeneration an upsert.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::models::EvaluationRecord;

/// What an insight is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    FormationType(String),
    Trainer(String),
}

impl Scope {
    /// Stable textual form, used in keys and storage.
    pub fn as_key(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::FormationType(t) => format!("formation_type:{t}"),
            Scope::Trainer(id) => format!("trainer:{id}"),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "all evaluations"),
            Scope::FormationType(t) => write!(f, "formation type {t}"),
            Scope::Trainer(id) => write!(f, "trainer {id}"),
        }
    }
}

/// Discriminant of `InsightKind`, for filtering and locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Trend,
    Alert,
    Recommendation,
    Correlation,
}

impl InsightType {
    pub const ALL: [InsightType; 4] = [
        InsightType::Trend,
        InsightType::Alert,
        InsightType::Recommendation,
        InsightType::Correlation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Trend => "trend",
            InsightType::Alert => "alert",
            InsightType::Recommendation => "recommendation",
            InsightType::Correlation => "correlation",
        }
    }
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InsightType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trend" => Ok(InsightType::Trend),
            "alert" => Ok(InsightType::Alert),
            "recommendation" => Ok(InsightType::Recommendation),
            "correlation" => Ok(InsightType::Correlation),
            other => anyhow::bail!(
                "Unknown insight kind: {other:?} (expected trend, alert, recommendation or correlation)"
            ),
        }
    }
}

/// The four rated criteria of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Satisfaction,
    Content,
    Logistics,
    Applicability,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Satisfaction,
        Metric::Content,
        Metric::Logistics,
        Metric::Applicability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Satisfaction => "satisfaction",
            Metric::Content => "content",
            Metric::Logistics => "logistics",
            Metric::Applicability => "applicability",
        }
    }

    pub fn value(&self, record: &EvaluationRecord) -> f64 {
        let score = match self {
            Metric::Satisfaction => record.satisfaction,
            Metric::Content => record.content,
            Metric::Logistics => record.logistics,
            Metric::Applicability => record.applicability,
        };
        f64::from(score)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
}

/// Mean of a metric over one ISO week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPoint {
    /// ISO week label, e.g. `2025-W10`
    pub window: String,
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendData {
    pub metric: Metric,
    /// Least-squares slope in points per week
    pub slope: f64,
    pub direction: TrendDirection,
    pub windows: Vec<WindowPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    /// Mean satisfaction under the floor
    LowSatisfaction,
    /// Share of negative comments over the recent window above the limit
    NegativeSurge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub reason: AlertReason,
    /// Mean satisfaction, or negative share for a surge
    pub value: f64,
    pub threshold: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationData {
    pub mean_satisfaction: f64,
    pub threshold: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationData {
    pub metric_a: Metric,
    pub metric_b: Metric,
    /// Pearson r in [-1, 1]
    pub coefficient: f64,
    pub sample_size: usize,
}

/// Insight payload, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InsightKind {
    Trend(TrendData),
    Alert(AlertData),
    Recommendation(RecommendationData),
    Correlation(CorrelationData),
}

impl InsightKind {
    pub fn insight_type(&self) -> InsightType {
        match self {
            InsightKind::Trend(_) => InsightType::Trend,
            InsightKind::Alert(_) => InsightType::Alert,
            InsightKind::Recommendation(_) => InsightType::Recommendation,
            InsightKind::Correlation(_) => InsightType::Correlation,
        }
    }

    /// Distinguishes several findings of one kind in the same scope and
    /// window (one trend per metric, one correlation per metric pair).
    pub fn subject(&self) -> String {
        match self {
            InsightKind::Trend(t) => t.metric.as_str().to_string(),
            InsightKind::Alert(a) => match a.reason {
                AlertReason::LowSatisfaction => "low_satisfaction".to_string(),
                AlertReason::NegativeSurge => "negative_surge".to_string(),
            },
            InsightKind::Recommendation(_) => "exemplary".to_string(),
            InsightKind::Correlation(c) => format!("{}~{}", c.metric_a, c.metric_b),
        }
    }
}

/// Stable identity: first 16 hex chars of SHA-256 over kind, scope, time
/// window and subject.
pub fn insight_key(kind: InsightType, scope: &Scope, window: &str, subject: &str) -> String {
    let scope_key = scope.as_key();
    let mut hasher = Sha256::new();
    for part in [kind.as_str(), scope_key.as_str(), window, subject] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// A derived, typed, confidence-scored finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub key: String,
    pub kind: InsightKind,
    pub scope: Scope,
    /// Time window the finding covers (`all`, `weekly`, `last_7_days`)
    pub window: String,
    pub title: String,
    pub description: String,
    /// In [0, 1]
    pub confidence: f64,
    /// Set on first generation, kept across regenerations
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn new(
        kind: InsightKind,
        scope: Scope,
        window: &str,
        title: String,
        description: String,
        confidence: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let key = insight_key(kind.insight_type(), &scope, window, &kind.subject());
        Self {
            key,
            kind,
            scope,
            window: window.to_string(),
            title,
            description,
            confidence: confidence.clamp(0.0, 1.0),
            created_at,
        }
    }

    pub fn insight_type(&self) -> InsightType {
        self.kind.insight_type()
    }
}

/// Filters for listing insights. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub kind: Option<InsightType>,
    pub scope: Option<Scope>,
    pub min_confidence: Option<f64>,
}

impl InsightFilter {
    pub fn matches(&self, insight: &Insight) -> bool {
        self.kind.map_or(true, |k| insight.insight_type() == k)
            && self.scope.as_ref().map_or(true, |s| &insight.scope == s)
            && self.min_confidence.map_or(true, |c| insight.confidence >= c)
    }
}

/// Named thresholds for every insight rule.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightThresholds {
    /// Mean satisfaction under this raises an alert
    pub alert_floor: f64,
    /// Mean satisfaction over this earns a recommendation
    pub recommend_ceiling: f64,
    /// |Pearson r| over this is reported
    pub correlation: f64,
    /// |slope| in points per week over this is a trend
    pub trend_slope: f64,
    /// Smallest cohort any rule will judge
    pub min_samples: usize,
    /// Fewest weekly windows a trend needs
    pub min_trend_windows: usize,
    /// Share of negative comments that counts as a surge
    pub surge_share: f64,
    /// How far back the surge rule looks, in days
    pub surge_days: i64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            alert_floor: 3.0,
            recommend_ceiling: 4.5,
            correlation: 0.5,
            trend_slope: 0.1,
            min_samples: 5,
            min_trend_windows: 3,
            surge_share: 0.3,
            surge_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> InsightKind {
        InsightKind::Alert(AlertData {
            reason: AlertReason::LowSatisfaction,
            value: 2.0,
            threshold: 3.0,
            sample_size: 10,
        })
    }

    #[test]
    fn test_key_is_stable_and_short() {
        let scope = Scope::Trainer("T-1".into());
        let a = insight_key(InsightType::Alert, &scope, "all", "low_satisfaction");
        let b = insight_key(InsightType::Alert, &scope, "all", "low_satisfaction");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let scope = Scope::Trainer("T-1".into());
        let base = insight_key(InsightType::Alert, &scope, "all", "x");
        assert_ne!(base, insight_key(InsightType::Trend, &scope, "all", "x"));
        assert_ne!(base, insight_key(InsightType::Alert, &Scope::Global, "all", "x"));
        assert_ne!(base, insight_key(InsightType::Alert, &scope, "weekly", "x"));
        assert_ne!(base, insight_key(InsightType::Alert, &scope, "all", "y"));
    }

    #[test]
    fn test_scope_keys_do_not_collide() {
        assert_ne!(
            Scope::Trainer("X".into()).as_key(),
            Scope::FormationType("X".into()).as_key()
        );
    }

    #[test]
    fn test_kind_serializes_with_type_tag() {
        let json = serde_json::to_value(alert()).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["reason"], "low_satisfaction");
        let back: InsightKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, alert());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let insight = Insight::new(
            alert(),
            Scope::Global,
            "all",
            "t".into(),
            "d".into(),
            1.7,
            Utc::now(),
        );
        assert_eq!(insight.confidence, 1.0);
    }

    #[test]
    fn test_filter() {
        let insight = Insight::new(
            alert(),
            Scope::Trainer("T-1".into()),
            "all",
            "t".into(),
            "d".into(),
            0.8,
            Utc::now(),
        );
        assert!(InsightFilter::default().matches(&insight));
        assert!(InsightFilter {
            kind: Some(InsightType::Alert),
            ..Default::default()
        }
        .matches(&insight));
        assert!(!InsightFilter {
            kind: Some(InsightType::Trend),
            ..Default::default()
        }
        .matches(&insight));
        assert!(!InsightFilter {
            min_confidence: Some(0.9),
            ..Default::default()
        }
        .matches(&insight));
    }

    #[test]
    fn test_insight_type_parsing() {
        assert_eq!("Alert".parse::<InsightType>().unwrap(), InsightType::Alert);
        assert!("anomaly".parse::<InsightType>().is_err());
    }
}
