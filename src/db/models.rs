// Data models — the types that flow through the pipeline and into storage.
//
// These are separate from the store implementations so the analysis stages
// can use them without depending on rusqlite directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::language::Language;
use crate::themes::taxonomy::Category;

/// Sentiment scores at or beyond this magnitude get a polar label.
pub const SENTIMENT_THRESHOLD: f64 = 0.3;

/// Reserved cluster id for records no cluster claimed.
pub const NOISE_CLUSTER_ID: i64 = -1;

/// One training evaluation as delivered by the ingestion side.
/// Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub formation_id: String,
    #[serde(rename = "type_formation")]
    pub formation_type: String,
    #[serde(rename = "formateur_id")]
    pub trainer_id: String,
    pub satisfaction: u8,
    #[serde(rename = "contenu")]
    pub content: u8,
    #[serde(rename = "logistique")]
    pub logistics: u8,
    #[serde(rename = "applicabilite")]
    pub applicability: u8,
    #[serde(rename = "commentaire", default)]
    pub comment: String,
    /// Declared language tag; unknown tags are ignored by the router.
    #[serde(rename = "langue", default)]
    pub language: Option<String>,
    pub date: NaiveDate,
}

impl EvaluationRecord {
    /// Check the fields the pipeline relies on. Reports the first offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::validation(&self.id, "id", "must not be empty"));
        }
        for (field, value) in self.scores() {
            if !(1..=5).contains(&value) {
                return Err(PipelineError::validation(
                    &self.id,
                    field,
                    format!("must be between 1 and 5, got {value}"),
                ));
            }
        }
        Ok(())
    }

    /// The four rated criteria, in a fixed order.
    pub fn scores(&self) -> [(&'static str, u8); 4] {
        [
            ("satisfaction", self.satisfaction),
            ("contenu", self.content),
            ("logistique", self.logistics),
            ("applicabilite", self.applicability),
        ]
    }
}

/// Three-way sentiment label derived from a continuous score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Threshold a score in [-1, 1] at ±0.3.
    pub fn from_score(score: f64) -> Self {
        if score >= SENTIMENT_THRESHOLD {
            SentimentLabel::Positive
        } else if score <= -SENTIMENT_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A theme extracted from one comment, with its category precomputed so no
/// consumer needs its own copy of the keyword table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeTag {
    pub name: String,
    pub category: Category,
}

/// The analysis of one evaluation record. Exactly one current result per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub record_id: String,
    pub language: Language,
    pub sentiment: SentimentLabel,
    /// Continuous sentiment in [-1, 1]
    pub score: f64,
    /// Model confidence in [0, 1]; 0 when the result was degraded
    pub confidence: f64,
    pub themes: Vec<ThemeTag>,
    /// `None` until the first clustering pass, `Some(NOISE_CLUSTER_ID)` for noise
    pub cluster_id: Option<i64>,
    /// Cache fingerprint of (normalized text, language, model version)
    pub fingerprint: String,
    pub model_version: String,
    /// Set when the classifier could not be reached and the sentiment was
    /// degraded to neutral. Such records are picked up again later.
    pub needs_reprocessing: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn theme_names(&self) -> impl Iterator<Item = &str> {
        self.themes.iter().map(|t| t.name.as_str())
    }
}

/// Corpus-wide frequency of a theme in one language. Only ever incremented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub language: Language,
    pub frequency: u64,
    pub category: Category,
}

/// A group of semantically similar comments from the latest clustering pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// 0..k in discovery order, or NOISE_CLUSTER_ID
    pub id: i64,
    pub label: String,
    pub members: Vec<String>,
    /// Top themes by in-cluster frequency
    pub representative_themes: Vec<String>,
    /// Mean AnalysisResult.score of the members
    pub avg_sentiment: f64,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_noise(&self) -> bool {
        self.id == NOISE_CLUSTER_ID
    }
}
