// Insight generation — trends, alerts, recommendations, correlations.
//
// models holds the typed Insight variants and thresholds, stats the numeric
// helpers, generator the rules themselves. analytics answers ad-hoc trend
// and comparison queries without storing anything.

pub mod analytics;
pub mod generator;
pub mod models;
pub mod stats;
