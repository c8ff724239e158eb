// Colored terminal output for themes, clusters, insights and batch runs.
//
// main.rs fetches the data through the Pipeline and hands it here; nothing
// in this module touches the store.

use colored::Colorize;

use crate::db::models::{Cluster, SentimentLabel, Theme};
use crate::insights::analytics::{FormationComparison, TrendReport};
use crate::insights::models::{Insight, InsightKind, InsightType, TrendDirection};
use crate::pipeline::{BatchOutcome, CategoryBreakdown, CorpusStats};

/// Display the most frequent themes with their categories.
pub fn display_themes(themes: &[Theme]) {
    if themes.is_empty() {
        println!("No themes yet. Run `verbatim analyze <records.json>` first.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Top Themes ({}) ===", themes.len()).bold()
    );
    println!();
    println!(
        "  {:>4}  {:<32} {:<7} {:>6}  {}",
        "Rank".dimmed(),
        "Theme".dimmed(),
        "Lang".dimmed(),
        "Freq".dimmed(),
        "Category".dimmed(),
    );
    println!("  {}", "-".repeat(72).dimmed());

    for (i, theme) in themes.iter().enumerate() {
        println!(
            "  {:>4}. {:<32} {:<7} {:>6}  {}",
            i + 1,
            super::truncate_chars(&theme.name, 30),
            theme.language.as_str(),
            theme.frequency,
            theme.category.display_name(),
        );
    }
    println!();
}

/// Display the per-category breakdown as a small bar chart.
pub fn display_categories(breakdown: &[CategoryBreakdown]) {
    println!("\n{}", "=== Theme Categories ===".bold());
    println!();

    for row in breakdown {
        let bar_len = (row.percentage / 100.0 * 30.0).round() as usize;
        println!(
            "  {:<28} {:>5.1}%  {:<30} {} themes, {} mentions",
            row.category.display_name(),
            row.percentage,
            "#".repeat(bar_len).cyan(),
            row.themes,
            row.frequency,
        );
    }
    println!();
}

/// Display clusters, noise last.
pub fn display_clusters(clusters: &[Cluster]) {
    if clusters.is_empty() {
        println!("No clusters yet. Run `verbatim recluster` first.");
        return;
    }

    let grouped = clusters.iter().filter(|c| !c.is_noise()).count();
    println!(
        "\n{}",
        format!("=== Comment Clusters ({grouped}) ===").bold()
    );
    println!();

    for cluster in clusters {
        let name = if cluster.is_noise() {
            cluster.label.dimmed().to_string()
        } else {
            cluster.label.bold().to_string()
        };
        println!(
            "  [{:>3}] {}  ({} comments, sentiment {})",
            cluster.id,
            name,
            cluster.size(),
            colorize_score(cluster.avg_sentiment),
        );
        if !cluster.representative_themes.is_empty() {
            println!(
                "        {}",
                cluster.representative_themes.join(", ").dimmed()
            );
        }
    }
    println!();
}

/// Display insights, most confident first.
pub fn display_insights(insights: &[Insight]) {
    if insights.is_empty() {
        println!("No insights. Run `verbatim generate-insights` once records are analyzed.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Insights ({}) ===", insights.len()).bold()
    );
    println!();

    for insight in insights {
        println!(
            "  {} {}  {}",
            colorize_type(insight.insight_type()),
            insight.title.bold(),
            format!("[{} · {:.0}%]", insight.scope, insight.confidence * 100.0).dimmed(),
        );
        println!("      {}", insight.description);
        if let InsightKind::Trend(data) = &insight.kind {
            let path: Vec<String> = data
                .windows
                .iter()
                .map(|w| format!("{} {:.2}", w.window, w.mean))
                .collect();
            println!("      {}", path.join(" → ").dimmed());
        }
    }
    println!();
}

/// One-screen summary after `verbatim analyze`.
pub fn display_batch_summary(outcome: &BatchOutcome) {
    println!("\n{}", "Batch complete.".bold());
    println!("  Analyzed: {}", outcome.succeeded().to_string().green());
    if outcome.failed_count() > 0 {
        println!("  Failed:   {}", outcome.failed_count().to_string().red());
        for failed in &outcome.failed {
            println!("    {} {}", failed.id, failed.reason.dimmed());
        }
    }
    if !outcome.reprocess.is_empty() {
        println!(
            "  {} {} records got a placeholder sentiment; run `verbatim reprocess` later",
            "!".yellow(),
            outcome.reprocess.len()
        );
    }
    if outcome.themes_stale {
        println!(
            "  {} theme counts were not saved; run `verbatim rebuild-themes`",
            "!".yellow()
        );
    }

    let positive = count_label(outcome, SentimentLabel::Positive);
    let neutral = count_label(outcome, SentimentLabel::Neutral);
    let negative = count_label(outcome, SentimentLabel::Negative);
    println!(
        "  Sentiment: {} positive, {} neutral, {} negative",
        positive.to_string().green(),
        neutral,
        negative.to_string().red(),
    );

    if let Some(clusters) = outcome.clusters {
        println!("  Reclustered: {clusters} clusters");
    }
    if let Some(insights) = outcome.insights {
        println!("  Insights regenerated: {insights}");
    }
}

/// Dashboard-style aggregates for the status command.
pub fn display_stats(stats: &CorpusStats) {
    println!(
        "Records: {} ({} analyzed, {} awaiting reprocessing)",
        stats.total_records, stats.analyzed, stats.needs_reprocessing
    );
    if !stats.metric_means.is_empty() {
        let means: Vec<String> = stats
            .metric_means
            .iter()
            .map(|(metric, mean)| format!("{metric} {mean:.2}"))
            .collect();
        println!("Mean scores: {}", means.join(", "));
    }
    if !stats.sentiments.is_empty() {
        println!("Sentiment: {}", join_counts(&stats.sentiments));
    }
    if !stats.languages.is_empty() {
        println!("Languages: {}", join_counts(&stats.languages));
    }
    if !stats.formation_types.is_empty() {
        println!("Formation types: {}", join_counts(&stats.formation_types));
    }
}

/// Weekly trend table for the `trends` command.
pub fn display_trend_report(report: &TrendReport) {
    if report.evaluations == 0 {
        println!("No evaluations match these filters.");
        return;
    }

    let period = report
        .since
        .map_or_else(|| "all time".to_string(), |d| format!("since {d}"));
    println!(
        "\n{}",
        format!("=== Trends ({} evaluations, {period}) ===", report.evaluations).bold()
    );
    println!();

    for trend in &report.metrics {
        let direction = match (trend.direction, trend.slope) {
            (Some(TrendDirection::Rising), _) => "rising".green(),
            (Some(TrendDirection::Falling), _) => "falling".red(),
            (None, Some(_)) => "stable".normal(),
            (None, None) => "not enough weeks".dimmed(),
        };
        let slope = trend
            .slope
            .map_or_else(String::new, |s| format!("{s:+.2}/week"));
        println!("  {:<14} {:<18} {}", trend.metric.as_str(), direction, slope.dimmed());
    }

    if !report.sentiment.is_empty() {
        let path: Vec<String> = report
            .sentiment
            .iter()
            .map(|w| format!("{} {}", w.window, colorize_score(w.mean)))
            .collect();
        println!("  {:<14} {}", "sentiment", path.join(" → "));
    }
    println!();
}

/// Formation types side by side for the `compare` command.
pub fn display_comparison(columns: &[FormationComparison]) {
    if columns.is_empty() {
        println!("No formation types to compare.");
        return;
    }

    println!("\n{}", "=== Formation Comparison ===".bold());
    println!();

    for column in columns {
        println!(
            "  {}  ({} evaluations)",
            column.formation_type.bold(),
            column.evaluations
        );
        if column.evaluations == 0 {
            println!("      {}", "no data".dimmed());
            continue;
        }

        let means: Vec<String> = column
            .metric_means
            .iter()
            .map(|(metric, mean)| format!("{metric} {mean:.2}"))
            .collect();
        println!("      {}", means.join(", "));

        if let (Some(sentiment), Some(negative)) = (column.mean_sentiment, column.negative_share) {
            println!(
                "      sentiment {}, {:.0}% negative",
                colorize_score(sentiment),
                negative * 100.0
            );
        }
        if !column.top_themes.is_empty() {
            let themes: Vec<String> = column
                .top_themes
                .iter()
                .map(|(name, count)| format!("{name} ({count})"))
                .collect();
            println!("      {}", themes.join(", ").dimmed());
        }
        if !column.categories.is_empty() {
            let mix: Vec<String> = column
                .categories
                .iter()
                .map(|(category, count)| format!("{} {count}", category.display_name()))
                .collect();
            println!("      {}", mix.join(", ").dimmed());
        }
    }
    println!();
}

fn count_label(outcome: &BatchOutcome, label: SentimentLabel) -> usize {
    outcome
        .results
        .iter()
        .filter(|r| r.sentiment == label)
        .count()
}

fn join_counts(counts: &std::collections::BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(k, v)| format!("{k} {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Colorize a sentiment score by the label it maps to.
fn colorize_score(score: f64) -> colored::ColoredString {
    let text = format!("{score:+.2}");
    match SentimentLabel::from_score(score) {
        SentimentLabel::Positive => text.green(),
        SentimentLabel::Negative => text.red(),
        SentimentLabel::Neutral => text.normal(),
    }
}

fn colorize_type(kind: InsightType) -> colored::ColoredString {
    let tag = format!("{:<14}", kind.as_str().to_uppercase());
    match kind {
        InsightType::Alert => tag.red().bold(),
        InsightType::Recommendation => tag.green(),
        InsightType::Trend => tag.cyan(),
        InsightType::Correlation => tag.magenta(),
    }
}
