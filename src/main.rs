use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use verbatim::clustering;
use verbatim::config::Config;
use verbatim::db::{self, Store};
use verbatim::ingest::{self, Ingested};
use verbatim::insights::analytics::TrendQuery;
use verbatim::insights::models::{InsightFilter, InsightType, Scope};
use verbatim::language::{Language, LanguageRouter};
use verbatim::output::terminal;
use verbatim::sentiment::stage::SentimentStage;
use verbatim::themes::extract::ThemeExtractor;
use verbatim::{Pipeline, PipelineParts};

/// Verbatim: multilingual analysis of training-evaluation comments.
///
/// Classifies sentiment in French, Arabic and Darija, extracts and
/// categorizes themes, clusters similar comments, and derives trends,
/// alerts, recommendations and correlations from the scores.
#[derive(Parser)]
#[command(name = "verbatim", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Download the multilingual embedding model (~470 MB)
    DownloadModel,

    /// Analyze evaluation records from a JSON array or JSON-lines file
    Analyze {
        /// Path to the records file
        file: String,

        /// Skip the progress bar
        #[arg(long)]
        quiet: bool,
    },

    /// Retry records whose sentiment could not be classified
    Reprocess,

    /// Recompute comment clusters over the whole corpus
    Recluster,

    /// List the most frequent themes
    Themes {
        /// How many themes to show
        #[arg(long, default_value = "20")]
        top: usize,

        /// Only themes in this language (FR, AR, DARIJA)
        #[arg(long)]
        language: Option<String>,
    },

    /// Show how the top themes split across categories
    Categories {
        /// How many themes to include
        #[arg(long, default_value = "50")]
        top: usize,
    },

    /// List the current comment clusters
    Clusters,

    /// List stored insights
    Insights {
        /// Maximum insights to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only this kind (trend, alert, recommendation, correlation)
        #[arg(long)]
        kind: Option<String>,

        /// Only insights at or above this confidence
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Regenerate insights, for one scope or all of them
    GenerateInsights {
        /// Only this trainer
        #[arg(long, conflicts_with_all = ["formation_type", "global"])]
        trainer: Option<String>,

        /// Only this formation type
        #[arg(long, conflicts_with = "global")]
        formation_type: Option<String>,

        /// Only corpus-wide insights
        #[arg(long)]
        global: bool,
    },

    /// Weekly score and sentiment trends, optionally filtered
    Trends {
        /// Look back this many days
        #[arg(long, default_value = "30")]
        days: u32,

        /// Only this formation type
        #[arg(long)]
        formation_type: Option<String>,

        /// Only this trainer
        #[arg(long)]
        trainer: Option<String>,
    },

    /// Compare formation types side by side (all of them when none given)
    Compare {
        /// Formation types to compare
        formation_types: Vec<String>,
    },

    /// Recompute theme frequencies from the stored results
    RebuildThemes,

    /// Show system status (DB stats, backends, corpus aggregates)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("verbatim=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing Verbatim database...");
            let conn = db::initialize(&config.db_path)?;
            let table_count = db::schema::table_count(&conn)?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nVerbatim is ready. Next step: analyze some evaluations:");
            println!("  verbatim analyze records.json");
            if !clustering::download::embedding_files_present(&config.model_dir) {
                println!(
                    "{}",
                    "Tip: run `verbatim download-model` for multilingual clustering.".dimmed()
                );
            }
        }

        Commands::DownloadModel => {
            println!("Downloading embedding model...");
            println!("  Destination: {}", config.model_dir.display());

            clustering::download::download_model(&config.model_dir).await?;

            println!("\n{}", "Model downloaded successfully.".bold());
            println!("Run `verbatim recluster` to regroup comments with it.");
        }

        Commands::Analyze { file, quiet } => {
            let ingested = read_records(Path::new(&file))?;
            let pipeline = build_pipeline(&config, !quiet)?;

            println!(
                "Analyzing {} records ({} concurrent, {} backend)...",
                ingested.records.len(),
                pipeline.settings().concurrency,
                pipeline.sentiment_backend(),
            );
            let mut outcome = pipeline.analyze_batch(&ingested.records).await;
            outcome.absorb_rejected(ingested.rejected);
            terminal::display_batch_summary(&outcome);
        }

        Commands::Reprocess => {
            let pipeline = build_pipeline(&config, true)?;
            let outcome = pipeline.reprocess_pending().await?;
            if outcome.succeeded() == 0 && outcome.failed_count() == 0 {
                println!("Nothing to reprocess.");
            } else {
                terminal::display_batch_summary(&outcome);
            }
        }

        Commands::Recluster => {
            let pipeline = build_pipeline(&config, false)?;
            println!("Reclustering with {} embeddings...", pipeline.embedder_name());
            let clusters = pipeline.recluster().await?;
            terminal::display_clusters(&clusters);
        }

        Commands::Themes { top, language } => {
            let language = language
                .as_deref()
                .map(str::parse::<Language>)
                .transpose()?;
            let pipeline = build_pipeline(&config, false)?;
            let themes = pipeline.list_themes(top, language).await?;
            terminal::display_themes(&themes);
        }

        Commands::Categories { top } => {
            let pipeline = build_pipeline(&config, false)?;
            let breakdown = pipeline.theme_categories(top).await?;
            terminal::display_categories(&breakdown);
        }

        Commands::Clusters => {
            let pipeline = build_pipeline(&config, false)?;
            let clusters = pipeline.list_clusters().await?;
            terminal::display_clusters(&clusters);
        }

        Commands::Insights {
            limit,
            kind,
            min_confidence,
        } => {
            let kind = kind
                .as_deref()
                .map(str::parse::<InsightType>)
                .transpose()?;
            let filter = InsightFilter {
                kind,
                scope: None,
                min_confidence,
            };
            let pipeline = build_pipeline(&config, false)?;
            let insights = pipeline.list_insights(limit, &filter).await?;
            terminal::display_insights(&insights);
        }

        Commands::GenerateInsights {
            trainer,
            formation_type,
            global,
        } => {
            let scope = match (trainer, formation_type) {
                (Some(t), _) => Some(Scope::Trainer(t)),
                (None, Some(f)) => Some(Scope::FormationType(f)),
                (None, None) if global => Some(Scope::Global),
                (None, None) => None,
            };
            let pipeline = build_pipeline(&config, false)?;
            let insights = pipeline.generate_insights(scope.as_ref()).await;
            terminal::display_insights(&insights);
        }

        Commands::Trends {
            days,
            formation_type,
            trainer,
        } => {
            let query = TrendQuery {
                days: Some(days),
                formation_type,
                trainer,
            };
            let pipeline = build_pipeline(&config, false)?;
            let report = pipeline.analyze_trends(&query).await?;
            terminal::display_trend_report(&report);
        }

        Commands::Compare { formation_types } => {
            let pipeline = build_pipeline(&config, false)?;
            let columns = pipeline.compare_formations(&formation_types).await?;
            terminal::display_comparison(&columns);
        }

        Commands::RebuildThemes => {
            let pipeline = build_pipeline(&config, false)?;
            let changed = pipeline.rebuild_theme_counts().await?;
            println!("Theme counts rebuilt ({changed} changed).");
        }

        Commands::Status => {
            if !Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `verbatim init` to set up the database.");
                return Ok(());
            }
            let pipeline = build_pipeline(&config, false)?;
            verbatim::status::show(&pipeline, &config.db_path).await?;
        }
    }

    Ok(())
}

/// Wire the configured store, sentiment backend and embedder into a Pipeline.
fn build_pipeline(config: &Config, show_progress: bool) -> Result<Pipeline> {
    let store: Arc<dyn Store> = db::open_store(&config.db_path)?;
    let sentiment = SentimentStage::new(
        config.sentiment_model()?,
        config.registry(),
        config.sentiment_settings(),
    );
    let embedder = clustering::load_embedder(&config.model_dir);

    Ok(Pipeline::new(PipelineParts {
        store,
        sentiment,
        embedder,
        router: LanguageRouter::default(),
        extractor: ThemeExtractor::default(),
        settings: config.pipeline_settings(show_progress),
    }))
}

/// Read records from a JSON array, or from JSON lines when the file doesn't
/// start with `[`. Bad records are returned as rejections, not errors.
fn read_records(path: &Path) -> Result<Ingested> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ingest::parse_records(&raw)
        .with_context(|| format!("Failed to parse {} as a JSON array of records", path.display()))
}
