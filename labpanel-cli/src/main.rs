use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use labpanel_core::{AnalysisReport, Catalog, CatalogSources, Engine, EngineConfig, PanelInput};
use labpanel_fhir::panel_from_bundle_str;

#[derive(Parser, Debug)]
#[command(
    name = "labpanel-cli",
    about = "Evaluate a blood panel against the clinical rule catalog."
)]
struct Args {
    /// Path to the panel JSON (or a FHIR bundle with --fhir).
    #[arg(short, long)]
    input: PathBuf,

    /// Treat the input as a FHIR R4 Bundle.
    #[arg(long)]
    fhir: bool,

    /// Reference date for patient age when reading a bundle. Defaults to today.
    #[arg(long, requires = "fhir")]
    as_of: Option<NaiveDate>,

    /// Engine configuration JSON. Missing fields keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with replacement catalog files (reference_ranges.json,
    /// staging.json, risk_models.json, condition_groups.json).
    #[arg(long)]
    catalog_dir: Option<PathBuf>,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match &args.config {
        Some(path) => {
            let raw = read_file(path)?;
            serde_json::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("Invalid engine config in {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let catalog = match &args.catalog_dir {
        Some(dir) => load_catalog(dir)?,
        None => Catalog::embedded().context("Embedded catalog is invalid")?,
    };
    let engine = Engine::new(Arc::new(catalog), config);

    let data = read_file(&args.input)?;
    let input = if args.fhir {
        let as_of = args
            .as_of
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        panel_from_bundle_str(&data, as_of)
            .with_context(|| format!("Cannot convert bundle {}", args.input.display()))?
    } else {
        serde_json::from_str::<PanelInput>(&data)
            .with_context(|| format!("Invalid panel input in {}", args.input.display()))?
    };

    let report = engine.evaluate_input(&input);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, engine.config().insight_display_limit);
    }

    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Cannot read file {}", path.display()))
}

/// Files missing from the directory fall back to the embedded documents.
fn load_catalog(dir: &Path) -> anyhow::Result<Catalog> {
    let mut sources = CatalogSources::default();
    for (name, slot) in [
        ("reference_ranges.json", &mut sources.reference_ranges),
        ("staging.json", &mut sources.staging),
        ("risk_models.json", &mut sources.risk_models),
        ("condition_groups.json", &mut sources.condition_groups),
    ] {
        let path = dir.join(name);
        if path.is_file() {
            log::info!("Using catalog file {}", path.display());
            *slot = read_file(&path)?;
        }
    }
    Catalog::from_sources(&sources)
        .with_context(|| format!("Catalog in {} failed validation", dir.display()))
}

fn print_summary(report: &AnalysisReport, insight_limit: usize) {
    println!(
        "Health score: {}\nConfidence: {:.0}%\nAbnormal parameters: {} of {} ({} normal)",
        report.overall_health_score,
        report.overall_confidence * 100.0,
        report.abnormal_parameters().count(),
        report.evaluated_parameters.len(),
        report.normal_parameters().count()
    );

    if let Some(parameter) = report.most_concerning_parameter() {
        let range = parameter
            .range
            .as_ref()
            .map(|range| format!(", range {}", range.display()))
            .unwrap_or_default();
        println!(
            "Most concerning: {} = {} ({:?}, {:.1}% off range{range})",
            parameter.key, parameter.value, parameter.status, parameter.deviation_percent
        );
    }

    if let Some(egfr) = report.derived.egfr_display() {
        println!("eGFR: {egfr}");
    }

    if report.conditions.is_empty() {
        println!("Conditions: none detected");
    } else {
        println!("Conditions:");
        for condition in &report.conditions {
            println!(
                "  - {} | {} | confidence {:.0}%",
                condition.display_name,
                condition.stage_name,
                condition.confidence * 100.0
            );
        }
    }

    let insights = report.top_insights(insight_limit);
    if !insights.is_empty() {
        println!("Insights:");
        for insight in insights {
            println!("  - [{}] {}: {}", insight.impact_level, insight.title, insight.description);
        }
    }
}
