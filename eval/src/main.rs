// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! BiasGuard command-line interface
//!
//! Usage:
//!   biasguard audit --dataset adult.csv --target income --sensitive sex --model RandomForest
//!   biasguard render --results reports/results_<id>.json --output report.pdf

use anyhow::{bail, Context, Result};
use biasguard_eval::pipeline::{load_results, render_from_results, AuditOutcome, AuditRequest, BiasAudit, PipelineConfig};
use biasguard_eval::BiasError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "biasguard")]
#[command(about = "Audit a classifier for bias against a sensitive attribute")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra directory to search for the report font (repeatable)
    #[arg(long, global = true)]
    font_dir: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the baselines on a CSV and write chart, PDF report and results
    Audit(AuditArgs),
    /// Rebuild the PDF report from a saved results document
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct AuditArgs {
    /// CSV file with a header row
    #[arg(short, long)]
    dataset: PathBuf,

    /// Binary target column
    #[arg(short, long)]
    target: String,

    /// Sensitive attribute column
    #[arg(short, long)]
    sensitive: String,

    /// Model to evaluate (LogisticRegression, RandomForest)
    #[arg(short, long, default_value = "RandomForest")]
    model: String,

    /// Fraction of rows held out for evaluation
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Random seed for the split
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory for charts, reports and results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Staging directory for the uploaded dataset
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Also write the report as Markdown
    #[arg(long)]
    markdown: bool,

    /// Print the results document as JSON instead of the summary table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// results_<id>.json written by a previous audit
    #[arg(short, long)]
    results: PathBuf,

    /// Where to write the PDF (defaults to the original report path)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    // Command-line font directories are searched first
    if !cli.font_dir.is_empty() {
        let mut dirs = cli.font_dir.clone();
        dirs.append(&mut config.fonts.dirs);
        config.fonts.dirs = dirs;
    }
    Ok(config)
}

/// Surface caller errors verbatim; anything else is logged and reported generically
fn user_error(err: BiasError) -> anyhow::Error {
    if err.is_user_facing() {
        anyhow::anyhow!("{}", err)
    } else {
        tracing::error!("{}", err);
        anyhow::anyhow!("The audit could not be completed. See the log output for details.")
    }
}

fn print_summary(outcome: &AuditOutcome) {
    println!("\n{}", "=".repeat(70));
    println!("FAIRNESS AUDIT SUMMARY");
    println!("{}", "=".repeat(70));
    println!("\nModel: {}", outcome.model);
    println!("Target: {}   Sensitive attribute: {}", outcome.target, outcome.sensitive);
    println!(
        "Rows: {} used ({} dropped), train={}, test={}",
        outcome.dataset.rows_used, outcome.dataset.rows_dropped, outcome.dataset.train_rows, outcome.dataset.test_rows
    );

    println!("\nFairness Metrics:");
    println!("{:-<70}", "");
    for (name, value) in outcome.metrics.iter() {
        println!("{:<30} {:>10.2}", name, value);
    }
    println!("{:-<70}", "");

    println!("\n{:<20} {:>8} {:>12} {:>10} {:>10}", "Group", "Count", "Selection", "TPR", "FPR");
    println!("{:-<70}", "");
    for stats in &outcome.group_stats {
        let label = outcome.group_labels.get(&stats.group).cloned().unwrap_or_else(|| stats.group.to_string());
        let rate = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:.2}", v));
        println!(
            "{:<20} {:>8} {:>12.2} {:>10} {:>10}",
            label,
            stats.count,
            stats.selection_rate,
            rate(stats.true_positive_rate),
            rate(stats.false_positive_rate)
        );
    }
    println!("{:-<70}", "");

    if let Some(chart) = &outcome.artifacts.chart {
        println!("\nChart saved to: {}", chart.display());
    }
    println!("Report saved to: {}", outcome.artifacts.report.display());
    if let Some(md) = &outcome.artifacts.markdown {
        println!("Markdown report saved to: {}", md.display());
    }
    println!("Results saved to: {}", outcome.artifacts.results.display());
}

fn audit(mut config: PipelineConfig, args: AuditArgs) -> Result<()> {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(dir) = args.output {
        config.report_dir = dir;
    }
    if let Some(dir) = args.upload_dir {
        config.upload_dir = dir;
    }

    tracing::info!("BiasGuard Fairness Audit");
    tracing::info!("========================");
    tracing::info!("Dataset: {}", args.dataset.display());
    tracing::info!("Target: {}, sensitive: {}, model: {}", args.target, args.sensitive, args.model);

    let request = AuditRequest {
        dataset: args.dataset,
        target: args.target,
        sensitive: args.sensitive,
        model: args.model,
        test_fraction: args.test_fraction,
        markdown: args.markdown,
    };

    let outcome = BiasAudit::new(config).run(&request).map_err(user_error)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
        println!("\nAudit complete!");
    }
    Ok(())
}

fn render(config: PipelineConfig, args: RenderArgs) -> Result<()> {
    let outcome = load_results(&args.results).map_err(user_error)?;
    let output = args.output.unwrap_or_else(|| outcome.artifacts.report.clone());
    if output.extension().and_then(|e| e.to_str()) != Some("pdf") {
        bail!("Output path {} must end in .pdf", output.display());
    }

    let path = render_from_results(&outcome, &output, &config.fonts).map_err(user_error)?;
    println!("Report saved to: {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Audit(args) => audit(config, args),
        Command::Render(args) => render(config, args),
    }
}
