// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone baseline model runner
//!
//! Trains both baseline models on a CSV (or a synthetic census table) and
//! prints accuracy and fairness metrics side by side

use anyhow::{Context, Result};
use biasguard_eval::baselines::{all_models, resolve_model_id, ForestConfig, LogisticConfig, ModelSet};
use biasguard_eval::datasets::{label_distribution, prepare, RawTable, SplitConfig};
use biasguard_eval::metrics::{evaluate_models, ConfusionMatrix};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "run-baseline")]
#[command(about = "Compare baseline models on accuracy and group fairness")]
#[command(version)]
struct Args {
    /// Baseline model to run (LogisticRegression, RandomForest); all when omitted
    #[arg(short, long)]
    model: Option<String>,

    /// CSV dataset; a synthetic census table is generated when omitted
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Binary target column
    #[arg(short, long, default_value = "income")]
    target: String,

    /// Sensitive attribute column
    #[arg(short, long, default_value = "sex")]
    sensitive: String,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value_t = 0.3)]
    test_fraction: f64,

    /// Number of rows for the synthetic dataset
    #[arg(short, long, default_value_t = 1000)]
    num_samples: usize,

    /// Score shift in favour of one group in the synthetic dataset
    #[arg(long, default_value_t = 0.5)]
    bias: f64,

    /// Number of trees in the random forest
    #[arg(long, default_value_t = 100)]
    n_trees: usize,

    /// Write the synthetic dataset to this CSV path
    #[arg(long)]
    save_synthetic: Option<PathBuf>,

    /// List available baselines
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let logistic = LogisticConfig::default();
    let forest = ForestConfig {
        n_trees: args.n_trees,
        seed: args.seed,
        ..ForestConfig::default()
    };

    // List available baselines
    if args.list {
        println!("Available baseline models:");
        println!("--------------------------");
        for model in all_models(&logistic, &forest) {
            println!("  {}: {}", model.name(), model.description());
        }
        return Ok(());
    }

    let filter = args.model.as_deref().map(resolve_model_id).transpose()?;

    // Load dataset
    let table = match &args.dataset {
        Some(path) => RawTable::from_csv_path(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::info!("Generating synthetic dataset ({} rows, seed={}, bias={})", args.num_samples, args.seed, args.bias);
            let table = RawTable::synthetic(args.num_samples, args.seed, args.bias);
            if let Some(path) = &args.save_synthetic {
                table.to_csv_path(path)?;
                println!("Synthetic dataset saved to: {}", path.display());
            }
            table
        }
    };

    let split = SplitConfig {
        test_fraction: args.test_fraction,
        seed: args.seed,
    };
    let data = prepare(table, &args.target, &args.sensitive, split)?;

    println!("\nDataset: {}", args.dataset.as_ref().map_or("synthetic".to_string(), |p| p.display().to_string()));
    println!("  Rows dropped (missing values): {}", data.dropped_rows);
    println!("  Train rows: {}", data.x_train.len());
    println!("  Test rows: {}", data.x_test.len());

    println!("\nTest target distribution:");
    for (code, count) in label_distribution(&data.y_test) {
        let label = data.target_encoder.inverse(code as usize).unwrap_or_default();
        println!("  {}: {} ({:.1}%)", label, count, count as f64 / data.y_test.len() as f64 * 100.0);
    }

    let groups = data.group_labels();
    println!("\nTest {} distribution:", args.sensitive);
    for (code, count) in label_distribution(&data.a_test) {
        let label = groups.get(&code).map(String::as_str).unwrap_or_default();
        println!("  {}: {} ({:.1}%)", label, count, count as f64 / data.a_test.len() as f64 * 100.0);
    }

    // Train
    let candidates: Vec<_> = all_models(&logistic, &forest)
        .into_iter()
        .filter(|m| filter.map_or(true, |f| m.name() == f))
        .collect();

    let pb = ProgressBar::new(candidates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Training: [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let mut models = ModelSet::new();
    for mut model in candidates {
        pb.set_message(model.name().to_string());
        model.fit(&data.x_train, &data.y_train);
        models.insert(model.name().to_string(), model);
        pb.inc(1);
    }
    pb.finish_with_message("done");

    // Evaluate on test set
    let evaluations = evaluate_models(&models, &data.x_test, &data.y_test, &data.a_test)?;

    println!("\n{}", "=".repeat(70));
    println!("BASELINE EVALUATION");
    println!("{}", "=".repeat(70));

    for (name, evaluation) in &evaluations {
        let model = &models[name];
        println!("\n## {} ##", name);
        println!("{}", model.description());
        println!("{}", "-".repeat(50));

        let cm = ConfusionMatrix::from_predictions(&evaluation.predictions, &data.y_test);
        println!(
            "Precision: {:.4}  Recall: {:.4}  F1: {:.4}",
            cm.precision(),
            cm.true_positive_rate().unwrap_or(0.0),
            cm.f1_score()
        );
        println!("TP: {}  FP: {}  TN: {}  FN: {}\n", cm.tp, cm.fp, cm.tn, cm.fn_);
        println!("{}", evaluation.format(&groups));
    }

    println!("{}", "=".repeat(70));
    println!("Evaluation complete!");

    Ok(())
}
