// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! End-to-end fairness audit
//!
//! Orchestrates:
//! - Request validation and upload staging
//! - Preprocessing and baseline training
//! - Bias evaluation of the selected model
//! - Chart, PDF report and results serialization

use crate::baselines::{resolve_model_id, train_models, ForestConfig, LogisticConfig};
use crate::chart::{render_selection_chart, FontConfig};
use crate::datasets::{label_distribution, preprocess, SplitConfig};
use crate::error::{BiasError, Result};
use crate::metrics::{evaluate_bias, GroupRates, GroupStats, MetricsBundle};
use crate::report::{ReportDocument, ReportInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration for one audit invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Random seed for the train/test split
    pub seed: u64,
    /// Fraction of rows held out for evaluation
    pub test_fraction: f64,
    /// Where uploaded datasets are staged while the audit runs
    pub upload_dir: PathBuf,
    /// Where charts, reports and results are written
    pub report_dir: PathBuf,
    pub logistic: LogisticConfig,
    pub forest: ForestConfig,
    pub fonts: FontConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.3,
            upload_dir: PathBuf::from("uploads"),
            report_dir: PathBuf::from("reports"),
            logistic: LogisticConfig::default(),
            forest: ForestConfig::default(),
            fonts: FontConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file; absent keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BiasError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&text).map_err(|e| BiasError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// What the caller wants audited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRequest {
    pub dataset: PathBuf,
    pub target: String,
    pub sensitive: String,
    pub model: String,
    /// Overrides `PipelineConfig::test_fraction`
    pub test_fraction: Option<f64>,
    /// Also write the report as Markdown
    pub markdown: bool,
}

impl AuditRequest {
    /// Check the request before any side effect; returns the canonical model id
    pub fn validate(&self) -> Result<&'static str> {
        for (field, value) in [("target", &self.target), ("sensitive", &self.sensitive), ("model", &self.model)] {
            if value.trim().is_empty() {
                return Err(BiasError::validation(format!("Missing required field: {}", field)));
            }
        }

        if !self.dataset.is_file() {
            return Err(BiasError::validation(format!("Dataset file {} not found", self.dataset.display())));
        }
        let is_csv = self
            .dataset
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            return Err(BiasError::validation("Only CSV files are supported"));
        }

        resolve_model_id(&self.model)
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` and strip leading dots
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A dataset copied into the upload area; the copy is removed on drop
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    pub fn stage(source: &Path, upload_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(upload_dir)?;
        let name = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = upload_dir.join(format!("{}_{}", &id[..8], sanitize_filename(name)));

        std::fs::copy(source, &path)?;
        tracing::debug!("Staged {} as {}", source.display(), path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove staged upload {}: {}", self.path.display(), e),
        }
    }
}

/// SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub file_name: String,
    pub sha256: String,
    pub rows_used: usize,
    pub rows_dropped: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Target label -> count, over the test partition
    pub test_label_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub chart: Option<PathBuf>,
    pub report: PathBuf,
    pub results: PathBuf,
    pub markdown: Option<PathBuf>,
}

/// Fairness numbers for one audited model, before anything is rendered
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub model: String,
    pub dataset: DatasetSummary,
    pub metrics: MetricsBundle,
    pub group_rates: GroupRates,
    pub group_labels: BTreeMap<usize, String>,
    pub group_stats: Vec<GroupStats>,
    pub predictions: Vec<u8>,
    /// Sensitive code per test row
    pub groups: Vec<usize>,
    pub sensitive_values: Vec<String>,
}

/// Complete audit results; written as `results_<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub id: String,
    pub model: String,
    pub target: String,
    pub sensitive: String,
    pub dataset: DatasetSummary,
    pub metrics: MetricsBundle,
    pub group_rates: GroupRates,
    pub group_labels: BTreeMap<usize, String>,
    pub group_stats: Vec<GroupStats>,
    pub predictions: Vec<u8>,
    pub artifacts: Artifacts,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl AuditOutcome {
    pub fn report_input(&self) -> ReportInput<'_> {
        ReportInput {
            metrics: &self.metrics,
            group_rates: &self.group_rates,
            sensitive_col: &self.sensitive,
            model_name: &self.model,
            chart_path: self.artifacts.chart.as_deref(),
            label_map: Some(&self.group_labels),
            sensitive_values: None,
        }
    }

    /// Markdown report with a provenance footer
    pub fn markdown(&self) -> String {
        let mut md = ReportDocument::build(&self.report_input()).to_markdown();
        md.push_str("---\n\n");
        md.push_str(&format!(
            "*Generated {} by biasguard {} (run {}). Dataset {} sha256 {}.*\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.version,
            self.id,
            self.dataset.file_name,
            self.dataset.sha256
        ));
        md
    }
}

/// Write JSON to `path` through a temporary sibling
pub fn save_results(outcome: &AuditOutcome, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(outcome)?;
    write_atomic(path, json.as_bytes())?;
    tracing::info!("Results saved to {}", path.display());
    Ok(())
}

pub fn load_results(path: &Path) -> Result<AuditOutcome> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BiasError::validation(format!("Cannot read results {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&text)?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_file_name(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        BiasError::Io(e)
    })
}

/// Runs fairness audits against one configuration
pub struct BiasAudit {
    config: PipelineConfig,
}

impl BiasAudit {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Preprocess, train and evaluate; touches nothing on disk
    pub fn analyze(&self, dataset: &Path, request: &AuditRequest, model_id: &str) -> Result<Analysis> {
        let split = SplitConfig {
            test_fraction: request.test_fraction.unwrap_or(self.config.test_fraction),
            seed: self.config.seed,
        };
        let data = preprocess(dataset, &request.target, &request.sensitive, split)?;

        let models = train_models(&data.x_train, &data.y_train, &self.config.logistic, &self.config.forest);
        let model = models
            .get(model_id)
            .ok_or_else(|| BiasError::validation(format!("Model '{}' not available", model_id)))?;

        tracing::info!("Evaluating {} on {} test rows", model_id, data.x_test.len());
        let evaluation = evaluate_bias(model.as_ref(), &data.x_test, &data.y_test, &data.a_test)?;

        let test_label_distribution = label_distribution(&data.y_test)
            .into_iter()
            .map(|(code, count)| {
                let label = data.target_encoder.inverse(code as usize).unwrap_or_default().to_string();
                (label, count)
            })
            .collect();

        Ok(Analysis {
            model: model_id.to_string(),
            dataset: DatasetSummary {
                file_name: request
                    .dataset
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                sha256: sha256_file(dataset)?,
                rows_used: data.train_rows.len() + data.test_rows.len(),
                rows_dropped: data.dropped_rows,
                train_rows: data.train_rows.len(),
                test_rows: data.test_rows.len(),
                test_label_distribution,
            },
            metrics: evaluation.metrics,
            group_rates: evaluation.group_rates,
            group_labels: data.group_labels(),
            group_stats: evaluation.group_stats,
            predictions: evaluation.predictions,
            sensitive_values: data.sensitive_test_values(),
            groups: data.a_test,
        })
    }

    /// Run the full audit: validate, stage, analyze, render, save
    pub fn run(&self, request: &AuditRequest) -> Result<AuditOutcome> {
        let model_id = request.validate()?;
        let staged = StagedUpload::stage(&request.dataset, &self.config.upload_dir)?;

        let analysis = self.analyze(staged.path(), request, model_id)?;
        let outcome = self.render(request, analysis)?;

        drop(staged);
        Ok(outcome)
    }

    fn render(&self, request: &AuditRequest, analysis: Analysis) -> Result<AuditOutcome> {
        let dir = &self.config.report_dir;
        std::fs::create_dir_all(dir)?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let chart_path = dir.join(format!("chart_{}.png", id));
        let report_path = dir.join(format!("report_{}.pdf", id));
        let results_path = dir.join(format!("results_{}.json", id));

        render_selection_chart(
            &analysis.predictions,
            &analysis.groups,
            Some(&analysis.group_labels),
            &chart_path,
            &self.config.fonts,
        )?;

        let input = ReportInput {
            metrics: &analysis.metrics,
            group_rates: &analysis.group_rates,
            sensitive_col: &request.sensitive,
            model_name: &analysis.model,
            chart_path: Some(chart_path.as_path()),
            label_map: Some(&analysis.group_labels),
            sensitive_values: Some(analysis.sensitive_values.as_slice()),
        };
        if let Err(e) = ReportDocument::build(&input).render_pdf(&report_path, &self.config.fonts) {
            let _ = std::fs::remove_file(&chart_path);
            return Err(e);
        }

        let mut outcome = AuditOutcome {
            id: id.clone(),
            model: analysis.model,
            target: request.target.clone(),
            sensitive: request.sensitive.clone(),
            dataset: analysis.dataset,
            metrics: analysis.metrics,
            group_rates: analysis.group_rates,
            group_labels: analysis.group_labels,
            group_stats: analysis.group_stats,
            predictions: analysis.predictions,
            artifacts: Artifacts {
                chart: Some(chart_path),
                report: report_path,
                results: results_path,
                markdown: None,
            },
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let markdown_path = request.markdown.then(|| dir.join(format!("report_{}.md", id)));
        persist(&mut outcome, markdown_path)?;
        Ok(outcome)
    }
}

/// Write the optional Markdown report and the results document.
/// On failure every artifact of the run is removed.
fn persist(outcome: &mut AuditOutcome, markdown_path: Option<PathBuf>) -> Result<()> {
    let written = write_records(outcome, markdown_path);
    if written.is_err() {
        discard_artifacts(&outcome.artifacts);
    }
    written
}

fn write_records(outcome: &mut AuditOutcome, markdown_path: Option<PathBuf>) -> Result<()> {
    if let Some(md_path) = markdown_path {
        write_atomic(&md_path, outcome.markdown().as_bytes())?;
        tracing::info!("Markdown report saved to {}", md_path.display());
        outcome.artifacts.markdown = Some(md_path);
    }
    save_results(outcome, &outcome.artifacts.results)
}

fn discard_artifacts(artifacts: &Artifacts) {
    let paths = artifacts
        .chart
        .iter()
        .chain(std::iter::once(&artifacts.report))
        .chain(artifacts.markdown.iter())
        .chain(std::iter::once(&artifacts.results));
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

/// Rebuild the PDF from a saved results document
pub fn render_from_results(outcome: &AuditOutcome, output_path: &Path, fonts: &FontConfig) -> Result<PathBuf> {
    ReportDocument::build(&outcome.report_input()).render_pdf(output_path, fonts)
}
