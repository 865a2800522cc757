// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! BiasGuard fairness audit pipeline
//!
//! This crate provides:
//! - CSV preprocessing with retained label mappings and a seeded train/test split
//! - Baseline classifiers (logistic regression, random forest)
//! - Group fairness metrics (demographic parity, equal opportunity, disparate impact)
//! - Selection-rate chart and PDF/Markdown report with narrative interpretation
//! - An end-to-end audit with staged uploads and a JSON results document

pub mod baselines;
pub mod chart;
pub mod datasets;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod report;

pub use baselines::{Classifier, ForestConfig, LogisticConfig, LogisticRegression, ModelSet, RandomForest};
pub use chart::{render_selection_chart, FontConfig, ResolvedFonts, SelectionChart};
pub use datasets::{preprocess, LabelEncoder, PreparedData, RawTable, SplitConfig};
pub use error::{BiasError, Result};
pub use metrics::{evaluate_bias, evaluate_models, BiasEvaluation, ConfusionMatrix, GroupKey, GroupRates, MetricsBundle};
pub use pipeline::{AuditOutcome, AuditRequest, BiasAudit, PipelineConfig, StagedUpload};
pub use report::{render_report, LabelResolver, ReportDocument, ReportInput};
