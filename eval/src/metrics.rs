// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for group fairness
//!
//! Implements:
//! - Confusion matrix (overall and per sensitive group)
//! - Accuracy
//! - Demographic Parity Difference (max - min selection rate)
//! - Equal Opportunity Difference (max - min true positive rate)
//! - Disparate Impact (min / max selection rate)

use crate::baselines::{Classifier, ModelSet};
use crate::error::{BiasError, Result};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const ACCURACY: &str = "Accuracy";
pub const DEMOGRAPHIC_PARITY_DIFF: &str = "Demographic Parity Diff";
pub const EQUAL_OPPORTUNITY_DIFF: &str = "Equal Opportunity Diff";
pub const DISPARATE_IMPACT: &str = "Disparate Impact";

/// Fixed metric vocabulary, in reporting order
pub const METRIC_NAMES: &[&str] = &[ACCURACY, DEMOGRAPHIC_PARITY_DIFF, EQUAL_OPPORTUNITY_DIFF, DISPARATE_IMPACT];

/// Round to two decimals.
///
/// Ties round half away from zero (`f64::round`), so 0.125 becomes 0.13.
/// Banker's rounding would give 0.12 instead.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Confusion matrix for binary predictions (1 = positive class)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[u8], ground_truth: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (&pred, &truth) in predictions.iter().zip(ground_truth) {
            match (pred, truth) {
                (1, 1) => matrix.tp += 1,
                (0, 0) => matrix.tn += 1,
                (1, _) => matrix.fp += 1,
                (_, _) => matrix.fn_ += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Accuracy: (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.tp + self.tn) as f64 / total as f64
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            return 0.0;
        }
        self.tp as f64 / denom as f64
    }

    /// Fraction of rows predicted positive
    pub fn selection_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.tp + self.fp) as f64 / total as f64
    }

    /// TP / (TP + FN); None when there are no actual positives
    pub fn true_positive_rate(&self) -> Option<f64> {
        let denom = self.tp + self.fn_;
        (denom > 0).then(|| self.tp as f64 / denom as f64)
    }

    /// FP / (FP + TN); None when there are no actual negatives
    pub fn false_positive_rate(&self) -> Option<f64> {
        let denom = self.fp + self.tn;
        (denom > 0).then(|| self.fp as f64 / denom as f64)
    }

    /// F1 Score: 2 * (Precision * Recall) / (Precision + Recall)
    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.true_positive_rate().unwrap_or(0.0);
        let denom = precision + recall;
        if denom == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / denom
    }
}

/// Metric name -> rounded value, in insertion order.
///
/// Serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsBundle {
    entries: Vec<(String, f64)>,
}

impl MetricsBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a metric
    pub fn insert(&mut self, name: &str, value: f64) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for MetricsBundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetricsBundle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
        let mut bundle = Self::new();
        // Known metrics first, in reporting order
        for name in METRIC_NAMES {
            if let Some(value) = raw.remove(*name) {
                bundle.insert(name, value);
            }
        }
        for (name, value) in raw {
            bundle.insert(&name, value);
        }
        Ok(bundle)
    }
}

/// Identifier of a sensitive-attribute group.
///
/// The evaluator always produces `Code`; the other shapes appear when group
/// rates come back from JSON or another tool.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Code(i64),
    Number(f64),
    Text(String),
}

impl GroupKey {
    /// Integer first, then float, then free text
    pub fn parse(raw: &str) -> Self {
        if let Ok(code) = raw.parse::<i64>() {
            GroupKey::Code(code)
        } else if let Ok(number) = raw.parse::<f64>() {
            GroupKey::Number(number)
        } else {
            GroupKey::Text(raw.to_string())
        }
    }

    /// Non-negative integer or integer-valued float, usable as a positional index
    pub fn as_index(&self) -> Option<usize> {
        match self {
            GroupKey::Code(code) => usize::try_from(*code).ok(),
            GroupKey::Number(n) if n.is_finite() && n.fract() == 0.0 && *n >= 0.0 => Some(*n as usize),
            _ => None,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Code(code) => write!(f, "{}", code),
            GroupKey::Number(n) => write!(f, "{}", n),
            GroupKey::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Group identifier -> selection rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupRates {
    entries: Vec<(GroupKey, f64)>,
}

impl GroupRates {
    pub fn new(entries: Vec<(GroupKey, f64)>) -> Self {
        Self { entries }
    }

    pub fn from_codes(rates: &BTreeMap<usize, f64>) -> Self {
        Self {
            entries: rates.iter().map(|(&code, &rate)| (GroupKey::Code(code as i64), rate)).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, f64)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn get(&self, key: &GroupKey) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for GroupRates {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, rate) in &self.entries {
            map.serialize_entry(&key.to_string(), rate)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupRates {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let entries = raw
            .into_iter()
            .map(|(key, value)| {
                let rate = match &value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                let rate = rate.unwrap_or_else(|| {
                    tracing::warn!("Non-numeric selection rate {} for group '{}', using 0.0", value, key);
                    0.0
                });
                (GroupKey::parse(&key), rate)
            })
            .collect();
        Ok(Self { entries })
    }
}

/// Disaggregated statistics for one sensitive group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub group: usize,
    pub count: usize,
    pub selection_rate: f64,
    pub true_positive_rate: Option<f64>,
    pub false_positive_rate: Option<f64>,
}

/// Everything the evaluator produces for one (model, test split) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasEvaluation {
    pub metrics: MetricsBundle,
    pub group_rates: GroupRates,
    pub group_stats: Vec<GroupStats>,
    pub predictions: Vec<u8>,
}

impl BiasEvaluation {
    /// Format as a human-readable block; `labels` maps group codes to names
    pub fn format(&self, labels: &BTreeMap<usize, String>) -> String {
        let mut output = String::from("Fairness Metrics\n================\n");
        for (name, value) in self.metrics.iter() {
            output.push_str(&format!("{:<24} {:.2}\n", format!("{}:", name), value));
        }

        output.push_str(&format!(
            "\n{:<16} {:>6} {:>10} {:>8} {:>8}\n",
            "Group", "Count", "Selection", "TPR", "FPR"
        ));
        for stats in &self.group_stats {
            let label = labels.get(&stats.group).cloned().unwrap_or_else(|| stats.group.to_string());
            let fmt_opt = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:.2}", v));
            output.push_str(&format!(
                "{:<16} {:>6} {:>10.2} {:>8} {:>8}\n",
                label,
                stats.count,
                stats.selection_rate,
                fmt_opt(stats.true_positive_rate),
                fmt_opt(stats.false_positive_rate)
            ));
        }
        output
    }
}

/// Fraction of positive predictions per group
pub fn selection_rates(predictions: &[u8], groups: &[usize]) -> BTreeMap<usize, f64> {
    let mut counts: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for (&pred, &group) in predictions.iter().zip(groups) {
        let entry = counts.entry(group).or_insert((0, 0));
        entry.0 += usize::from(pred == 1);
        entry.1 += 1;
    }
    counts
        .into_iter()
        .map(|(group, (pos, total))| (group, pos as f64 / total as f64))
        .collect()
}

/// Highest minus lowest group selection rate
pub fn demographic_parity_difference(rates: &BTreeMap<usize, f64>) -> f64 {
    let (min, max) = min_max(rates.values().copied());
    max - min
}

/// Lowest over highest group selection rate; 0 when every group has rate 0
pub fn disparate_impact(rates: &BTreeMap<usize, f64>) -> f64 {
    let (min, max) = min_max(rates.values().copied());
    if max == 0.0 {
        return 0.0;
    }
    min / max
}

/// Highest minus lowest true positive rate, over groups with at least one actual positive
pub fn equal_opportunity_difference(stats: &[GroupStats]) -> f64 {
    let tprs: Vec<f64> = stats.iter().filter_map(|s| s.true_positive_rate).collect();
    if tprs.len() < 2 {
        return 0.0;
    }
    let (min, max) = min_max(tprs.into_iter());
    max - min
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Per-group confusion statistics
pub fn group_stats(y_true: &[u8], y_pred: &[u8], groups: &[usize]) -> Vec<GroupStats> {
    let mut per_group: BTreeMap<usize, (Vec<u8>, Vec<u8>)> = BTreeMap::new();
    for ((&t, &p), &g) in y_true.iter().zip(y_pred).zip(groups) {
        let entry = per_group.entry(g).or_default();
        entry.0.push(t);
        entry.1.push(p);
    }

    per_group
        .into_iter()
        .map(|(group, (truth, preds))| {
            let cm = ConfusionMatrix::from_predictions(&preds, &truth);
            GroupStats {
                group,
                count: cm.total(),
                selection_rate: cm.selection_rate(),
                true_positive_rate: cm.true_positive_rate(),
                false_positive_rate: cm.false_positive_rate(),
            }
        })
        .collect()
}

/// Compute the fairness bundle from predictions already made
pub fn evaluate_predictions(y_true: &[u8], y_pred: &[u8], groups: &[usize]) -> Result<BiasEvaluation> {
    if y_true.len() != y_pred.len() || y_true.len() != groups.len() {
        return Err(BiasError::validation(format!(
            "Misaligned evaluation inputs: {} targets, {} predictions, {} group values",
            y_true.len(),
            y_pred.len(),
            groups.len()
        )));
    }

    let rates = selection_rates(y_pred, groups);
    if rates.len() < 2 {
        return Err(BiasError::InsufficientGroups { found: rates.len() });
    }

    let stats = group_stats(y_true, y_pred, groups);
    let cm = ConfusionMatrix::from_predictions(y_pred, y_true);

    let mut metrics = MetricsBundle::new();
    metrics.insert(ACCURACY, round2(cm.accuracy()));
    metrics.insert(DEMOGRAPHIC_PARITY_DIFF, round2(demographic_parity_difference(&rates)));
    metrics.insert(EQUAL_OPPORTUNITY_DIFF, round2(equal_opportunity_difference(&stats)));
    metrics.insert(DISPARATE_IMPACT, round2(disparate_impact(&rates)));

    Ok(BiasEvaluation {
        metrics,
        group_rates: GroupRates::from_codes(&rates),
        group_stats: stats,
        predictions: y_pred.to_vec(),
    })
}

/// Run inference once on the test partition and compute the fairness bundle
pub fn evaluate_bias(model: &dyn Classifier, x_test: &[Vec<f64>], y_test: &[u8], a_test: &[usize]) -> Result<BiasEvaluation> {
    let predictions = model.predict_batch(x_test);
    let evaluation = evaluate_predictions(y_test, &predictions, a_test)?;

    tracing::info!(
        "{} - Accuracy: {:.2}, DPD: {:.2}, EOD: {:.2}, DI: {:.2}",
        model.name(),
        evaluation.metrics.get(ACCURACY).unwrap_or_default(),
        evaluation.metrics.get(DEMOGRAPHIC_PARITY_DIFF).unwrap_or_default(),
        evaluation.metrics.get(EQUAL_OPPORTUNITY_DIFF).unwrap_or_default(),
        evaluation.metrics.get(DISPARATE_IMPACT).unwrap_or_default()
    );

    Ok(evaluation)
}

/// Evaluate every model in the set
pub fn evaluate_models(
    models: &ModelSet,
    x_test: &[Vec<f64>],
    y_test: &[u8],
    a_test: &[usize],
) -> Result<BTreeMap<String, BiasEvaluation>> {
    models
        .iter()
        .map(|(name, model)| Ok((name.clone(), evaluate_bias(model.as_ref(), x_test, y_test, a_test)?)))
        .collect()
}
