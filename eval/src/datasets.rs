// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading and preprocessing for fairness evaluation
//!
//! Turns a raw CSV table into model-ready partitions:
//! - rows with missing values are dropped
//! - target and sensitive columns are label-encoded (reverse mapping retained)
//! - categorical features are label-encoded, then every feature is standardized
//! - a seeded shuffle splits rows into aligned train/test partitions

use crate::error::{BiasError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

/// Cell values treated as missing (after trimming whitespace)
pub const MISSING_MARKERS: &[&str] = &["?", "", "NA", "N/A", "NaN", "nan", "null", "NULL"];

pub fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell.trim())
}

/// A header plus string cells, exactly as read from the CSV
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Load a CSV file with a header row
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            BiasError::validation(format!("Cannot open dataset {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Write the table back out as CSV with a header row
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_path(&self, path: &Path) -> Result<()> {
        self.write_csv(std::fs::File::create(path)?)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require_column(&self, name: &str, role: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| BiasError::validation(format!("{} column '{}' not found in dataset.", role, name)))
    }

    /// Drop every row that contains a missing value in any column.
    /// Returns the number of rows removed.
    pub fn drop_missing(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| !row.iter().any(|c| is_missing(c)));
        before - self.rows.len()
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[idx].as_str())
    }

    /// Generate a census-like table with a tunable bias against one group.
    ///
    /// Columns: age, hours_per_week, education, sex, income. `bias` shifts the
    /// decision score up for "Male" rows and down for "Female" rows.
    pub fn synthetic(size: usize, seed: u64, bias: f64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let education = [("HS-grad", -0.6), ("Bachelors", 0.1), ("Masters", 0.5), ("Doctorate", 0.9)];

        let rows = (0..size)
            .map(|_| {
                let age: u32 = rng.gen_range(18..70);
                let hours: u32 = rng.gen_range(20..61);
                let (edu, edu_bonus) = education[rng.gen_range(0..education.len())];
                let male = rng.gen_bool(0.5);
                let noise: f64 = rng.gen_range(-0.5..0.5);

                let score = 0.04 * (age as f64 - 40.0)
                    + 0.05 * (hours as f64 - 40.0)
                    + edu_bonus
                    + if male { bias } else { -bias }
                    + noise;

                vec![
                    age.to_string(),
                    hours.to_string(),
                    edu.to_string(),
                    if male { "Male" } else { "Female" }.to_string(),
                    if score > 0.0 { ">50K" } else { "<=50K" }.to_string(),
                ]
            })
            .collect();

        Self {
            headers: ["age", "hours_per_week", "education", "sex", "income"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            rows,
        }
    }
}

/// Dense label encoding: distinct values sorted, then numbered 0..k-1.
///
/// Values sort numerically when every value parses as a number, lexicographically otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "EncoderClasses", into = "EncoderClasses")]
pub struct LabelEncoder {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

/// Serialized form of [`LabelEncoder`]; the lookup index is rebuilt on load
#[derive(Clone, Serialize, Deserialize)]
struct EncoderClasses {
    classes: Vec<String>,
}

impl From<EncoderClasses> for LabelEncoder {
    fn from(value: EncoderClasses) -> Self {
        Self::from_classes(value.classes)
    }
}

impl From<LabelEncoder> for EncoderClasses {
    fn from(value: LabelEncoder) -> Self {
        Self { classes: value.classes }
    }
}

impl PartialEq for LabelEncoder {
    fn eq(&self, other: &Self) -> bool {
        self.classes == other.classes
    }
}

impl LabelEncoder {
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut seen = HashSet::new();
        let mut classes: Vec<String> = values
            .into_iter()
            .filter(|v| seen.insert(*v))
            .map(|v| v.to_string())
            .collect();

        let numeric: Option<Vec<f64>> = classes.iter().map(|c| c.parse::<f64>().ok()).collect();
        match numeric {
            Some(_) => classes.sort_by(|a, b| {
                let (x, y) = (a.parse::<f64>().unwrap_or(0.0), b.parse::<f64>().unwrap_or(0.0));
                x.total_cmp(&y).then_with(|| a.cmp(b))
            }),
            None => classes.sort(),
        }

        Self::from_classes(classes)
    }

    /// Encoder over classes already in code order
    pub fn from_classes(classes: Vec<String>) -> Self {
        let index = classes.iter().enumerate().map(|(code, c)| (c.clone(), code)).collect();
        Self { classes, index }
    }

    pub fn transform(&self, value: &str) -> Option<usize> {
        self.index.get(value).copied()
    }

    pub fn inverse(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(|s| s.as_str())
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Code -> original label
    pub fn mapping(&self) -> BTreeMap<usize, String> {
        self.classes.iter().cloned().enumerate().collect()
    }
}

/// How a feature column was encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Standardized with statistics from the training partition
    Numeric { mean: f64, scale: f64 },
    /// Label-encoded, then standardized like a numeric column
    Categorical { encoder: LabelEncoder, mean: f64, scale: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

/// Train/test split configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of rows held out for evaluation, in (0, 1)
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.3,
            seed: 42,
        }
    }
}

/// Encoded, split dataset ready for training and evaluation.
///
/// Row `i` of `x_test`, `y_test`, `a_test` and `test_rows` always refers to the same source row.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub features: Vec<FeatureSpec>,
    pub x_train: Vec<Vec<f64>>,
    pub x_test: Vec<Vec<f64>>,
    pub y_train: Vec<u8>,
    pub y_test: Vec<u8>,
    pub a_train: Vec<usize>,
    pub a_test: Vec<usize>,
    pub target_encoder: LabelEncoder,
    pub sensitive_encoder: LabelEncoder,
    /// Indices into the cleaned table (after missing rows were dropped)
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
    pub dropped_rows: usize,
}

impl PreparedData {
    /// Sensitive code -> original group label
    pub fn group_labels(&self) -> BTreeMap<usize, String> {
        self.sensitive_encoder.mapping()
    }

    /// Original sensitive values of the test partition, in row order
    pub fn sensitive_test_values(&self) -> Vec<String> {
        self.a_test
            .iter()
            .map(|&code| self.sensitive_encoder.inverse(code).unwrap_or_default().to_string())
            .collect()
    }
}

/// Load a CSV and preprocess it into train/test partitions
pub fn preprocess(path: &Path, target_col: &str, sensitive_col: &str, split: SplitConfig) -> Result<PreparedData> {
    tracing::info!("Loading dataset from {}", path.display());
    let table = RawTable::from_csv_path(path)?;
    prepare(table, target_col, sensitive_col, split)
}

/// Preprocess an in-memory table into train/test partitions
pub fn prepare(mut table: RawTable, target_col: &str, sensitive_col: &str, split: SplitConfig) -> Result<PreparedData> {
    let target_idx = table.require_column(target_col, "Target")?;
    let sensitive_idx = table.require_column(sensitive_col, "Sensitive")?;
    if target_idx == sensitive_idx {
        return Err(BiasError::validation("Target and sensitive columns must differ."));
    }
    if !(split.test_fraction > 0.0 && split.test_fraction < 1.0) {
        return Err(BiasError::validation(format!(
            "Test fraction must be between 0 and 1, got {}",
            split.test_fraction
        )));
    }

    let dropped_rows = table.drop_missing();
    if dropped_rows > 0 {
        tracing::warn!("Dropped {} row(s) containing missing values", dropped_rows);
    }
    let n = table.rows.len();
    if n == 0 {
        return Err(BiasError::validation("Dataset has no complete rows after dropping missing values."));
    }

    let target_encoder = LabelEncoder::fit(table.column(target_idx));
    if target_encoder.len() != 2 {
        return Err(BiasError::validation(format!(
            "Target column '{}' must have exactly 2 distinct values, found {}.",
            target_col,
            target_encoder.len()
        )));
    }
    let sensitive_encoder = LabelEncoder::fit(table.column(sensitive_idx));

    let y: Vec<u8> = table
        .column(target_idx)
        .map(|v| target_encoder.transform(v).unwrap_or(0) as u8)
        .collect();
    let a: Vec<usize> = table
        .column(sensitive_idx)
        .map(|v| sensitive_encoder.transform(v).unwrap_or(0))
        .collect();

    let (train_rows, test_rows) = split_indices(n, split)?;

    // Categorical vocabularies span all rows; scaler statistics come from train rows only.
    let standardize = |values: Vec<f64>| -> (f64, f64, Vec<f64>) {
        let train_values: Vec<f64> = train_rows.iter().map(|&r| values[r]).collect();
        let (mean, scale) = standard_scale_params(&train_values);
        let scaled = values.iter().map(|v| (v - mean) / scale).collect();
        (mean, scale, scaled)
    };

    let feature_indices: Vec<usize> = (0..table.headers.len())
        .filter(|&i| i != target_idx && i != sensitive_idx)
        .collect();

    let mut features = Vec::with_capacity(feature_indices.len());
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(feature_indices.len());

    for &col in &feature_indices {
        let parsed: Option<Vec<f64>> = table.column(col).map(|v| v.parse::<f64>().ok()).collect();
        let (kind, values) = match parsed {
            Some(values) => {
                let (mean, scale, scaled) = standardize(values);
                (FeatureKind::Numeric { mean, scale }, scaled)
            }
            None => {
                let encoder = LabelEncoder::fit(table.column(col));
                let codes = table
                    .column(col)
                    .map(|v| encoder.transform(v).unwrap_or(0) as f64)
                    .collect();
                let (mean, scale, scaled) = standardize(codes);
                (FeatureKind::Categorical { encoder, mean, scale }, scaled)
            }
        };
        features.push(FeatureSpec {
            name: table.headers[col].clone(),
            kind,
        });
        columns.push(values);
    }

    let rows_of = |indices: &[usize]| -> Vec<Vec<f64>> {
        indices
            .iter()
            .map(|&r| columns.iter().map(|c| c[r]).collect())
            .collect()
    };

    let prepared = PreparedData {
        x_train: rows_of(&train_rows),
        x_test: rows_of(&test_rows),
        y_train: train_rows.iter().map(|&r| y[r]).collect(),
        y_test: test_rows.iter().map(|&r| y[r]).collect(),
        a_train: train_rows.iter().map(|&r| a[r]).collect(),
        a_test: test_rows.iter().map(|&r| a[r]).collect(),
        features,
        target_encoder,
        sensitive_encoder,
        train_rows,
        test_rows,
        dropped_rows,
    };

    tracing::info!(
        "Preprocessed {} rows ({} features): train={}, test={}",
        n,
        prepared.features.len(),
        prepared.x_train.len(),
        prepared.x_test.len()
    );

    Ok(prepared)
}

/// Mean and standard deviation (population); a constant column scales by 1
fn standard_scale_params(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    (mean, if std > 0.0 { std } else { 1.0 })
}

/// Seeded shuffle of `0..n`; the first `ceil(n * test_fraction)` indices form the test partition
pub fn split_indices(n: usize, split: SplitConfig) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = (n as f64 * split.test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(BiasError::validation(format!(
            "Cannot split {} row(s) with test fraction {}: both partitions need at least one row.",
            n, split.test_fraction
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(split.seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// Count occurrences of each code
pub fn label_distribution<T: Copy + Ord>(values: &[T]) -> BTreeMap<T, usize> {
    let mut dist = BTreeMap::new();
    for &v in values {
        *dist.entry(v).or_insert(0) += 1;
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
age,workclass,sex,income
39,State-gov,Male,<=50K
50,Self-emp,Male,>50K
38,Private,Female,<=50K
53,?,Female,>50K
28,Private,Female,<=50K
37,Private,Female,>50K
49,,Male,<=50K
52,Self-emp,Male,>50K
31,Private,Female,>50K
42,Private,Male,>50K
";

    fn table() -> RawTable {
        RawTable::from_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn test_missing_markers() {
        assert!(is_missing("?"));
        assert!(is_missing(" ? "));
        assert!(is_missing(""));
        assert!(is_missing("NaN"));
        assert!(!is_missing("0"));
        assert!(!is_missing("Private"));
    }

    #[test]
    fn test_missing_rows_never_reach_partitions() {
        let prepared = prepare(table(), "income", "sex", SplitConfig::default()).unwrap();

        assert_eq!(prepared.dropped_rows, 2);
        assert_eq!(prepared.x_train.len() + prepared.x_test.len(), 8);
        for row in prepared.x_train.iter().chain(prepared.x_test.iter()) {
            assert!(row.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_missing_column_is_validation_error() {
        let err = prepare(table(), "salary", "sex", SplitConfig::default()).unwrap_err();
        assert!(matches!(err, BiasError::Validation(_)));
        assert!(err.to_string().contains("Target column 'salary'"));

        let err = prepare(table(), "income", "race", SplitConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Sensitive column 'race'"));
    }

    #[test]
    fn test_non_binary_target_rejected() {
        let err = prepare(table(), "workclass", "sex", SplitConfig::default()).unwrap_err();
        assert!(matches!(err, BiasError::Validation(_)));
    }

    #[test]
    fn test_label_encoder_sorted_and_round_trips() {
        let values = ["Male", "Female", "Male", "Other"];
        let encoder = LabelEncoder::fit(values.iter().copied());

        assert_eq!(encoder.classes(), &["Female", "Male", "Other"]);
        for v in values {
            let code = encoder.transform(v).unwrap();
            assert_eq!(encoder.inverse(code), Some(v));
        }
        assert_eq!(encoder.transform("Unknown"), None);
    }

    #[test]
    fn test_label_encoder_numeric_order() {
        let encoder = LabelEncoder::fit(["10", "9", "1.5"].iter().copied());
        assert_eq!(encoder.classes(), &["1.5", "9", "10"]);
    }

    #[test]
    fn test_split_alignment() {
        let source = table();
        let prepared = prepare(source.clone(), "income", "sex", SplitConfig::default()).unwrap();

        let mut cleaned = source;
        cleaned.drop_missing();

        for (i, &row) in prepared.test_rows.iter().enumerate() {
            let sex = &cleaned.rows[row][2];
            let income = &cleaned.rows[row][3];
            assert_eq!(prepared.sensitive_encoder.inverse(prepared.a_test[i]), Some(sex.as_str()));
            assert_eq!(
                prepared.target_encoder.inverse(prepared.y_test[i] as usize),
                Some(income.as_str())
            );
            // age is the first feature; undo the scaling to recover the source value
            if let FeatureKind::Numeric { mean, scale } = prepared.features[0].kind {
                let age: f64 = cleaned.rows[row][0].parse().unwrap();
                assert!((prepared.x_test[i][0] * scale + mean - age).abs() < 1e-9);
            } else {
                panic!("age should be numeric");
            }
        }
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let (train, test) = split_indices(10, SplitConfig { test_fraction: 0.3, seed: 42 }).unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 7);

        let (train2, test2) = split_indices(10, SplitConfig { test_fraction: 0.3, seed: 42 }).unwrap();
        assert_eq!(train, train2);
        assert_eq!(test, test2);

        let mut all: Vec<usize> = train.into_iter().chain(test).collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rejects_degenerate_fraction() {
        assert!(split_indices(1, SplitConfig { test_fraction: 0.3, seed: 1 }).is_err());
        let err = prepare(table(), "income", "sex", SplitConfig { test_fraction: 1.0, seed: 1 }).unwrap_err();
        assert!(matches!(err, BiasError::Validation(_)));
    }

    #[test]
    fn test_scaler_fitted_on_train_partition() {
        let prepared = prepare(table(), "income", "sex", SplitConfig::default()).unwrap();
        let train_age: Vec<f64> = prepared.x_train.iter().map(|r| r[0]).collect();
        let mean = train_age.iter().sum::<f64>() / train_age.len() as f64;
        let var = train_age.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / train_age.len() as f64;

        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
        assert!(matches!(prepared.features[1].kind, FeatureKind::Categorical { .. }));
    }

    #[test]
    fn test_high_cardinality_categorical_is_standardized() {
        use crate::baselines::{Classifier, LogisticConfig, LogisticRegression};

        let rows = (0..600)
            .map(|i| {
                let code = i % 40;
                vec![
                    format!("c{:02}", code),
                    if i % 3 == 0 { "A" } else { "B" }.to_string(),
                    if code >= 20 { "yes" } else { "no" }.to_string(),
                ]
            })
            .collect();
        let table = RawTable {
            headers: vec!["cat".into(), "group".into(), "label".into()],
            rows,
        };
        let prepared = prepare(table, "label", "group", SplitConfig::default()).unwrap();

        match &prepared.features[0].kind {
            FeatureKind::Categorical { encoder, scale, .. } => {
                assert_eq!(encoder.len(), 40);
                assert!(*scale > 1.0);
            }
            other => panic!("expected categorical, got {:?}", other),
        }
        let train: Vec<f64> = prepared.x_train.iter().map(|r| r[0]).collect();
        let mean = train.iter().sum::<f64>() / train.len() as f64;
        let var = train.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / train.len() as f64;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);

        let mut model = LogisticRegression::new(LogisticConfig::default());
        model.fit(&prepared.x_train, &prepared.y_train);
        let preds = model.predict_batch(&prepared.x_train);
        let correct = preds.iter().zip(&prepared.y_train).filter(|(p, y)| p == y).count();
        assert!(correct as f64 / preds.len() as f64 >= 0.95);
    }

    #[test]
    fn test_label_encoder_serde_rebuilds_index() {
        let encoder = LabelEncoder::fit(["b", "a", "c"].iter().copied());
        let json = serde_json::to_string(&encoder).unwrap();
        assert_eq!(json, r#"{"classes":["a","b","c"]}"#);

        let back: LabelEncoder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, encoder);
        assert_eq!(back.transform("c"), Some(2));
    }

    #[test]
    fn test_label_encoder_wide_vocabulary() {
        let values: Vec<String> = (0..30_000).map(|i| format!("id{}", i)).collect();
        let encoder = LabelEncoder::fit(values.iter().map(|v| v.as_str()));
        assert_eq!(encoder.len(), 30_000);
        for v in &values {
            let code = encoder.transform(v).unwrap();
            assert_eq!(encoder.inverse(code), Some(v.as_str()));
        }
    }

    #[test]
    fn test_synthetic_dataset() {
        let table = RawTable::synthetic(200, 7, 0.5);
        assert_eq!(table.rows.len(), 200);
        assert_eq!(table.column_index("sex"), Some(3));

        let again = RawTable::synthetic(200, 7, 0.5);
        assert_eq!(table.rows, again.rows);

        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let reread = RawTable::from_reader(buf.as_slice()).unwrap();
        assert_eq!(reread.headers, table.headers);
        assert_eq!(reread.rows, table.rows);
    }

    #[test]
    fn test_label_distribution() {
        let dist = label_distribution(&[0usize, 1, 1, 2, 1]);
        assert_eq!(dist.get(&1), Some(&3));
        assert_eq!(dist.len(), 3);
    }
}
