// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fairness report composition
//!
//! The report is built once as a [`ReportDocument`] (a flat list of blocks)
//! and then rendered to PDF with genpdf or to Markdown. Group keys are turned
//! into analyst-facing labels by [`LabelResolver`].

use crate::chart::FontConfig;
use crate::error::{BiasError, Result};
use crate::metrics::{
    GroupKey, GroupRates, MetricsBundle, ACCURACY, DEMOGRAPHIC_PARITY_DIFF, DISPARATE_IMPACT, EQUAL_OPPORTUNITY_DIFF,
};
use genpdf::elements::{Break, FrameCellDecorator, Image, Paragraph, TableLayout};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::{Alignment, Document, Element, Scale, SimplePageDecorator};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const REPORT_TITLE: &str = "BiasGuard - AI Fairness Report";

/// Disparate impact band considered fair
pub const DI_LOWER: f64 = 0.8;
pub const DI_UPPER: f64 = 1.25;
/// Largest tolerated true-positive-rate gap
pub const EOD_TOLERANCE: f64 = 0.2;
/// Selection-rate gap above which bias is called substantial
pub const SUBSTANTIAL_GAP: f64 = 0.3;

const LEGEND_WIDTH: usize = 80;
const PAGE_MARGIN_MM: i32 = 15;
const CHART_WIDTH_MM: f64 = 180.0;
const GENPDF_DEFAULT_DPI: f64 = 300.0;

/// Maps group keys to human-readable labels.
///
/// Lookup order: explicit code -> label mapping, then the key as a position
/// into the distinct raw sensitive values (first-seen order), then the key
/// itself. The explicit mapping comes from the encoder that produced the
/// codes, so it wins over positional reconstruction.
#[derive(Debug, Clone, Default)]
pub struct LabelResolver {
    mapping: Option<BTreeMap<usize, String>>,
    distinct: Option<Vec<String>>,
}

impl LabelResolver {
    pub fn new(mapping: Option<&BTreeMap<usize, String>>, sensitive_values: Option<&[String]>) -> Self {
        let distinct = sensitive_values.map(|values| {
            let mut seen = HashSet::new();
            values
                .iter()
                .filter(|v| seen.insert(v.as_str()))
                .cloned()
                .collect()
        });
        Self { mapping: mapping.cloned(), distinct }
    }

    pub fn resolve(&self, key: &GroupKey) -> String {
        if let Some(mapping) = &self.mapping {
            let code = key.as_index().or_else(|| key.to_string().trim().parse::<usize>().ok());
            if let Some(label) = code.and_then(|c| mapping.get(&c)) {
                return label.clone();
            }
        }

        if let Some(distinct) = &self.distinct {
            if let Some(label) = key.as_index().and_then(|i| distinct.get(i)) {
                return label.clone();
            }
        }

        key.to_string()
    }
}

/// Numeric-looking labels sort numerically and ahead of text
fn label_order(a: &str, b: &str) -> Ordering {
    fn numeric(s: &str) -> Option<f64> {
        let digits = s.replacen('.', "", 1);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            s.parse::<f64>().ok()
        } else {
            None
        }
    }

    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Join `items` with ", " into lines of at most `width` characters
fn wrap_items(items: &[String], width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for item in items {
        if !current.is_empty() && current.chars().count() + item.chars().count() + 2 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(", ");
        }
        current.push_str(item);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn interpretation(metrics: &MetricsBundle) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(acc) = metrics.get(ACCURACY) {
        lines.push(format!(
            "The model achieved an accuracy of {:.2}. Accuracy alone says nothing about fairness: \
             a model can be accurate overall while systematically favoring one group.",
            acc
        ));
    }

    if let Some(di) = metrics.get(DISPARATE_IMPACT) {
        lines.push(if di == 0.0 {
            format!(
                "Disparate Impact is {:.2}, indicating severe bias: at least one group receives no positive \
                 predictions at all and is excluded from favorable outcomes.",
                di
            )
        } else if !(DI_LOWER..=DI_UPPER).contains(&di) {
            format!(
                "Disparate Impact is {:.2}, which is outside the fairness threshold [{}, {}]. \
                 One group is favored or disfavored relative to another.",
                di, DI_LOWER, DI_UPPER
            )
        } else {
            format!(
                "Disparate Impact is {:.2}, which is within the fairness threshold [{}, {}]. \
                 Groups receive positive outcomes at comparable rates.",
                di, DI_LOWER, DI_UPPER
            )
        });
    }

    if let Some(eod) = metrics.get(EQUAL_OPPORTUNITY_DIFF) {
        lines.push(if eod.abs() == 1.0 {
            format!(
                "Equal Opportunity Difference is {:.2}, indicating severe bias: one group has a perfect \
                 true positive rate while another has none.",
                eod
            )
        } else if eod.abs() > EOD_TOLERANCE {
            format!(
                "Equal Opportunity Difference is {:.2}, which exceeds the tolerance of {}. \
                 Qualified members of some groups are recognized less often than others.",
                eod, EOD_TOLERANCE
            )
        } else {
            format!(
                "Equal Opportunity Difference is {:.2}, which is within the acceptable range. \
                 The model identifies true positives at similar rates across groups.",
                eod
            )
        });
    }

    if let Some(dpd) = metrics.get(DEMOGRAPHIC_PARITY_DIFF) {
        lines.push(format!(
            "Demographic Parity Difference is {:.2}. Higher values mean groups receive positive \
             predictions at unequal rates, a key sign of potential bias.",
            dpd
        ));
    }

    lines
}

fn fairness_summary(rates: &[f64]) -> String {
    if rates.is_empty() {
        return "Fairness summary could not be computed: no valid group selection rates.".to_string();
    }
    let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
    let gap = max - min;
    format!(
        "The highest group selection rate is {:.2} and the lowest is {:.2}. The gap of {:.2} indicates {} bias \
         in favor of the higher-rated group.",
        max,
        min,
        gap,
        if gap > SUBSTANTIAL_GAP { "substantial" } else { "minor" }
    )
}

/// Everything the report needs, all borrowed from the audit run
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub metrics: &'a MetricsBundle,
    pub group_rates: &'a GroupRates,
    pub sensitive_col: &'a str,
    pub model_name: &'a str,
    pub chart_path: Option<&'a Path>,
    pub label_map: Option<&'a BTreeMap<usize, String>>,
    pub sensitive_values: Option<&'a [String]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Legend(Vec<String>),
    Title(String),
    Heading(String),
    Paragraph(String),
    Table { headers: [String; 2], rows: Vec<[String; 2]> },
    Chart(PathBuf),
}

/// Renderer-independent report content, in document order
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    blocks: Vec<Block>,
}

impl ReportDocument {
    pub fn build(input: &ReportInput<'_>) -> Self {
        let mut blocks = Vec::new();

        if let Some(mapping) = input.label_map.filter(|m| !m.is_empty()) {
            let items: Vec<String> = mapping.iter().map(|(code, label)| format!("{} = {}", code, label)).collect();
            blocks.push(Block::Legend(wrap_items(&items, LEGEND_WIDTH)));
        }

        blocks.push(Block::Title(REPORT_TITLE.to_string()));

        blocks.push(Block::Heading("Model Overview".to_string()));
        blocks.push(Block::Paragraph(format!(
            "This report analyzes bias in the {} with respect to sensitive attribute: {}.",
            input.model_name, input.sensitive_col
        )));

        blocks.push(Block::Heading("Fairness Metrics".to_string()));
        for (name, value) in input.metrics.iter() {
            blocks.push(Block::Paragraph(format!("{}: {:.4}", name, value)));
        }

        let resolver = LabelResolver::new(input.label_map, input.sensitive_values);
        let mut rows: Vec<(String, f64)> = input
            .group_rates
            .iter()
            .map(|(key, rate)| (resolver.resolve(key), if rate.is_finite() { rate } else { 0.0 }))
            .collect();
        rows.sort_by(|a, b| label_order(&a.0, &b.0));

        blocks.push(Block::Heading(format!("Selection Rates by {}", input.sensitive_col)));
        blocks.push(Block::Table {
            headers: [format!("{} Group", input.sensitive_col), "Selection Rate".to_string()],
            rows: rows.iter().map(|(label, rate)| [label.clone(), format!("{:.2}", rate)]).collect(),
        });

        blocks.push(Block::Heading("Interpretation".to_string()));
        blocks.extend(interpretation(input.metrics).into_iter().map(Block::Paragraph));

        blocks.push(Block::Heading("Fairness Summary".to_string()));
        let rates: Vec<f64> = rows.iter().map(|(_, r)| *r).collect();
        blocks.push(Block::Paragraph(fairness_summary(&rates)));

        match input.chart_path {
            Some(path) if path.is_file() => {
                blocks.push(Block::Heading("Selection Rates Chart".to_string()));
                blocks.push(Block::Chart(path.to_path_buf()));
            }
            Some(path) => tracing::warn!("Chart {} not found, omitting chart section", path.display()),
            None => {}
        }

        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Rows of the selection-rate table
    pub fn table_rows(&self) -> Vec<[String; 2]> {
        self.blocks
            .iter()
            .find_map(|b| match b {
                Block::Table { rows, .. } => Some(rows.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn has_chart(&self) -> bool {
        self.blocks.iter().any(|b| matches!(b, Block::Chart(_)))
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        for block in &self.blocks {
            match block {
                Block::Legend(lines) => {
                    md.push_str("**Group Mapping:**\n\n");
                    for line in lines {
                        md.push_str(&format!("{}  \n", line));
                    }
                    md.push('\n');
                }
                Block::Title(text) => md.push_str(&format!("# {}\n\n", text)),
                Block::Heading(text) => md.push_str(&format!("## {}\n\n", text)),
                Block::Paragraph(text) => md.push_str(&format!("{}\n\n", text)),
                Block::Table { headers, rows } => {
                    md.push_str(&format!("| {} | {} |\n|---|---|\n", headers[0], headers[1]));
                    for row in rows {
                        md.push_str(&format!("| {} | {} |\n", row[0], row[1]));
                    }
                    md.push('\n');
                }
                Block::Chart(path) => md.push_str(&format!("![Selection Rates Chart]({})\n\n", path.display())),
            }
        }
        md
    }

    /// Render to PDF at `path`, via a temporary sibling file
    pub fn render_pdf(&self, path: &Path, fonts: &FontConfig) -> Result<PathBuf> {
        let resolved = fonts.locate().ok_or_else(|| BiasError::render(fonts.missing_message()))?;
        let load = |face: &Path| {
            FontData::load(face, None)
                .map_err(|e| BiasError::render(format!("failed to load font {}: {}", face.display(), e)))
        };
        let family = FontFamily {
            regular: load(&resolved.regular)?,
            bold: load(&resolved.bold)?,
            italic: load(&resolved.italic)?,
            bold_italic: load(&resolved.bold_italic)?,
        };

        let mut doc = Document::new(family);
        doc.set_title(REPORT_TITLE);
        doc.set_font_size(10);
        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(PAGE_MARGIN_MM);
        doc.set_page_decorator(decorator);

        for block in &self.blocks {
            match block {
                Block::Legend(lines) => {
                    doc.push(Paragraph::new("Group Mapping:"));
                    for line in lines {
                        doc.push(Paragraph::new(line.as_str()));
                    }
                    doc.push(Break::new(0.5));
                }
                Block::Title(text) => {
                    doc.push(
                        Paragraph::new(StyledString::new(text.as_str(), Style::new().bold().with_font_size(16)))
                            .aligned(Alignment::Center),
                    );
                    doc.push(Break::new(1));
                }
                Block::Heading(text) => {
                    doc.push(Break::new(0.5));
                    doc.push(Paragraph::new(StyledString::new(text.as_str(), Style::new().bold().with_font_size(12))));
                }
                Block::Paragraph(text) => doc.push(Paragraph::new(text.as_str())),
                Block::Table { headers, rows } => {
                    let mut table = TableLayout::new(vec![1, 1]);
                    table.set_cell_decorator(FrameCellDecorator::new(true, true, false));
                    table
                        .row()
                        .element(Paragraph::new(StyledString::new(headers[0].as_str(), Style::new().bold())).padded(1))
                        .element(Paragraph::new(StyledString::new(headers[1].as_str(), Style::new().bold())).padded(1))
                        .push()
                        .map_err(|e| BiasError::render(format!("invalid table row: {}", e)))?;
                    for row in rows {
                        table
                            .row()
                            .element(Paragraph::new(row[0].as_str()).padded(1))
                            .element(Paragraph::new(row[1].as_str()).padded(1))
                            .push()
                            .map_err(|e| BiasError::render(format!("invalid table row: {}", e)))?;
                    }
                    doc.push(table);
                }
                Block::Chart(chart) => {
                    let scale = chart_scale(chart);
                    let image = Image::from_path(chart)
                        .map_err(|e| BiasError::render(format!("failed to load chart {}: {}", chart.display(), e)))?
                        .with_scale(Scale::new(scale, scale))
                        .with_alignment(Alignment::Center);
                    doc.push(image);
                }
            }
        }

        let tmp = path.with_file_name(format!(".report-{}.pdf", uuid::Uuid::new_v4().simple()));
        if let Err(e) = doc.render_to_file(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(BiasError::render(format!("failed to render PDF: {}", e)));
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            BiasError::render(format!("could not write report to {}: {}", path.display(), e))
        })?;

        tracing::info!("Report saved to {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// Scale that makes the chart `CHART_WIDTH_MM` wide on the page
fn chart_scale(path: &Path) -> f64 {
    let width_px = png_width(path).unwrap_or(800) as f64;
    let natural_mm = width_px / GENPDF_DEFAULT_DPI * 25.4;
    CHART_WIDTH_MM / natural_mm
}

/// Width from the PNG IHDR chunk
fn png_width(path: &Path) -> Option<u32> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() < 24 || &bytes[..8] != b"\x89PNG\r\n\x1a\n" {
        return None;
    }
    Some(u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]))
}

/// Compose and render the PDF report
pub fn render_report(input: &ReportInput<'_>, output_path: &Path, fonts: &FontConfig) -> Result<PathBuf> {
    ReportDocument::build(input).render_pdf(output_path, fonts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(acc: f64, dpd: f64, eod: f64, di: f64) -> MetricsBundle {
        let mut m = MetricsBundle::new();
        m.insert(ACCURACY, acc);
        m.insert(DEMOGRAPHIC_PARITY_DIFF, dpd);
        m.insert(EQUAL_OPPORTUNITY_DIFF, eod);
        m.insert(DISPARATE_IMPACT, di);
        m
    }

    fn coded_rates(rates: &[(i64, f64)]) -> GroupRates {
        GroupRates::new(rates.iter().map(|&(k, v)| (GroupKey::Code(k), v)).collect())
    }

    fn input<'a>(metrics: &'a MetricsBundle, rates: &'a GroupRates) -> ReportInput<'a> {
        ReportInput {
            metrics,
            group_rates: rates,
            sensitive_col: "sex",
            model_name: "RandomForest",
            chart_path: None,
            label_map: None,
            sensitive_values: None,
        }
    }

    fn paragraphs(doc: &ReportDocument) -> Vec<String> {
        doc.blocks()
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_labels_from_sensitive_values() {
        let m = metrics(0.8, 0.2, 0.1, 0.75);
        let rates = coded_rates(&[(0, 0.6), (1, 0.4)]);
        let values: Vec<String> = ["Male", "Female", "Male"].iter().map(|s| s.to_string()).collect();

        let doc = ReportDocument::build(&ReportInput { sensitive_values: Some(values.as_slice()), ..input(&m, &rates) });
        let rows = doc.table_rows();
        assert_eq!(rows, vec![["Female".to_string(), "0.40".to_string()], ["Male".to_string(), "0.60".to_string()]]);
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let m = metrics(0.8, 0.2, 0.1, 0.75);
        let rates = coded_rates(&[(0, 0.4), (1, 0.6)]);
        let mapping: BTreeMap<usize, String> =
            [(0, "Female".to_string()), (1, "Male".to_string())].into_iter().collect();
        // First-seen order would say 0 = Male
        let values: Vec<String> = ["Male", "Female"].iter().map(|s| s.to_string()).collect();

        let doc = ReportDocument::build(&ReportInput {
            label_map: Some(&mapping),
            sensitive_values: Some(values.as_slice()),
            ..input(&m, &rates)
        });
        let rows = doc.table_rows();
        assert_eq!(rows[0], ["Female".to_string(), "0.40".to_string()]);
        assert_eq!(rows[1], ["Male".to_string(), "0.60".to_string()]);

        match &doc.blocks()[0] {
            Block::Legend(lines) => assert_eq!(lines, &vec!["0 = Female, 1 = Male".to_string()]),
            other => panic!("expected legend first, got {:?}", other),
        }
    }

    #[test]
    fn test_resolver_fallbacks() {
        let mapping: BTreeMap<usize, String> = [(1, "B".to_string())].into_iter().collect();
        let values = vec!["x".to_string(), "y".to_string()];
        let resolver = LabelResolver::new(Some(&mapping), Some(values.as_slice()));

        assert_eq!(resolver.resolve(&GroupKey::Code(1)), "B");
        assert_eq!(resolver.resolve(&GroupKey::Text("1".to_string())), "B");
        assert_eq!(resolver.resolve(&GroupKey::Number(0.0)), "x");
        assert_eq!(resolver.resolve(&GroupKey::Code(5)), "5");
        assert_eq!(resolver.resolve(&GroupKey::Number(f64::NAN)), "NaN");
        assert_eq!(resolver.resolve(&GroupKey::Text("other".to_string())), "other");

        let bare = LabelResolver::default();
        assert_eq!(bare.resolve(&GroupKey::Code(3)), "3");
    }

    #[test]
    fn test_rows_sorted_numeric_then_text() {
        let m = metrics(0.5, 0.0, 0.0, 1.0);
        let rates = GroupRates::new(vec![
            (GroupKey::Text("b".to_string()), 0.1),
            (GroupKey::Code(10), 0.2),
            (GroupKey::Code(9), 0.3),
            (GroupKey::Text("a".to_string()), f64::NAN),
        ]);
        let doc = ReportDocument::build(&input(&m, &rates));
        let labels: Vec<String> = doc.table_rows().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(labels, vec!["9", "10", "a", "b"]);
        // NaN rate shown as zero
        assert_eq!(doc.table_rows()[2][1], "0.00");
    }

    #[test]
    fn test_severe_bias_narrative() {
        let m = metrics(0.7, 1.0, 1.0, 0.0);
        let rates = coded_rates(&[(0, 1.0), (1, 0.0)]);
        let doc = ReportDocument::build(&input(&m, &rates));
        let text = paragraphs(&doc);

        let di = text.iter().find(|p| p.starts_with("Disparate Impact is")).unwrap();
        assert!(di.contains("severe bias"));
        let eod = text.iter().find(|p| p.starts_with("Equal Opportunity Difference is")).unwrap();
        assert!(eod.contains("severe bias"));
        assert!(text.iter().any(|p| p.contains("gap of 1.00") && p.contains("substantial")));
    }

    #[test]
    fn test_threshold_branches() {
        let rates = coded_rates(&[(0, 0.5), (1, 0.45)]);

        let m = metrics(0.9, 0.05, 0.1, 0.9);
        let text = paragraphs(&ReportDocument::build(&input(&m, &rates)));
        assert!(text.iter().any(|p| p.contains("within the fairness threshold")));
        assert!(text.iter().any(|p| p.contains("within the acceptable range")));
        assert!(text.iter().any(|p| p.contains("indicates minor bias")));

        let m = metrics(0.9, 0.3, 0.35, 0.6);
        let text = paragraphs(&ReportDocument::build(&input(&m, &rates)));
        assert!(text.iter().any(|p| p.contains("outside the fairness threshold [0.8, 1.25]")));
        assert!(text.iter().any(|p| p.contains("exceeds the tolerance")));
    }

    #[test]
    fn test_section_order() {
        let m = metrics(0.9, 0.1, 0.1, 0.9);
        let rates = coded_rates(&[(0, 0.5), (1, 0.4)]);
        let md = ReportDocument::build(&input(&m, &rates)).to_markdown();

        let pos = |s: &str| md.find(s).unwrap_or_else(|| panic!("missing {}", s));
        assert!(pos("# BiasGuard") < pos("## Model Overview"));
        assert!(pos("## Model Overview") < pos("## Fairness Metrics"));
        assert!(pos("Accuracy: 0.9000") < pos("## Selection Rates by sex"));
        assert!(pos("| sex Group | Selection Rate |") < pos("## Interpretation"));
        assert!(pos("## Interpretation") < pos("## Fairness Summary"));
        assert!(!md.contains("Selection Rates Chart"));
    }

    #[test]
    fn test_missing_chart_is_omitted() {
        let m = metrics(0.9, 0.1, 0.1, 0.9);
        let rates = coded_rates(&[(0, 0.5), (1, 0.4)]);
        let missing = Path::new("/nonexistent/chart.png");
        let doc = ReportDocument::build(&ReportInput { chart_path: Some(missing), ..input(&m, &rates) });
        assert!(!doc.has_chart());
    }

    #[test]
    fn test_empty_rates_summary() {
        let m = metrics(0.9, 0.0, 0.0, 0.0);
        let rates = GroupRates::default();
        let text = paragraphs(&ReportDocument::build(&input(&m, &rates)));
        assert!(text.iter().any(|p| p.starts_with("Fairness summary could not be computed")));
    }

    #[test]
    fn test_wrap_items() {
        let items: Vec<String> = (0..30).map(|i| format!("{} = group{}", i, i)).collect();
        let lines = wrap_items(&items, 40);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= 40));
        assert_eq!(lines.join(", ").split(", ").count(), 30);
    }

    #[test]
    fn test_render_pdf_without_chart() {
        let fonts = FontConfig::default();
        if fonts.locate().is_none() {
            eprintln!("skipping: {}", fonts.missing_message());
            return;
        }

        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("report.pdf");
        let m = metrics(0.7, 1.0, 1.0, 0.0);
        let rates = coded_rates(&[(0, 1.0), (1, 0.0)]);
        let missing = tmp.path().join("chart.png");

        let path = render_report(&ReportInput { chart_path: Some(missing.as_path()), ..input(&m, &rates) }, &out, &fonts).unwrap();
        assert_eq!(path, out);
        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_render_pdf_reports_missing_fonts() {
        let tmp = TempDir::new().unwrap();
        let fonts = FontConfig {
            families: vec!["NoSuchFamily".to_string()],
            dirs: vec![tmp.path().to_path_buf()],
        };
        let m = metrics(0.7, 0.1, 0.1, 0.9);
        let rates = coded_rates(&[(0, 0.5), (1, 0.4)]);
        let out = tmp.path().join("report.pdf");

        let err = render_report(&input(&m, &rates), &out, &fonts).unwrap_err();
        assert!(matches!(err, BiasError::Render(_)));
        assert!(err.to_string().contains("NoSuchFamily"));
        assert!(!out.exists());
    }

    #[test]
    fn test_render_pdf_unwritable_path() {
        let fonts = FontConfig::default();
        if fonts.locate().is_none() {
            return;
        }
        let m = metrics(0.7, 0.1, 0.1, 0.9);
        let rates = coded_rates(&[(0, 0.5), (1, 0.4)]);
        let out = Path::new("/nonexistent/dir/report.pdf");
        let err = render_report(&input(&m, &rates), out, &fonts).unwrap_err();
        assert!(matches!(err, BiasError::Render(_)));
    }
}
