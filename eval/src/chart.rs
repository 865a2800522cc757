// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Selection-rate bar chart
//!
//! Rendered to PNG with the plotters bitmap backend. Text goes through
//! ab_glyph, so a TrueType font from [`FontConfig`] is registered with
//! plotters before drawing. Registration is redone whenever a config resolves
//! to different font files than the ones currently registered.

use crate::error::{BiasError, Result};
use crate::metrics::selection_rates;
use plotters::prelude::*;
use plotters::style::register_font;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CHART_SIZE: (u32, u32) = (800, 500);
const FONT_NAME: &str = "sans-serif";

/// Where to find a TrueType family for the chart and the PDF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// File prefixes tried in order, e.g. `LiberationSans` for `LiberationSans-Regular.ttf`
    #[serde(alias = "family", deserialize_with = "one_or_many")]
    pub families: Vec<String>,
    /// Directories searched in order for each family
    pub dirs: Vec<PathBuf>,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            families: ["LiberationSans", "DejaVuSans", "Arial"].iter().map(|f| f.to_string()).collect(),
            dirs: [
                "fonts",
                "/usr/share/fonts/truetype/liberation",
                "/usr/share/fonts/truetype/liberation2",
                "/usr/share/fonts/liberation-sans",
                "/usr/share/fonts/liberation",
                "/usr/share/fonts/truetype/dejavu",
                "/usr/share/fonts/dejavu",
                "/usr/share/fonts/TTF",
                "/Library/Fonts",
                "/System/Library/Fonts/Supplemental",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(family) => vec![family],
        OneOrMany::Many(families) => families,
    })
}

/// Face files of one family; missing styled faces fall back to the regular one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFonts {
    pub family: String,
    pub regular: PathBuf,
    pub bold: PathBuf,
    pub italic: PathBuf,
    pub bold_italic: PathBuf,
}

impl FontConfig {
    /// First family with a regular face, trying every directory per family
    pub fn locate(&self) -> Option<ResolvedFonts> {
        self.families
            .iter()
            .find_map(|family| self.dirs.iter().find_map(|dir| resolve_family(dir, family)))
    }

    /// Error message for a failed [`FontConfig::locate`]
    pub fn missing_message(&self) -> String {
        format!("no font family of {:?} found in {:?}", self.families, self.dirs)
    }
}

fn find_face(dir: &Path, family: &str, suffixes: &[&str]) -> Option<PathBuf> {
    suffixes
        .iter()
        .map(|suffix| dir.join(format!("{}{}.ttf", family, suffix)))
        .find(|path| path.is_file())
}

fn resolve_family(dir: &Path, family: &str) -> Option<ResolvedFonts> {
    let regular = find_face(dir, family, &["-Regular", ""])?;
    let bold = find_face(dir, family, &["-Bold", " Bold"]).unwrap_or_else(|| regular.clone());
    let italic = find_face(dir, family, &["-Italic", "-Oblique", " Italic"]).unwrap_or_else(|| regular.clone());
    let bold_italic = find_face(dir, family, &["-BoldItalic", "-BoldOblique", " Bold Italic"])
        .unwrap_or_else(|| bold.clone());

    Some(ResolvedFonts {
        family: family.to_string(),
        regular,
        bold,
        italic,
        bold_italic,
    })
}

/// Regular face currently registered with plotters; failures are never recorded
static REGISTERED: Mutex<Option<PathBuf>> = Mutex::new(None);

fn ensure_fonts(fonts: &FontConfig) -> Result<()> {
    let resolved = fonts.locate().ok_or_else(|| BiasError::render(fonts.missing_message()))?;

    let mut registered = REGISTERED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if registered.as_deref() == Some(resolved.regular.as_path()) {
        return Ok(());
    }

    register_fonts(&resolved).map_err(BiasError::Render)?;
    *registered = Some(resolved.regular);
    Ok(())
}

fn register_fonts(fonts: &ResolvedFonts) -> std::result::Result<(), String> {
    let load = |path: &Path| -> std::result::Result<&'static [u8], String> {
        let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(Box::leak(bytes.into_boxed_slice()))
    };

    let regular = load(&fonts.regular)?;
    let bold = if fonts.bold == fonts.regular { regular } else { load(&fonts.bold)? };

    register_font(FONT_NAME, FontStyle::Normal, regular)
        .map_err(|_| format!("invalid font file {}", fonts.regular.display()))?;
    register_font(FONT_NAME, FontStyle::Bold, bold)
        .map_err(|_| format!("invalid font file {}", fonts.bold.display()))?;

    tracing::debug!("Registered chart font {} from {}", fonts.family, fonts.regular.display());
    Ok(())
}

fn draw_err<E: std::fmt::Display>(e: E) -> BiasError {
    BiasError::render(format!("chart drawing failed: {}", e))
}

/// One bar of the chart
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBar {
    pub code: usize,
    pub label: String,
    pub rate: f64,
}

/// Per-group positive-prediction rates, ordered by group code
#[derive(Debug, Clone)]
pub struct SelectionChart {
    bars: Vec<GroupBar>,
}

impl SelectionChart {
    /// Group predictions by sensitive code; codes missing from `labels` are stringified
    pub fn from_predictions(predictions: &[u8], groups: &[usize], labels: Option<&BTreeMap<usize, String>>) -> Self {
        let bars = selection_rates(predictions, groups)
            .into_iter()
            .map(|(code, rate)| GroupBar {
                code,
                label: labels
                    .and_then(|l| l.get(&code).cloned())
                    .unwrap_or_else(|| code.to_string()),
                rate,
            })
            .collect();
        Self { bars }
    }

    pub fn bars(&self) -> &[GroupBar] {
        &self.bars
    }

    /// Draw the chart as PNG at `path`, via a temporary sibling file
    pub fn render(&self, path: &Path, fonts: &FontConfig) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(BiasError::render(format!("output directory {} does not exist", parent.display())));
            }
        }
        ensure_fonts(fonts)?;

        let tmp = path.with_file_name(format!(".chart-{}.png", uuid::Uuid::new_v4().simple()));
        if let Err(e) = self.draw(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            BiasError::render(format!("could not write chart to {}: {}", path.display(), e))
        })?;

        tracing::info!("Chart saved to {}", path.display());
        Ok(path.to_path_buf())
    }

    fn draw(&self, path: &Path) -> Result<()> {
        let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let n = self.bars.len().max(1);
        let mut chart = ChartBuilder::on(&root)
            .caption("Selection Rates by Group", (FONT_NAME, 24).into_font().style(FontStyle::Bold))
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d((0..n).into_segmented(), 0f64..1f64)
            .map_err(draw_err)?;

        let labels: Vec<&str> = self.bars.iter().map(|b| b.label.as_str()).collect();
        chart
            .configure_mesh()
            .disable_x_mesh()
            .bold_line_style(&BLACK.mix(0.15))
            .light_line_style(&TRANSPARENT)
            .y_labels(11)
            .y_desc("Selection Rate")
            .x_desc("Group")
            .x_label_formatter(&|v: &SegmentValue<usize>| match v {
                SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => labels.get(*i).map(|s| s.to_string()).unwrap_or_default(),
                SegmentValue::Last => String::new(),
            })
            .label_style((FONT_NAME, 14).into_font())
            .draw()
            .map_err(draw_err)?;

        chart
            .draw_series(self.bars.iter().enumerate().map(|(i, bar)| {
                let mut rect = Rectangle::new(
                    [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), bar.rate.clamp(0.0, 1.0))],
                    RGBColor(70, 130, 180).filled(),
                );
                rect.set_margin(0, 0, 20, 20);
                rect
            }))
            .map_err(draw_err)?;

        // Value labels above each bar, tucked inside when the bar reaches the top
        chart
            .draw_series(self.bars.iter().enumerate().map(|(i, bar)| {
                let (y, vpos) = if bar.rate > 0.92 {
                    (bar.rate - 0.01, VPos::Top)
                } else {
                    (bar.rate + 0.01, VPos::Bottom)
                };
                Text::new(
                    format!("{:.2}", bar.rate),
                    (SegmentValue::CenterOf(i), y),
                    TextStyle::from((FONT_NAME, 16).into_font()).pos(Pos::new(HPos::Center, vpos)),
                )
            }))
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
        Ok(())
    }
}

/// Build and render the chart in one step
pub fn render_selection_chart(
    predictions: &[u8],
    groups: &[usize],
    labels: Option<&BTreeMap<usize, String>>,
    path: &Path,
    fonts: &FontConfig,
) -> Result<PathBuf> {
    SelectionChart::from_predictions(predictions, groups, labels).render(path, fonts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bars_sorted_by_code_with_labels() {
        let labels: BTreeMap<usize, String> =
            [(0, "Female".to_string()), (1, "Male".to_string())].into_iter().collect();
        let chart = SelectionChart::from_predictions(&[1, 0, 1, 1], &[1, 0, 0, 1], Some(&labels));

        let bars = chart.bars();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], GroupBar { code: 0, label: "Female".to_string(), rate: 0.5 });
        assert_eq!(bars[1], GroupBar { code: 1, label: "Male".to_string(), rate: 1.0 });
    }

    #[test]
    fn test_labels_fall_back_to_code() {
        let labels: BTreeMap<usize, String> = [(0, "A".to_string())].into_iter().collect();
        let chart = SelectionChart::from_predictions(&[0, 1, 1], &[2, 0, 2], Some(&labels));
        let names: Vec<_> = chart.bars().iter().map(|b| b.label.as_str()).collect();
        assert_eq!(names, vec!["A", "2"]);

        let chart = SelectionChart::from_predictions(&[0, 1], &[0, 1], None);
        let names: Vec<_> = chart.bars().iter().map(|b| b.label.as_str()).collect();
        assert_eq!(names, vec!["0", "1"]);
    }

    #[test]
    fn test_font_lookup() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Custom-Regular.ttf"), b"").unwrap();
        std::fs::write(tmp.path().join("Custom-Bold.ttf"), b"").unwrap();

        let fonts = FontConfig {
            families: vec!["Custom".to_string()],
            dirs: vec![tmp.path().join("missing"), tmp.path().to_path_buf()],
        };
        let resolved = fonts.locate().unwrap();
        assert_eq!(resolved.regular, tmp.path().join("Custom-Regular.ttf"));
        assert_eq!(resolved.bold, tmp.path().join("Custom-Bold.ttf"));
        // absent styled faces reuse what exists
        assert_eq!(resolved.italic, resolved.regular);
        assert_eq!(resolved.bold_italic, resolved.bold);

        let fonts = FontConfig { families: vec!["Other".to_string()], ..fonts };
        assert_eq!(fonts.locate(), None);
    }

    #[test]
    fn test_font_families_tried_in_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("DejaVuSans.ttf"), b"").unwrap();
        std::fs::write(tmp.path().join("DejaVuSans-Oblique.ttf"), b"").unwrap();

        let fonts = FontConfig {
            families: vec!["LiberationSans".to_string(), "DejaVuSans".to_string()],
            dirs: vec![tmp.path().to_path_buf()],
        };
        let resolved = fonts.locate().unwrap();
        assert_eq!(resolved.family, "DejaVuSans");
        assert_eq!(resolved.regular, tmp.path().join("DejaVuSans.ttf"));
        assert_eq!(resolved.italic, tmp.path().join("DejaVuSans-Oblique.ttf"));
    }

    #[test]
    fn test_font_config_accepts_single_family() {
        let fonts: FontConfig = toml::from_str("family = \"Custom\"\ndirs = [\"f\"]").unwrap();
        assert_eq!(fonts.families, vec!["Custom".to_string()]);

        let fonts: FontConfig = toml::from_str("families = [\"A\", \"B\"]").unwrap();
        assert_eq!(fonts.families.len(), 2);
        assert_eq!(fonts.dirs, FontConfig::default().dirs);
    }

    #[test]
    fn test_font_failure_is_not_sticky() {
        let tmp = TempDir::new().unwrap();
        let missing = FontConfig {
            families: vec!["Broken".to_string()],
            dirs: vec![tmp.path().join("nowhere")],
        };
        let err = ensure_fonts(&missing).unwrap_err();
        assert!(err.to_string().contains("no font family"));

        // A later config is resolved afresh instead of replaying the first error
        std::fs::write(tmp.path().join("Broken-Regular.ttf"), b"not a font").unwrap();
        let corrected = FontConfig { dirs: vec![tmp.path().to_path_buf()], ..missing };
        let err = ensure_fonts(&corrected).unwrap_err();
        assert!(err.to_string().contains("invalid font file"));
    }

    #[test]
    fn test_render_into_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope").join("chart.png");
        let chart = SelectionChart::from_predictions(&[1, 0], &[0, 1], None);

        let err = chart.render(&path, &FontConfig::default()).unwrap_err();
        assert!(matches!(err, BiasError::Render(_)));
        assert!(err.to_string().contains("does not exist"));
        assert!(!path.exists());
    }

    #[test]
    fn test_render_png() {
        let fonts = FontConfig::default();
        if fonts.locate().is_none() {
            eprintln!("skipping: {}", fonts.missing_message());
            return;
        }

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chart.png");
        let out = render_selection_chart(&[1, 1, 0, 0, 1], &[0, 0, 1, 1, 1], None, &path, &fonts).unwrap();

        assert_eq!(out, path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
        // No temporary file left behind
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}
