//! Per-leaf heatmap columns: an identifier-first table min-max scaled into
//! `[0, 1]` per column, and the gradients used to color the scaled values.

use crate::color::Color;
use crate::error::{EngineError, ErrorCode};
use crate::table::{RawTable, is_na};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Presence/absence notations and the numbers they stand for.
pub const SYMBOL_VALUES: &[(&str, f64)] = &[("+", 1.0), ("-", 0.0), ("Y", 1.0), ("N", 0.0)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeatmapCell {
    Number(f64),
    Symbol(String),
    Missing,
}

impl HeatmapCell {
    pub fn from_cell(raw: &str) -> Self {
        let raw = raw.trim();
        if is_na(raw) {
            return Self::Missing;
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Number(v),
            Ok(v) if v.is_nan() => Self::Missing,
            // `inf`, `1e999`: kept as text so normalization rejects them
            _ => Self::Symbol(raw.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Numeric form; `None` for missing cells, unknown symbols and
    /// non-finite numbers.
    pub fn resolve(&self) -> Option<f64> {
        match self {
            Self::Number(v) => v.is_finite().then_some(*v),
            Self::Symbol(s) => SYMBOL_VALUES
                .iter()
                .find(|(sym, _)| sym == s)
                .map(|(_, v)| *v),
            Self::Missing => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatmapTable {
    pub columns: Vec<String>,
    pub rows: Vec<(String, Vec<HeatmapCell>)>,
}

impl HeatmapTable {
    /// Reads a CSV file, or the first worksheet of a spreadsheet workbook.
    pub fn from_path(path: &str) -> Result<Self, EngineError> {
        Ok(Self::from_raw(RawTable::from_path(path, "heatmap table")?))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EngineError> {
        Ok(Self::from_raw(RawTable::from_reader(reader)?))
    }

    fn from_raw(raw: RawTable) -> Self {
        Self {
            columns: raw.header[1..].iter().map(|h| h.trim().to_string()).collect(),
            rows: raw
                .rows
                .iter()
                .map(|cells| {
                    (
                        cells[0].trim().to_string(),
                        cells[1..].iter().map(|c| HeatmapCell::from_cell(c)).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapRow {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub columns: Vec<String>,
    pub rows: Vec<HeatmapRow>,
}

impl Heatmap {
    pub fn row(&self, name: &str) -> Option<&HeatmapRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Scales every column of `table` into `[0, 1]`.
///
/// Fails without a partial result when any cell is missing or holds a symbol
/// other than those in [`SYMBOL_VALUES`]. Constant columns scale to `0`.
pub fn normalize(table: &HeatmapTable) -> Result<Heatmap, EngineError> {
    if table.rows.is_empty() {
        return Err(EngineError::invalid_input("Heatmap table has no rows"));
    }
    if table.columns.is_empty() {
        return Err(EngineError::invalid_input("Heatmap table has no value columns"));
    }
    let width = table.columns.len();
    if let Some((name, cells)) = table.rows.iter().find(|(_, cells)| cells.len() != width) {
        return Err(EngineError::invalid_input(format!(
            "Heatmap row '{name}' has {} values but the table has {width} columns",
            cells.len()
        )));
    }
    if let Some((name, _)) = table
        .rows
        .iter()
        .find(|(_, cells)| cells.iter().any(HeatmapCell::is_missing))
    {
        return Err(EngineError::new(
            ErrorCode::MissingData,
            format!("Heatmap table has missing data (first in row '{name}'); fix the table and upload again"),
        ));
    }

    let mut resolved: Vec<Vec<f64>> = Vec::with_capacity(table.rows.len());
    for (name, cells) in &table.rows {
        let values = cells
            .iter()
            .enumerate()
            .map(|(col, cell)| {
                cell.resolve().ok_or_else(|| {
                    EngineError::invalid_input(format!(
                        "Heatmap value {cell:?} in row '{name}', column '{}' is not numeric",
                        table.columns[col]
                    ))
                })
            })
            .collect::<Result<Vec<f64>, EngineError>>()?;
        resolved.push(values);
    }

    let mut mins = vec![f64::INFINITY; width];
    let mut maxs = vec![f64::NEG_INFINITY; width];
    for values in &resolved {
        for (col, &v) in values.iter().enumerate() {
            mins[col] = mins[col].min(v);
            maxs[col] = maxs[col].max(v);
        }
    }
    let ranges: Vec<f64> = mins
        .iter()
        .zip(&maxs)
        .map(|(lo, hi)| if hi - lo == 0.0 { 1.0 } else { hi - lo })
        .collect();

    let mut scaled: Vec<Vec<f64>> = resolved
        .iter()
        .map(|values| {
            values
                .iter()
                .enumerate()
                .map(|(col, v)| (v - mins[col]) / ranges[col])
                .collect()
        })
        .collect();

    // A fully saturated table carries no contrast; show it as empty instead.
    if scaled.iter().flatten().all(|&v| v == 1.0) {
        scaled.iter_mut().flatten().for_each(|v| *v = 0.0);
    }

    Ok(Heatmap {
        columns: table.columns.clone(),
        rows: table
            .rows
            .iter()
            .zip(scaled)
            .map(|((name, _), values)| HeatmapRow {
                name: name.clone(),
                values,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Palette {
    Grayscale,
    /// Offered to users as "blue-red".
    RedGreen,
    #[default]
    OrangeRed,
}

impl Palette {
    pub fn parse(text: &str) -> Option<Self> {
        let norm = text.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match norm.as_str() {
            "grayscale" | "greyscale" | "gray" | "grey" => Some(Self::Grayscale),
            "blue-red" | "red-blue" | "red-green" | "redgreen" | "bluered" => Some(Self::RedGreen),
            "orange-red" | "orangered" | "red-orange-yellow" | "default" => Some(Self::OrangeRed),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Grayscale => "Grayscale",
            Self::RedGreen => "Blue-Red",
            Self::OrangeRed => "Red-Orange-Yellow",
        }
    }
}

fn channel(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn color_for(value: f64, palette: Palette) -> Color {
    let value = value.clamp(0.0, 1.0);
    match palette {
        Palette::Grayscale => {
            let gray = channel(1.0 - value);
            Color::from_rgb(gray, gray, gray)
        }
        Palette::RedGreen => Color::from_rgb(channel(value), 0, channel(1.0 - value)),
        Palette::OrangeRed => Color::from_rgb(255, channel(1.0 - value), 0),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapSettings {
    pub palette: Palette,
    pub show_labels: bool,
    pub value_only: bool,
    pub active: bool,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            palette: Palette::default(),
            show_labels: true,
            value_only: false,
            active: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapFace {
    pub column: String,
    pub value: f64,
    pub color: Color,
    pub text: Option<String>,
}

pub fn faces_for(row: &HeatmapRow, columns: &[String], settings: &HeatmapSettings) -> Vec<HeatmapFace> {
    row.values
        .iter()
        .zip(columns)
        .map(|(&value, column)| HeatmapFace {
            column: column.clone(),
            value,
            color: color_for(value, settings.palette),
            text: settings.value_only.then(|| format!("{value:.2}")),
        })
        .collect()
}
