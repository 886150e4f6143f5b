//! Display formatting attached to a sheet.
//!
//! Formatting never changes data. It feeds the Excel export and the styler
//! blocks at the end of the generated script. Field names follow the JSON the
//! front-end sends (`backgroundColor`, `columnIDs`).

use crate::column_headers::ColumnId;
use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Font and fill colour, as `#rrggbb`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        default,
        rename = "backgroundColor",
        skip_serializing_if = "Option::is_none"
    )]
    pub background_color: Option<String>,
}

impl ColorFormat {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.background_color.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub even: Option<ColorFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odd: Option<ColorFormat>,
}

impl RowsFormat {
    pub fn is_empty(&self) -> bool {
        self.even.as_ref().is_none_or(ColorFormat::is_empty)
            && self.odd.as_ref().is_none_or(ColorFormat::is_empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberFormatType {
    #[serde(rename = "plain text")]
    PlainText,
    #[serde(rename = "currency")]
    Currency,
    #[serde(rename = "accounting")]
    Accounting,
    #[serde(rename = "percentage")]
    Percentage,
    #[serde(rename = "scientific notation")]
    ScientificNotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    #[serde(rename = "type")]
    pub kind: NumberFormatType,
    #[serde(default)]
    pub precision: Option<u32>,
}

impl NumberFormat {
    /// Excel number format string, e.g. `$0.00` or `0.0E+0`.
    pub fn excel_format(&self) -> String {
        let precision = self.precision.unwrap_or(match self.kind {
            NumberFormatType::PlainText => 0,
            _ => 2,
        }) as usize;
        let digits = if precision == 0 {
            "0".to_owned()
        } else {
            format!("0.{}", "0".repeat(precision))
        };
        match self.kind {
            NumberFormatType::PlainText => digits,
            NumberFormatType::Currency => format!("${digits}"),
            NumberFormatType::Accounting => format!("(${digits})"),
            NumberFormatType::Percentage => format!("{digits}%"),
            NumberFormatType::ScientificNotation => format!("{digits}E+0"),
        }
    }

    /// Python format spec used by the styler, e.g. `${:,.2f}`.
    pub fn styler_format(&self) -> String {
        let precision = self.precision.unwrap_or(match self.kind {
            NumberFormatType::PlainText => 0,
            _ => 2,
        });
        match self.kind {
            NumberFormatType::PlainText => format!("{{:.{precision}f}}"),
            NumberFormatType::Currency => format!("${{:,.{precision}f}}"),
            NumberFormatType::Accounting => format!("(${{:,.{precision}f}})"),
            NumberFormatType::Percentage => format!("{{:.{precision}%}}"),
            NumberFormatType::ScientificNotation => format!("{{:.{precision}E}}"),
        }
    }
}

/// Highlight cells of some columns that match all of `filters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalFormat {
    #[serde(default)]
    pub format_uuid: String,
    #[serde(rename = "columnIDs")]
    pub column_ids: Vec<ColumnId>,
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(
        default,
        rename = "backgroundColor",
        skip_serializing_if = "Option::is_none"
    )]
    pub background_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataframeFormat {
    #[serde(default)]
    pub headers: ColorFormat,
    #[serde(default)]
    pub columns: BTreeMap<ColumnId, NumberFormat>,
    #[serde(default)]
    pub rows: RowsFormat,
    /// Kept for the front-end; not exported.
    #[serde(default)]
    pub border: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub conditional_formats: Vec<ConditionalFormat>,
}

impl DataframeFormat {
    /// Header or row colours are set.
    pub fn has_table_styles(&self) -> bool {
        !self.headers.is_empty() || !self.rows.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_table_styles() && self.columns.is_empty() && self.conditional_formats.is_empty()
    }
}
