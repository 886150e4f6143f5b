//! Excel export.
//!
//! Formatting is computed once into a [`SheetFormatting`] plan. The writer
//! applies the plan with `rust_xlsxwriter`, and the generated script renders
//! the same information as an `add_formatting_to_excel_sheet(...)` call, so
//! the file written during the session and the one the script writes agree.

use crate::code_chunks::python::{py_number, py_str, py_str_list, py_value};
use crate::error::{Result, SheetError};
use crate::filter::{self, Condition, Filter};
use crate::state::{ColorFormat, Sheet};
use chrono::Datelike;
use polars::prelude::*;
use rust_xlsxwriter::{Color, ConditionalFormatFormula, Format, FormatPattern, Workbook, Worksheet};
use std::path::Path;

/// Longest sheet name Excel accepts.
pub const MAX_SHEET_NAME_LEN: usize = 31;

const INVALID_SHEET_NAME_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Days between Excel's epoch (1899-12-30) and the Unix epoch.
const EXCEL_UNIX_EPOCH_DAYS: f64 = 25569.0;

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Excel tab names for `df_names`, in order: invalid characters and spaces
/// become `_`, names are cut to 31 characters, and collisions get `_1`, `_2`, ...
pub fn sheet_names<S: AsRef<str>>(df_names: &[S]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(df_names.len());
    for df_name in df_names {
        let cleaned: String = df_name
            .as_ref()
            .chars()
            .map(|c| {
                if INVALID_SHEET_NAME_CHARS.contains(&c) || c.is_whitespace() {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        let base = if cleaned.is_empty() {
            "Sheet".to_owned()
        } else {
            truncate(&cleaned, MAX_SHEET_NAME_LEN)
        };
        let taken = |candidate: &str| names.iter().any(|n| n.eq_ignore_ascii_case(candidate));
        let name = if taken(&base) {
            (1..)
                .map(|n| {
                    let suffix = format!("_{n}");
                    let keep = MAX_SHEET_NAME_LEN - suffix.len();
                    format!("{}{suffix}", truncate(&base, keep))
                })
                .find(|candidate| !taken(candidate))
                .unwrap_or(base)
        } else {
            base
        };
        names.push(name);
    }
    names
}

/// Spreadsheet column letters for a 0-based index: 0 is `A`, 26 is `AA`.
pub fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Colours of one named cell style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStyle {
    pub name: String,
    pub font_color: Option<String>,
    pub background_color: Option<String>,
}

impl NamedStyle {
    fn from_colors(name: String, colors: &ColorFormat) -> Option<Self> {
        (!colors.is_empty()).then(|| Self {
            name,
            font_color: colors.color.clone(),
            background_color: colors.background_color.clone(),
        })
    }
}

/// One conditional-format rule over a column's data cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalRule {
    /// e.g. `A2:A5`
    pub range: String,
    pub column: usize,
    /// Formula relative to the range's top-left cell, without a leading `=`.
    pub formula: String,
    pub font_color: Option<String>,
    pub background_color: Option<String>,
}

/// Everything the writer does to one sheet beyond writing values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetFormatting {
    /// Applied to row 1.
    pub header: Option<NamedStyle>,
    /// Applied to rows 2, 4, ...
    pub even: Option<NamedStyle>,
    /// Applied to rows 3, 5, ...
    pub odd: Option<NamedStyle>,
    /// `(column index, Excel number format)`
    pub number_formats: Vec<(usize, String)>,
    pub conditional_rules: Vec<ConditionalRule>,
}

fn excel_text(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Excel formula for one filter on `cell`, or `None` when the filter cannot
/// apply to `dtype`.
fn rule_formula(cell: &str, dtype: &DataType, filter: &Filter) -> Option<String> {
    use Condition::*;
    if !filter.condition.applies_to(dtype) {
        return None;
    }
    let number = || filter::number_value(filter).ok().map(py_number);
    let text = excel_text(&filter::string_value(filter));
    let date = || {
        filter::datetime_value(filter).ok().map(|dt| {
            let date = format!("DATE({},{},{})", dt.year(), dt.month(), dt.day());
            if matches!(dtype, DataType::String) {
                (format!("DATEVALUE({cell})"), date)
            } else {
                (cell.to_owned(), date)
            }
        })
    };
    let compare = |op: &str| number().map(|n| format!("{cell}{op}{n}"));
    let compare_date = |op: &str| date().map(|(lhs, rhs)| format!("{lhs}{op}{rhs}"));
    match filter.condition {
        Greater => compare(">"),
        GreaterThanOrEqual => compare(">="),
        Less => compare("<"),
        LessThanOrEqual => compare("<="),
        NumberExactly => compare("="),
        NumberNotExactly => compare("<>"),
        Contains => Some(format!("NOT(ISERROR(FIND({text},{cell})))")),
        StringContainsCaseInsensitive => Some(format!("NOT(ISERROR(SEARCH({text},{cell})))")),
        StringDoesNotContain => Some(format!("ISERROR(SEARCH({text},{cell}))")),
        StringStartsWith => Some(format!("LEFT({cell},LEN({text}))={text}")),
        StringEndsWith => Some(format!("RIGHT({cell},LEN({text}))={text}")),
        StringExactly => Some(format!("EXACT({cell},{text})")),
        StringNotExactly => Some(format!("NOT(EXACT({cell},{text}))")),
        BooleanIsTrue => Some(format!("{cell}=TRUE")),
        BooleanIsFalse => Some(format!("{cell}=FALSE")),
        Empty => Some(format!("LEN(TRIM({cell}))=0")),
        NotEmpty => Some(format!("LEN(TRIM({cell}))>0")),
        DatetimeGreater => compare_date(">"),
        DatetimeGreaterThanOrEqual => compare_date(">="),
        DatetimeLess => compare_date("<"),
        DatetimeLessThanOrEqual => compare_date("<="),
        DatetimeExactly => compare_date("="),
        DatetimeNotExactly => compare_date("<>"),
    }
}

/// Formatting plan for `sheet` written under the tab `sheet_name`.
pub fn plan(sheet_name: &str, sheet: &Sheet) -> Result<SheetFormatting> {
    let format = &sheet.format;
    let rows = &format.rows;
    let mut planned = SheetFormatting {
        header: NamedStyle::from_colors(format!("{sheet_name}_Header"), &format.headers),
        ..SheetFormatting::default()
    };
    if !rows.is_empty() {
        let empty = ColorFormat::default();
        planned.even = NamedStyle::from_colors(
            format!("{sheet_name}_Even"),
            rows.even.as_ref().unwrap_or(&empty),
        );
        planned.odd = NamedStyle::from_colors(
            format!("{sheet_name}_Odd"),
            rows.odd.as_ref().unwrap_or(&empty),
        );
    }

    for (index, id) in sheet.column_ids().iter().enumerate() {
        if let Some(number_format) = format.columns.get(id)
            && sheet.dtype(id)?.is_primitive_numeric()
        {
            planned
                .number_formats
                .push((index, number_format.excel_format()));
        }
    }

    let height = sheet.data.height();
    if height == 0 {
        return Ok(planned);
    }
    for conditional in &format.conditional_formats {
        if conditional.color.is_none() && conditional.background_color.is_none() {
            continue;
        }
        for filter in &conditional.filters {
            for id in &conditional.column_ids {
                let Ok(index) = sheet.column_index(id) else {
                    continue;
                };
                let letter = column_letter(index);
                let cell = format!("{letter}2");
                let Some(formula) = rule_formula(&cell, &sheet.dtype(id)?, filter) else {
                    continue;
                };
                planned.conditional_rules.push(ConditionalRule {
                    range: format!("{letter}2:{letter}{}", height + 1),
                    column: index,
                    formula,
                    font_color: conditional.color.clone(),
                    background_color: conditional.background_color.clone(),
                });
            }
        }
    }
    Ok(planned)
}

fn dq(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The `add_formatting_to_excel_sheet(...)` statement for one sheet, or
/// `None` when the sheet has no formatting.
pub fn formatting_code(sheet_name: &str, df_name: &str, sheet: &Sheet) -> Result<Option<String>> {
    let format = &sheet.format;
    if format.is_empty() {
        return Ok(None);
    }
    let mut args = Vec::new();
    let mut color_arg = |name: &str, value: Option<&String>| {
        if let Some(value) = value {
            args.push(format!("{name}={}", py_str(value)));
        }
    };
    color_arg("header_background_color", format.headers.background_color.as_ref());
    color_arg("header_font_color", format.headers.color.as_ref());
    let even = format.rows.even.clone().unwrap_or_default();
    let odd = format.rows.odd.clone().unwrap_or_default();
    color_arg("even_background_color", even.background_color.as_ref());
    color_arg("even_font_color", even.color.as_ref());
    color_arg("odd_background_color", odd.background_color.as_ref());
    color_arg("odd_font_color", odd.color.as_ref());

    let mut conditionals = Vec::new();
    for conditional in &format.conditional_formats {
        let headers: Vec<&str> = conditional
            .column_ids
            .iter()
            .filter_map(|id| sheet.columns.header(id))
            .collect();
        if headers.is_empty() {
            continue;
        }
        let filters: Vec<String> = conditional
            .filters
            .iter()
            .map(|f| {
                format!(
                    "{{'condition': {}, 'value': {}}}",
                    py_str(f.condition.as_str()),
                    py_value(&f.value)
                )
            })
            .collect();
        let color = |c: &Option<String>| c.as_deref().map_or_else(|| "None".to_owned(), py_str);
        conditionals.push(format!(
            "{{'columns': {}, 'filters': [{}], 'font_color': {}, 'background_color': {}}}",
            py_str_list(&headers),
            filters.join(", "),
            color(&conditional.color),
            color(&conditional.background_color)
        ));
    }
    if !conditionals.is_empty() {
        args.push(format!(
            "conditional_formats=[\n            {}\n        ]",
            conditionals.join(", \n            ")
        ));
    }

    let mut number_formats = Vec::new();
    for id in sheet.column_ids() {
        if let Some(number_format) = format.columns.get(&id) {
            number_formats.push(format!(
                "{}: {}",
                dq(sheet.header(&id)?),
                py_str(&number_format.excel_format())
            ));
        }
    }
    if !number_formats.is_empty() {
        args.push(format!(
            "number_formats={{\n            {}\n        }}",
            number_formats.join(", \n            ")
        ));
    }

    if args.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(
        "    add_formatting_to_excel_sheet(writer, {}, {df_name}, \n        {}\n    )",
        dq(sheet_name),
        args.join(", \n        ")
    )))
}

fn parse_color(hex: &str) -> Result<Color> {
    let digits = hex.trim_start_matches('#');
    u32::from_str_radix(digits, 16)
        .map(Color::RGB)
        .map_err(|_| SheetError::invalid_params(format!("'{hex}' is not a hex colour")))
}

fn style_format(style: &NamedStyle) -> Result<Format> {
    let mut format = Format::new();
    if let Some(font) = &style.font_color {
        format = format.set_font_color(parse_color(font)?);
    }
    if let Some(background) = &style.background_color {
        format = format
            .set_background_color(parse_color(background)?)
            .set_pattern(FormatPattern::Solid);
    }
    Ok(format)
}

/// A sheet to write, under its Excel tab name.
#[derive(Debug, Clone, Copy)]
pub struct ExportSheet<'a> {
    pub tab_name: &'a str,
    pub sheet: &'a Sheet,
    pub formatting: Option<&'a SheetFormatting>,
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: AnyValue<'_>,
    format: &Format,
) -> Result<()> {
    let seconds = |v: i64, unit: &TimeUnit| match unit {
        TimeUnit::Nanoseconds => v as f64 / 1e9,
        TimeUnit::Microseconds => v as f64 / 1e6,
        TimeUnit::Milliseconds => v as f64 / 1e3,
    };
    match value {
        AnyValue::Null => {
            worksheet.write_blank(row, col, format)?;
        }
        AnyValue::Boolean(b) => {
            worksheet.write_boolean_with_format(row, col, b, format)?;
        }
        AnyValue::String(s) => {
            worksheet.write_string_with_format(row, col, s, format)?;
        }
        AnyValue::StringOwned(s) => {
            worksheet.write_string_with_format(row, col, s.as_str(), format)?;
        }
        AnyValue::Date(days) => {
            let dated = format.clone().set_num_format("yyyy-mm-dd");
            worksheet.write_number_with_format(
                row,
                col,
                f64::from(days) + EXCEL_UNIX_EPOCH_DAYS,
                &dated,
            )?;
        }
        AnyValue::Datetime(v, unit, _) => {
            let dated = format.clone().set_num_format("yyyy-mm-dd hh:mm:ss");
            let serial = seconds(v, &unit) / 86_400.0 + EXCEL_UNIX_EPOCH_DAYS;
            worksheet.write_number_with_format(row, col, serial, &dated)?;
        }
        other if other.dtype().is_primitive_numeric() => {
            let number: f64 = other.extract().unwrap_or(f64::NAN);
            worksheet.write_number_with_format(row, col, number, format)?;
        }
        other => {
            worksheet.write_string_with_format(row, col, other.to_string(), format)?;
        }
    }
    Ok(())
}

fn write_sheet(worksheet: &mut Worksheet, export: &ExportSheet<'_>) -> Result<()> {
    worksheet.set_name(export.tab_name)?;
    let planned = export.formatting.cloned().unwrap_or_default();
    let header_format = match &planned.header {
        Some(style) => style_format(style)?,
        None => Format::new(),
    };
    let even_format = match &planned.even {
        Some(style) => style_format(style)?,
        None => Format::new(),
    };
    let odd_format = match &planned.odd {
        Some(style) => style_format(style)?,
        None => Format::new(),
    };

    let data = &export.sheet.data;
    for (c, column) in data.get_columns().iter().enumerate() {
        let col = u16::try_from(c)
            .map_err(|_| SheetError::invalid_params("too many columns for Excel"))?;
        worksheet.write_string_with_format(0, col, column.name().as_str(), &header_format)?;
        let number_format = planned
            .number_formats
            .iter()
            .find(|(index, _)| *index == c)
            .map(|(_, f)| f.as_str());
        for r in 0..data.height() {
            let row = u32::try_from(r + 1)
                .map_err(|_| SheetError::invalid_params("too many rows for Excel"))?;
            let base = if row % 2 == 1 { &even_format } else { &odd_format };
            let cell_format = match number_format {
                Some(f) => base.clone().set_num_format(f),
                None => base.clone(),
            };
            write_cell(worksheet, row, col, column.get(r)?, &cell_format)?;
        }
    }

    let last_row = u32::try_from(data.height())
        .map_err(|_| SheetError::invalid_params("too many rows for Excel"))?;
    if last_row == 0 {
        return Ok(());
    }
    for rule in &planned.conditional_rules {
        let style = NamedStyle {
            name: String::new(),
            font_color: rule.font_color.clone(),
            background_color: rule.background_color.clone(),
        };
        let conditional = ConditionalFormatFormula::new()
            .set_rule(format!("={}", rule.formula).as_str())
            .set_format(style_format(&style)?);
        let col = u16::try_from(rule.column)
            .map_err(|_| SheetError::invalid_params("too many columns for Excel"))?;
        worksheet.add_conditional_format(1, col, last_row, col, &conditional)?;
    }
    Ok(())
}

/// Write `sheets` to one workbook at `path`.
pub fn write_workbook(path: &Path, sheets: &[ExportSheet<'_>]) -> Result<()> {
    let mut workbook = Workbook::new();
    for export in sheets {
        let worksheet = workbook.add_worksheet();
        write_sheet(worksheet, export)?;
    }
    workbook.save(path)?;
    Ok(())
}
