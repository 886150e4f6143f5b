//! Persisted analyses and the upgrade chain that brings old ones up to date.
//!
//! Two on-disk shapes exist. The current one keeps an ordered `steps_data`
//! list of `{step_version, step_type, params}`. The legacy one keeps a
//! `steps` object keyed by ordinal with params inlined next to the type.
//!
//! Old params name columns by header text. Those references are read as
//! [`HeaderRef`]s and turned into column ids by a [`HeaderTranslator`] that
//! follows renames and sheet creation through the log.

use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{Result, ResultExt, SheetError};
use crate::steps::{Step, StepParams, StepType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;

/// Version written into saved analyses.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Analyses older than this predate column ids entirely.
const COLUMN_ID_VERSION: &str = "0.2.0";

/// Plotly defaults the styling upgrade fills in.
const DEFAULT_TITLE_FONT_COLOR: &str = "#2a3f5f";
const DEFAULT_PAPER_BGCOLOR: &str = "#ffffff";
const DEFAULT_PLOT_BGCOLOR: &str = "#E5ECF6";

fn version_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

/// `version` is strictly older than `current`, comparing numerically.
pub fn is_prev_version(version: &str, current: &str) -> bool {
    version_parts(version) < version_parts(current)
}

/// One persisted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub step_version: u32,
    pub step_type: String,
    #[serde(default)]
    pub params: Value,
}

impl StepData {
    fn bulk_old_rename(move_to_deprecated_id_algorithm: bool) -> Self {
        let params = if move_to_deprecated_id_algorithm {
            json!({ "move_to_deprecated_id_algorithm": true })
        } else {
            json!({})
        };
        Self {
            step_version: 1,
            step_type: StepType::BulkOldRename.as_str().to_owned(),
            params,
        }
    }

    fn from_step(step: &Step) -> Result<Self> {
        Ok(Self {
            step_version: step.step_version(),
            step_type: step.step_type().as_str().to_owned(),
            params: step.params.params_value()?,
        })
    }

    fn params_mut(&mut self) -> Result<&mut Map<String, Value>> {
        let step_type = self.step_type.clone();
        self.params
            .as_object_mut()
            .ok_or_else(|| SheetError::Upgrade(format!("{step_type} params are not an object")))
    }
}

/// A saved analysis in the current format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAnalysis {
    pub version: String,
    pub steps_data: Vec<StepData>,
}

#[derive(Deserialize)]
struct RawAnalysis {
    version: String,
    #[serde(default)]
    steps_data: Option<Vec<StepData>>,
    #[serde(default)]
    steps: Option<BTreeMap<String, Map<String, Value>>>,
}

/// Legacy `steps` entries in ordinal order, params pulled out of line.
fn from_legacy_steps(steps: BTreeMap<String, Map<String, Value>>) -> Result<Vec<StepData>> {
    let mut ordered = steps
        .into_iter()
        .map(|(key, step)| {
            key.parse::<u64>()
                .map(|ordinal| (ordinal, step))
                .map_err(|_| SheetError::Upgrade(format!("step key '{key}' is not an ordinal")))
        })
        .collect::<Result<Vec<_>>>()?;
    ordered.sort_by_key(|(ordinal, _)| *ordinal);
    ordered
        .into_iter()
        .map(|(_, mut step)| {
            let step_type = step
                .remove("step_type")
                .and_then(|v| v.as_str().map(str::to_owned))
                .ok_or_else(|| SheetError::Upgrade("legacy step without a step_type".to_owned()))?;
            let step_version = step
                .remove("step_version")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(1);
            Ok(StepData {
                step_version,
                step_type,
                params: Value::Object(step),
            })
        })
        .collect()
}

impl SavedAnalysis {
    /// Analysis of the given steps, stamped with the current version.
    pub fn from_steps(steps: &[Step]) -> Result<Self> {
        Ok(Self {
            version: CURRENT_VERSION.to_owned(),
            steps_data: steps.iter().map(StepData::from_step).collect::<Result<_>>()?,
        })
    }

    /// Parse either format. Nothing is upgraded yet.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawAnalysis = serde_json::from_str(json).context("Failed to parse saved analysis")?;
        let steps_data = match (raw.steps_data, raw.steps) {
            (Some(steps_data), _) => steps_data,
            (None, Some(steps)) => from_legacy_steps(steps)?,
            (None, None) => Vec::new(),
        };
        Ok(Self {
            version: raw.version,
            steps_data,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read saved analysis {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize saved analysis")
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path.as_ref(), json).context("Failed to write saved analysis")
    }

    /// Every step is at its current schema version.
    pub fn is_current(&self) -> bool {
        self.steps_data.iter().all(|step| {
            StepType::parse(&step.step_type).is_some_and(|t| t.version() == step.step_version)
        })
    }

    /// Upgrade with no knowledge of the input sheets.
    pub fn upgrade(&self) -> Result<Self> {
        self.upgrade_for_inputs(0)
    }

    /// Upgrade every step to its current schema, for a session that starts
    /// with `input_sheets` sheets.
    ///
    /// # Errors
    ///
    /// `Upgrade` when a step type or version has no path forward, or a legacy
    /// step is missing a field its upgrade needs.
    pub fn upgrade_for_inputs(&self, input_sheets: usize) -> Result<Self> {
        let mut translator = HeaderTranslator::with_sheets(input_sheets);
        let mut upgraded = Vec::with_capacity(self.steps_data.len() + 1);
        if is_prev_version(&self.version, COLUMN_ID_VERSION) {
            upgraded.push(StepData::bulk_old_rename(true));
        }
        for step in &self.steps_data {
            for step in upgrade_step(step.clone(), &translator)? {
                translator.observe(&step)?;
                upgraded.push(step);
            }
        }
        tracing::debug!(
            from = %self.version,
            steps_in = self.steps_data.len(),
            steps_out = upgraded.len(),
            "upgraded saved analysis"
        );
        Ok(Self {
            version: CURRENT_VERSION.to_owned(),
            steps_data: upgraded,
        })
    }

    /// Typed params of an upgraded analysis, in order.
    pub fn params(&self) -> Result<Vec<StepParams>> {
        self.steps_data
            .iter()
            .map(|step| {
                let current = StepType::parse(&step.step_type)
                    .ok_or_else(|| SheetError::UnknownStep(step.step_type.clone()))?
                    .version();
                if step.step_version != current {
                    return Err(SheetError::Upgrade(format!(
                        "{} is at version {}, expected {current}",
                        step.step_type, step.step_version
                    )));
                }
                StepParams::from_parts(&step.step_type, step.params.clone())
            })
            .collect()
    }
}

/// A column named by header text, as legacy params did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRef(pub ColumnHeader);

impl HeaderRef {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self(s.clone())),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(SheetError::Upgrade(format!(
                "expected a column header, got {other}"
            ))),
        }
    }
}

/// Follows the log to map legacy header references onto column ids.
///
/// Each sheet has an override map from header to id; a header that is not
/// in it is its own id.
#[derive(Debug, Clone, Default)]
pub struct HeaderTranslator {
    sheets: Vec<BTreeMap<ColumnHeader, ColumnId>>,
}

impl HeaderTranslator {
    pub fn with_sheets(count: usize) -> Self {
        Self {
            sheets: vec![BTreeMap::new(); count],
        }
    }

    fn sheet_mut(&mut self, sheet_index: usize) -> &mut BTreeMap<ColumnHeader, ColumnId> {
        if self.sheets.len() <= sheet_index {
            self.sheets.resize_with(sheet_index + 1, BTreeMap::new);
        }
        &mut self.sheets[sheet_index]
    }

    /// Column id that `header` names in `sheet_index` at this point in the log.
    pub fn translate(&self, sheet_index: usize, header: &HeaderRef) -> ColumnId {
        self.sheets
            .get(sheet_index)
            .and_then(|map| map.get(&header.0))
            .cloned()
            .unwrap_or_else(|| ColumnId::new(header.0.clone()))
    }

    fn translate_all(&self, sheet_index: usize, headers: &[HeaderRef]) -> Vec<ColumnId> {
        headers.iter().map(|h| self.translate(sheet_index, h)).collect()
    }

    fn push_sheet(&mut self, map: BTreeMap<ColumnHeader, ColumnId>) {
        self.sheets.push(map);
    }

    /// Record what an upgraded step does to headers and sheets.
    pub fn observe(&mut self, step: &StepData) -> Result<()> {
        let Some(step_type) = StepType::parse(&step.step_type) else {
            return Ok(());
        };
        let params = &step.params;
        match step_type {
            StepType::RenameColumn => {
                let sheet_index = index_field(params, "sheet_index")?;
                let id = string_field(params, "column_id")?;
                let new_header = string_field(params, "new_column_header")?;
                self.sheet_mut(sheet_index).insert(new_header, ColumnId::new(id));
            }
            StepType::DataframeDuplicate => {
                let sheet_index = index_field(params, "sheet_index")?;
                let copy = self.sheet_mut(sheet_index).clone();
                self.push_sheet(copy);
            }
            StepType::DataframeDelete => {
                let sheet_index = index_field(params, "sheet_index")?;
                if sheet_index < self.sheets.len() {
                    self.sheets.remove(sheet_index);
                }
            }
            StepType::SimpleImport => {
                let count = params
                    .get("file_names")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                for _ in 0..count {
                    self.push_sheet(BTreeMap::new());
                }
            }
            StepType::Merge => {
                let one = index_field(params, "sheet_index_one")?;
                let two = index_field(params, "sheet_index_two")?;
                self.sheet_mut(one.max(two));
                self.push_sheet(BTreeMap::new());
            }
            StepType::Pivot => {
                match params.get("destination_sheet_index").and_then(Value::as_u64) {
                    Some(destination) => {
                        let destination = usize::try_from(destination).unwrap_or(usize::MAX);
                        self.sheet_mut(destination).clear();
                    }
                    None => {
                        let source = index_field(params, "sheet_index")?;
                        self.sheet_mut(source);
                        self.push_sheet(BTreeMap::new());
                    }
                }
            }
            StepType::BulkOldRename => {
                if params
                    .get("move_to_deprecated_id_algorithm")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    self.sheets.iter_mut().for_each(BTreeMap::clear);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn missing(field: &str) -> SheetError {
    SheetError::Upgrade(format!("legacy step is missing '{field}'"))
}

fn index_field(params: &Value, field: &str) -> Result<usize> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| missing(field))
}

fn string_field(params: &Value, field: &str) -> Result<String> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| missing(field))
}

fn take(params: &mut Map<String, Value>, field: &str) -> Result<Value> {
    params.remove(field).ok_or_else(|| missing(field))
}

fn take_header(params: &mut Map<String, Value>, field: &str) -> Result<HeaderRef> {
    HeaderRef::from_value(&take(params, field)?)
}

fn take_headers(params: &mut Map<String, Value>, field: &str) -> Result<Vec<HeaderRef>> {
    match take(params, field)? {
        Value::Array(items) => items.iter().map(HeaderRef::from_value).collect(),
        other => Err(SheetError::Upgrade(format!(
            "'{field}' should be a list of headers, got {other}"
        ))),
    }
}

fn sheet_of(params: &Map<String, Value>, field: &str) -> Result<usize> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| missing(field))
}

fn id_value(id: &ColumnId) -> Value {
    Value::String(id.as_str().to_owned())
}

fn ids_value(ids: &[ColumnId]) -> Value {
    Value::Array(ids.iter().map(id_value).collect())
}

/// Replace `header_field` with `id_field`, translated in the step's sheet.
fn header_to_id(
    params: &mut Map<String, Value>,
    translator: &HeaderTranslator,
    header_field: &str,
    id_field: &str,
) -> Result<()> {
    let sheet_index = sheet_of(params, "sheet_index")?;
    let header = take_header(params, header_field)?;
    params.insert(
        id_field.to_owned(),
        id_value(&translator.translate(sheet_index, &header)),
    );
    Ok(())
}

/// Drop the front-end-only `type` tag from filters and groups.
fn strip_filter_types(filters: &mut Value) {
    if let Some(items) = filters.as_array_mut() {
        for item in items {
            if let Some(object) = item.as_object_mut() {
                object.remove("type");
                if let Some(nested) = object.get_mut("filters") {
                    strip_filter_types(nested);
                }
            }
        }
    }
}

fn fill_defaults(target: &mut Map<String, Value>, defaults: Value) {
    let Value::Object(defaults) = defaults else {
        return;
    };
    for (key, default) in defaults {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) if default.is_object() => fill_defaults(existing, default),
            Some(_) => {}
            None => {
                target.insert(key, default);
            }
        }
    }
}

fn graph_styling_defaults() -> Value {
    json!({
        "title": {"visible": true, "title_font_color": DEFAULT_TITLE_FONT_COLOR},
        "xaxis": {
            "visible": true,
            "title_font_color": DEFAULT_TITLE_FONT_COLOR,
            "showgrid": true,
            "rangeslider": {"visible": true}
        },
        "yaxis": {"visible": true, "title_font_color": DEFAULT_TITLE_FONT_COLOR, "showgrid": true},
        "showlegend": true,
        "legend": {"orientation": "v"},
        "paper_bgcolor": DEFAULT_PAPER_BGCOLOR,
        "plot_bgcolor": DEFAULT_PLOT_BGCOLOR
    })
}

/// Wrap single aggregation names in lists.
fn aggregations_as_lists(values: Value) -> Value {
    match values {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(column, agg)| match agg {
                    Value::String(_) => (column, Value::Array(vec![agg])),
                    other => (column, other),
                })
                .collect(),
        ),
        other => other,
    }
}

/// Upgrade one step until it reaches its current version. Returns the step
/// followed by any synthetic steps its upgrade requires.
fn upgrade_step(mut step: StepData, translator: &HeaderTranslator) -> Result<Vec<StepData>> {
    let mut follow_ups = Vec::new();
    loop {
        if step.step_type == "group" {
            step = group_to_pivot(step)?;
            continue;
        }
        let step_type = StepType::parse(&step.step_type)
            .ok_or_else(|| SheetError::Upgrade(format!("unknown step type '{}'", step.step_type)))?;
        let current = step_type.version();
        if step.step_version == current {
            break;
        }
        if step.step_version > current {
            return Err(SheetError::Upgrade(format!(
                "{} version {} is newer than this build supports ({current})",
                step.step_type, step.step_version
            )));
        }
        if let Some(follow_up) = upgrade_once(step_type, &mut step, translator)? {
            follow_ups.push(follow_up);
        }
        step.step_version += 1;
    }
    let mut out = vec![step];
    out.extend(follow_ups);
    Ok(out)
}

fn group_to_pivot(mut step: StepData) -> Result<StepData> {
    let params = step.params_mut()?;
    let rows = take(params, "group_rows")?;
    let columns = params.remove("group_columns").unwrap_or_else(|| json!([]));
    params.insert("pivot_rows".to_owned(), rows);
    params.insert("pivot_columns".to_owned(), columns);
    step.step_type = StepType::Pivot.as_str().to_owned();
    step.step_version = 1;
    Ok(step)
}

/// Move `step` from its version to the next one.
fn upgrade_once(
    step_type: StepType,
    step: &mut StepData,
    translator: &HeaderTranslator,
) -> Result<Option<StepData>> {
    let version = step.step_version;
    let params = step.params_mut()?;
    match (step_type, version) {
        (StepType::AddColumn, 1) => {
            params.insert("column_header_index".to_owned(), json!(-1));
        }
        (
            StepType::ChangeColumnDtype
            | StepType::ReorderColumn
            | StepType::Sort
            | StepType::SetColumnFormula
            | StepType::DeleteColumn,
            1,
        ) => {
            header_to_id(params, translator, "column_header", "column_id")?;
        }
        (StepType::RenameColumn, 1) => {
            header_to_id(params, translator, "old_column_header", "column_id")?;
        }
        (StepType::DeleteColumn, 2) => {
            let id = take(params, "column_id")?;
            params.insert("column_ids".to_owned(), Value::Array(vec![id]));
        }
        (StepType::FilterColumn, 1..=3) => {
            if params.contains_key("column_header") {
                header_to_id(params, translator, "column_header", "column_id")?;
            }
            params.remove("has_non_empty_filter");
            if let Some(filters) = params.get_mut("filters") {
                strip_filter_types(filters);
            }
        }
        (StepType::Merge, 1) => {
            params
                .entry("how")
                .or_insert_with(|| Value::String("lookup".to_owned()));
        }
        (StepType::Merge, 2) => {
            let one = sheet_of(params, "sheet_index_one")?;
            let two = sheet_of(params, "sheet_index_two")?;
            let key_one = translator.translate(one, &take_header(params, "merge_key_one")?);
            let key_two = translator.translate(two, &take_header(params, "merge_key_two")?);
            let selected_one = translator.translate_all(one, &take_headers(params, "selected_columns_one")?);
            let selected_two = translator.translate_all(two, &take_headers(params, "selected_columns_two")?);
            params.insert("merge_key_column_id_one".to_owned(), id_value(&key_one));
            params.insert("merge_key_column_id_two".to_owned(), id_value(&key_two));
            params.insert("selected_column_ids_one".to_owned(), ids_value(&selected_one));
            params.insert("selected_column_ids_two".to_owned(), ids_value(&selected_two));
        }
        (StepType::Merge, 3) => {
            let one = take(params, "merge_key_column_id_one")?;
            let two = take(params, "merge_key_column_id_two")?;
            params.insert("merge_key_column_ids".to_owned(), json!([[one, two]]));
        }
        (StepType::Pivot, 1) => {
            let values = take(params, "values")?;
            params.insert("values".to_owned(), aggregations_as_lists(values));
        }
        (StepType::Pivot, 2 | 4) | (StepType::Graph, 2 | 3) => {}
        (StepType::Pivot, 3) => {
            let sheet_index = sheet_of(params, "sheet_index")?;
            let rows = translator.translate_all(sheet_index, &take_headers(params, "pivot_rows")?);
            let columns = translator.translate_all(sheet_index, &take_headers(params, "pivot_columns")?);
            let values = match take(params, "values")? {
                Value::Object(values) => values
                    .into_iter()
                    .map(|(header, aggs)| {
                        let id = translator.translate(sheet_index, &HeaderRef(header));
                        (id.as_str().to_owned(), aggs)
                    })
                    .collect::<Map<String, Value>>(),
                other => {
                    return Err(SheetError::Upgrade(format!(
                        "pivot values should be an object, got {other}"
                    )));
                }
            };
            params.insert("pivot_rows_column_ids".to_owned(), ids_value(&rows));
            params.insert("pivot_columns_column_ids".to_owned(), ids_value(&columns));
            params.insert("values_column_ids_map".to_owned(), Value::Object(values));
            params.insert("use_deprecated_id_algorithm".to_owned(), Value::Bool(true));
            return Ok(Some(StepData::bulk_old_rename(false)));
        }
        (StepType::Pivot, 5) => {
            params.remove("created_non_empty_dataframe");
            params.insert("flatten_column_headers".to_owned(), Value::Bool(true));
        }
        (StepType::SimpleImport, 1) => {
            params.insert("use_deprecated_id_algorithm".to_owned(), Value::Bool(true));
            return Ok(Some(StepData::bulk_old_rename(false)));
        }
        (StepType::Graph, 1) => {
            let styling = params
                .entry("graph_styling")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(styling) = styling.as_object_mut() {
                fill_defaults(styling, graph_styling_defaults());
            }
        }
        (step_type, version) => {
            return Err(SheetError::Upgrade(format!(
                "no upgrade for {step_type} version {version}"
            )));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upgraded(json: Value) -> Value {
        let analysis = SavedAnalysis::from_json(&json.to_string()).expect("parse");
        let upgraded = analysis.upgrade().expect("upgrade");
        assert_eq!(upgraded.version, CURRENT_VERSION);
        serde_json::to_value(upgraded.steps_data).expect("to value")
    }

    fn deprecated_rename() -> Value {
        json!({"params": {"move_to_deprecated_id_algorithm": true}, "step_type": "bulk_old_rename", "step_version": 1})
    }

    fn plain_rename() -> Value {
        json!({"params": {}, "step_type": "bulk_old_rename", "step_version": 1})
    }

    #[test]
    fn test_prev_version() {
        assert!(is_prev_version("0.1.61", "0.1.62"));
        assert!(is_prev_version("0.1.61", "0.1.610"));
        assert!(!is_prev_version("0.1.62", "0.1.62"));
        assert!(!is_prev_version("0.2.61", "0.1.62"));
    }

    #[test]
    fn test_legacy_add_column() {
        let steps = upgraded(json!({
            "version": "0.1.59",
            "steps": {"1": {"step_version": 1, "step_type": "add_column", "sheet_index": 0, "column_header": "["}}
        }));
        assert_eq!(
            steps,
            json!([
                deprecated_rename(),
                {"step_version": 2, "step_type": "add_column", "params": {"sheet_index": 0, "column_header": "[", "column_header_index": -1}}
            ])
        );
    }

    #[test]
    fn test_legacy_steps_keep_ordinal_order() {
        let steps = upgraded(json!({
            "version": "0.1.55",
            "steps": {
                "10": {"step_version": 1, "step_type": "delete_column", "sheet_index": 0, "column_header": "D"},
                "2": {"step_version": 1, "step_type": "add_column", "sheet_index": 0, "column_header": "D"}
            }
        }));
        assert_eq!(steps[1]["step_type"], "add_column");
        assert_eq!(
            steps[2],
            json!({"step_version": 3, "step_type": "delete_column", "params": {"sheet_index": 0, "column_ids": ["D"]}})
        );
    }

    #[test]
    fn test_merge_and_sort() {
        let steps = upgraded(json!({
            "version": "0.1.55",
            "steps": {
                "1": {"step_version": 1, "step_type": "merge", "sheet_index_one": 0, "sheet_index_two": 1, "merge_key_one": "Name", "merge_key_two": "Name", "selected_columns_one": ["Name", "Number"], "selected_columns_two": ["Name", "Sign"]},
                "2": {"step_version": 1, "step_type": "sort", "sheet_index": 2, "column_header": "Number", "sort_direction": "descending"}
            }
        }));
        assert_eq!(
            steps,
            json!([
                deprecated_rename(),
                {"step_version": 4, "step_type": "merge", "params": {"how": "lookup", "sheet_index_one": 0, "sheet_index_two": 1, "merge_key_column_ids": [["Name", "Name"]], "selected_column_ids_one": ["Name", "Number"], "selected_column_ids_two": ["Name", "Sign"]}},
                {"step_version": 2, "step_type": "sort", "params": {"sheet_index": 2, "column_id": "Number", "sort_direction": "descending"}}
            ])
        );
    }

    #[test]
    fn test_group_becomes_pivot() {
        let steps = upgraded(json!({
            "version": "0.1.54",
            "steps": {"1": {"step_version": 1, "step_type": "group", "sheet_index": 0, "group_rows": ["Name"], "group_columns": [], "values": {"Height": "sum"}}}
        }));
        assert_eq!(
            steps,
            json!([
                deprecated_rename(),
                {"step_version": 6, "step_type": "pivot", "params": {"flatten_column_headers": true, "use_deprecated_id_algorithm": true, "sheet_index": 0, "pivot_rows_column_ids": ["Name"], "pivot_columns_column_ids": [], "values_column_ids_map": {"Height": ["sum"]}}},
                plain_rename()
            ])
        );
    }

    #[test]
    fn test_import_is_followed_by_rename() {
        let steps = upgraded(json!({
            "version": "0.1.140",
            "steps": {
                "1": {"step_version": 1, "step_type": "simple_import", "file_names": ["NamesNew.csv"]},
                "2": {"step_version": 1, "step_type": "delete_column", "sheet_index": 0, "column_header": "New_Column_Header"}
            }
        }));
        assert_eq!(
            steps,
            json!([
                deprecated_rename(),
                {"step_version": 2, "step_type": "simple_import", "params": {"file_names": ["NamesNew.csv"], "use_deprecated_id_algorithm": true}},
                plain_rename(),
                {"step_version": 3, "step_type": "delete_column", "params": {"sheet_index": 0, "column_ids": ["New_Column_Header"]}}
            ])
        );
    }

    #[test]
    fn test_filter_types_are_stripped() {
        let steps = upgraded(json!({
            "version": CURRENT_VERSION,
            "steps_data": [{"step_version": 2, "step_type": "filter_column", "params": {"sheet_index": 1, "column_header": "event", "has_non_empty_filter": true, "filters": [{"type": "number", "condition": "greater", "value": 1}, {"filters": [{"type": "number", "condition": "greater", "value": 2}], "operator": "And"}], "operator": "And"}}]
        }));
        assert_eq!(
            steps,
            json!([
                {"step_version": 4, "step_type": "filter_column", "params": {"sheet_index": 1, "column_id": "event", "filters": [{"condition": "greater", "value": 1}, {"filters": [{"condition": "greater", "value": 2}], "operator": "And"}], "operator": "And"}}
            ])
        );
    }

    #[test]
    fn test_renames_are_followed_per_sheet() {
        let steps = upgraded(json!({
            "version": "0.3.131",
            "steps_data": [
                {"step_version": 1, "step_type": "rename_column", "params": {"sheet_index": 0, "old_column_header": "old", "new_column_header": "new"}},
                {"step_version": 1, "step_type": "rename_column", "params": {"sheet_index": 0, "old_column_header": "new", "new_column_header": "newer"}},
                {"step_version": 2, "step_type": "merge", "params": {"how": "lookup", "sheet_index_one": 0, "sheet_index_two": 1, "merge_key_one": "newer", "merge_key_two": "newer", "selected_columns_one": ["new"], "selected_columns_two": ["newer"]}},
                {"step_version": 3, "step_type": "pivot", "params": {"sheet_index": 0, "pivot_rows": ["newer"], "pivot_columns": [], "values": {"newer": ["sum"]}, "destination_sheet_index": 1}},
                {"step_version": 1, "step_type": "set_column_formula", "params": {"sheet_index": 1, "column_header": "newer", "old_formula": "=A", "new_formula": "=B"}}
            ]
        }));
        assert_eq!(steps[1]["params"]["column_id"], "old");
        assert_eq!(steps[2]["params"]["merge_key_column_ids"], json!([["old", "newer"]]));
        assert_eq!(steps[2]["params"]["selected_column_ids_one"], json!(["old"]));
        assert_eq!(steps[3]["params"]["pivot_rows_column_ids"], json!(["old"]));
        assert_eq!(steps[3]["params"]["destination_sheet_index"], 1);
        assert_eq!(steps[4], plain_rename());
        assert_eq!(steps[5]["params"]["column_id"], "newer");
    }

    #[test]
    fn test_duplicate_copies_renames() {
        let mut translator = HeaderTranslator::with_sheets(1);
        translator
            .observe(&StepData {
                step_version: 2,
                step_type: "rename_column".to_owned(),
                params: json!({"sheet_index": 0, "column_id": "old", "new_column_header": "new"}),
            })
            .expect("observe rename");
        translator
            .observe(&StepData {
                step_version: 1,
                step_type: "dataframe_duplicate".to_owned(),
                params: json!({"sheet_index": 0}),
            })
            .expect("observe duplicate");
        assert_eq!(
            translator.translate(1, &HeaderRef("new".to_owned())),
            ColumnId::from("old")
        );
        assert_eq!(
            translator.translate(1, &HeaderRef("other".to_owned())),
            ColumnId::from("other")
        );
    }

    #[test]
    fn test_graph_styling_defaults() {
        let steps = upgraded(json!({
            "version": "0.3.131",
            "steps_data": [{"step_version": 1, "step_type": "graph", "params": {"graph_id": "g", "graph_preprocessing": {}, "graph_creation": {"graph_type": "bar", "sheet_index": 0}, "graph_styling": {"title": {"title": "Mine"}}, "graph_rendering": {}}}]
        }));
        let styling = &steps[0]["params"]["graph_styling"];
        assert_eq!(steps[0]["step_version"], 4);
        assert_eq!(styling["title"]["title"], "Mine");
        assert_eq!(styling["title"]["visible"], true);
        assert_eq!(styling["legend"]["orientation"], "v");
        assert_eq!(styling["xaxis"]["rangeslider"]["visible"], true);
    }

    #[test]
    fn test_pivot_five_gets_flattened_headers() {
        let steps = upgraded(json!({
            "version": "0.3.131",
            "steps_data": [{"step_version": 5, "step_type": "pivot", "params": {"sheet_index": 0, "pivot_rows_column_ids": ["A"], "pivot_columns_column_ids": [], "values_column_ids_map": {"A": ["count"]}, "created_non_empty_dataframe": true}}]
        }));
        assert_eq!(
            steps,
            json!([{"step_version": 6, "step_type": "pivot", "params": {"sheet_index": 0, "pivot_rows_column_ids": ["A"], "pivot_columns_column_ids": [], "values_column_ids_map": {"A": ["count"]}, "flatten_column_headers": true}}])
        );
    }

    #[test]
    fn test_unknown_step_type_fails() {
        let analysis = SavedAnalysis::from_json(
            &json!({"version": "0.3.0", "steps_data": [{"step_version": 1, "step_type": "teleport", "params": {}}]})
                .to_string(),
        )
        .expect("parse");
        assert_eq!(analysis.upgrade().unwrap_err().error_kind(), "upgrade_error");
    }

    #[test]
    fn test_future_version_fails() {
        let analysis = SavedAnalysis::from_json(
            &json!({"version": "0.3.0", "steps_data": [{"step_version": 9, "step_type": "sort", "params": {}}]})
                .to_string(),
        )
        .expect("parse");
        assert!(matches!(analysis.upgrade(), Err(SheetError::Upgrade(_))));
    }

    #[test]
    fn test_current_analysis_round_trips_through_params() {
        let analysis = SavedAnalysis {
            version: CURRENT_VERSION.to_owned(),
            steps_data: vec![StepData {
                step_version: 1,
                step_type: "dataframe_duplicate".to_owned(),
                params: json!({"sheet_index": 0}),
            }],
        };
        assert!(analysis.is_current());
        let params = analysis.params().expect("params");
        assert_eq!(params[0].step_type(), StepType::DataframeDuplicate);
        let reparsed = SavedAnalysis::from_json(&analysis.to_json().expect("json")).expect("parse");
        assert_eq!(reparsed, analysis);
    }
}
