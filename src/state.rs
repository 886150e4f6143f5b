//! Immutable snapshots of every sheet after N steps.
//!
//! A [`State`] owns an ordered list of `Arc<Sheet>`. Performers never touch a
//! sheet in place: they clone the `State` (which only bumps reference counts),
//! build a new [`Sheet`] for anything they change, and swap it in. Sheets that
//! a step left alone stay pointer-equal to the previous state's sheets, which
//! the steps manager and tests use to detect untouched data.
//!
//! ```no_run
//! use polars::prelude::*;
//! use sheetstep::state::State;
//!
//! let df = df!("A" => [1i64, 2, 3])?;
//! let state = State::from_inputs(vec![("df1".to_owned(), df)])?;
//! assert_eq!(state.df_names(), vec!["df1"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod format;

pub use format::{
    ColorFormat, ConditionalFormat, DataframeFormat, NumberFormat, NumberFormatType, RowsFormat,
};

use crate::column_headers::{ColumnHeader, ColumnId, ColumnIdMap};
use crate::error::{Result, SheetError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lineage identifier of a sheet. Survives renames and index shifts; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SheetId(pub u64);

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sheet#{}", self.0)
    }
}

/// One dataframe plus everything the engine knows about it.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    pub data: DataFrame,
    pub columns: ColumnIdMap,
    /// Formula text per column; columns without a formula are absent.
    pub formulas: BTreeMap<ColumnId, String>,
    pub format: DataframeFormat,
}

impl Sheet {
    /// Current headers in column order.
    pub fn headers(&self) -> Vec<ColumnHeader> {
        self.data
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Column ids in column order.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.data
            .get_column_names()
            .into_iter()
            .filter_map(|name| self.columns.id(name.as_str()).cloned())
            .collect()
    }

    /// Header for `id`, or `InvalidParams` naming the sheet.
    pub fn header(&self, id: &ColumnId) -> Result<&str> {
        self.columns.header(id).ok_or_else(|| {
            SheetError::invalid_params(format!(
                "column '{id}' does not exist in dataframe {}",
                self.name
            ))
        })
    }

    /// Headers for several ids, in the order given.
    pub fn headers_for(&self, ids: &[ColumnId]) -> Result<Vec<ColumnHeader>> {
        ids.iter()
            .map(|id| self.header(id).map(ToOwned::to_owned))
            .collect()
    }

    /// Position of `id` among the columns.
    pub fn column_index(&self, id: &ColumnId) -> Result<usize> {
        let header = self.header(id)?;
        self.data
            .get_column_index(header)
            .ok_or_else(|| SheetError::invalid_params(format!("column '{header}' has no data")))
    }

    pub fn dtype(&self, id: &ColumnId) -> Result<DataType> {
        let header = self.header(id)?;
        Ok(self.data.column(header)?.dtype().clone())
    }

    pub fn formula(&self, id: &ColumnId) -> &str {
        self.formulas.get(id).map_or("", String::as_str)
    }

    /// Copy of this sheet with new data. Column ids and formulas are carried
    /// over for headers that still exist.
    pub fn with_data(&self, data: DataFrame, columns: ColumnIdMap) -> Self {
        let formulas = self
            .formulas
            .iter()
            .filter(|(id, _)| columns.contains(id))
            .map(|(id, f)| (id.clone(), f.clone()))
            .collect();
        Self {
            id: self.id,
            name: self.name.clone(),
            data,
            columns,
            formulas,
            format: self.format.clone(),
        }
    }
}

/// Generated chart attached to a sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOutput {
    pub sheet_id: SheetId,
    pub graph_type: String,
    /// Plotly snippet that renders the chart from the sheet's dataframe.
    pub code: String,
}

/// Snapshot of all sheets after some number of steps.
#[derive(Debug, Clone, Default)]
pub struct State {
    sheets: Vec<Arc<Sheet>>,
    graphs: BTreeMap<String, GraphOutput>,
    next_sheet_id: u64,
}

impl State {
    /// Initial state built from named input dataframes.
    ///
    /// Column ids start out equal to the headers.
    pub fn from_inputs(inputs: Vec<(String, DataFrame)>) -> Result<Self> {
        let mut state = Self::default();
        for (name, data) in inputs {
            if !is_valid_df_name(&name) {
                return Err(SheetError::invalid_params(format!(
                    "'{name}' is not a valid dataframe name"
                )));
            }
            if state.df_names().contains(&name.as_str()) {
                return Err(SheetError::invalid_params(format!(
                    "dataframe name '{name}' is passed twice"
                )));
            }
            let sheet = state.mint_sheet(name, data);
            state.push_sheet(sheet);
        }
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn sheets(&self) -> &[Arc<Sheet>] {
        &self.sheets
    }

    /// Sheet at `sheet_index`, or `InvalidParams`.
    pub fn sheet(&self, sheet_index: usize) -> Result<&Arc<Sheet>> {
        self.sheets.get(sheet_index).ok_or_else(|| {
            SheetError::invalid_params(format!("sheet index {sheet_index} does not exist"))
        })
    }

    pub fn sheet_by_id(&self, id: SheetId) -> Option<&Arc<Sheet>> {
        self.sheets.iter().find(|s| s.id == id)
    }

    pub fn sheet_index_of(&self, id: SheetId) -> Option<usize> {
        self.sheets.iter().position(|s| s.id == id)
    }

    pub fn df_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn df_formats(&self) -> Vec<&DataframeFormat> {
        self.sheets.iter().map(|s| &s.format).collect()
    }

    pub fn dataframes(&self) -> Vec<&DataFrame> {
        self.sheets.iter().map(|s| &s.data).collect()
    }

    pub fn column_ids(&self, sheet_index: usize) -> Result<&ColumnIdMap> {
        Ok(&self.sheet(sheet_index)?.columns)
    }

    /// Formula text for every column of a sheet, empty for plain columns.
    pub fn column_spreadsheet_code(&self, sheet_index: usize) -> Result<BTreeMap<ColumnId, String>> {
        let sheet = self.sheet(sheet_index)?;
        Ok(sheet
            .column_ids()
            .into_iter()
            .map(|id| {
                let formula = sheet.formula(&id).to_owned();
                (id, formula)
            })
            .collect())
    }

    pub fn graphs(&self) -> &BTreeMap<String, GraphOutput> {
        &self.graphs
    }

    /// A fresh sheet with a new lineage id and ids equal to headers.
    pub fn mint_sheet(&mut self, name: String, data: DataFrame) -> Sheet {
        let id = SheetId(self.next_sheet_id);
        self.next_sheet_id += 1;
        let columns = ColumnIdMap::from_headers(
            data.get_column_names()
                .into_iter()
                .map(|name| name.to_string()),
        );
        Sheet {
            id,
            name,
            data,
            columns,
            formulas: BTreeMap::new(),
            format: DataframeFormat::default(),
        }
    }

    /// Lineage id that the next minted sheet will get.
    pub fn peek_next_sheet_id(&self) -> SheetId {
        SheetId(self.next_sheet_id)
    }

    pub fn push_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(Arc::new(sheet));
    }

    pub fn replace_sheet(&mut self, sheet_index: usize, sheet: Sheet) -> Result<()> {
        let slot = self.sheets.get_mut(sheet_index).ok_or_else(|| {
            SheetError::invalid_params(format!("sheet index {sheet_index} does not exist"))
        })?;
        *slot = Arc::new(sheet);
        Ok(())
    }

    /// Drop a sheet; later indices shift down. Graphs on it go too.
    pub fn remove_sheet(&mut self, sheet_index: usize) -> Result<Arc<Sheet>> {
        if sheet_index >= self.sheets.len() {
            return Err(SheetError::invalid_params(format!(
                "sheet index {sheet_index} does not exist"
            )));
        }
        let removed = self.sheets.remove(sheet_index);
        self.graphs.retain(|_, graph| graph.sheet_id != removed.id);
        Ok(removed)
    }

    pub fn set_graph(&mut self, graph_id: String, graph: GraphOutput) {
        self.graphs.insert(graph_id, graph);
    }

    pub fn remove_graph(&mut self, graph_id: &str) -> Option<GraphOutput> {
        self.graphs.remove(graph_id)
    }

    /// `base` made into a valid name not already used by another sheet.
    pub fn unique_df_name(&self, base: &str) -> String {
        let base = valid_df_name(base);
        let names = self.df_names();
        if !names.contains(&base.as_str()) {
            return base;
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !names.contains(&candidate.as_str()))
            .unwrap_or(base)
    }
}

const PYTHON_KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// True when `name` can be used as a variable in the generated script.
pub fn is_valid_df_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !PYTHON_KEYWORDS.contains(&name)
}

/// Rewrite `name` into a valid variable name.
pub fn valid_df_name(name: &str) -> String {
    if is_valid_df_name(name) {
        return name.to_owned();
    }
    let mut cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() || !cleaned.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        cleaned.insert_str(0, "df_");
    }
    if PYTHON_KEYWORDS.contains(&cleaned.as_str()) {
        cleaned.push_str("_df");
    }
    cleaned
}
