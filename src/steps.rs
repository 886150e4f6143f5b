//! Step kinds and the performer contract.
//!
//! Every edit the user can make is one variant of [`StepParams`], carrying a
//! strongly typed params struct. Each params struct implements
//! [`StepPerformer`]: `execute` turns a pre-state into a post-state, and
//! `transpile` describes the same change as code chunks without touching the
//! tabular engine again.
//!
//! # Serialization
//!
//! `StepParams` serializes adjacently tagged, which is exactly the persisted
//! `{"step_type": ..., "params": {...}}` shape of a saved analysis entry:
//!
//! ```
//! use sheetstep::steps::StepParams;
//!
//! let json = r#"{"step_type": "dataframe_delete", "params": {"sheet_index": 0}}"#;
//! let params: StepParams = serde_json::from_str(json)?;
//! assert_eq!(params.step_type().as_str(), "dataframe_delete");
//! # Ok::<(), serde_json::Error>(())
//! ```

pub mod add_column;
pub mod bulk_old_rename;
pub mod change_column_dtype;
pub mod dataframe_delete;
pub mod dataframe_duplicate;
pub mod dataframe_rename;
pub mod delete_column;
pub mod export_to_file;
pub mod filter_column;
pub mod graph;
pub mod merge;
pub mod one_hot_encoding;
pub mod pivot;
pub mod promote_row_to_header;
pub mod rename_column;
pub mod reorder_column;
pub mod set_column_formula;
pub mod set_dataframe_format;
pub mod simple_import;
pub mod sort;

pub use add_column::AddColumnParams;
pub use bulk_old_rename::BulkOldRenameParams;
pub use change_column_dtype::{ChangeColumnDtypeParams, Dtype};
pub use dataframe_delete::DataframeDeleteParams;
pub use dataframe_duplicate::DataframeDuplicateParams;
pub use dataframe_rename::DataframeRenameParams;
pub use delete_column::DeleteColumnParams;
pub use export_to_file::{ExportToFileParams, ExportType};
pub use filter_column::FilterColumnParams;
pub use graph::{GraphCreation, GraphParams};
pub use merge::{MergeHow, MergeParams};
pub use one_hot_encoding::OneHotEncodingParams;
pub use pivot::{AggregationType, PivotParams};
pub use promote_row_to_header::PromoteRowToHeaderParams;
pub use rename_column::RenameColumnParams;
pub use reorder_column::ReorderColumnParams;
pub use set_column_formula::SetColumnFormulaParams;
pub use set_dataframe_format::SetDataframeFormatParams;
pub use simple_import::SimpleImportParams;
pub use sort::{SortDirection, SortParams};

use crate::code_chunks::{BlockOutput, ChunkKind, CodeChunk};
use crate::error::{Result, SheetError};
use crate::state::{Sheet, State};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The contract every step kind implements.
pub trait StepPerformer {
    /// Whatever `execute` learned that `transpile` needs and cannot recompute
    /// from the two states.
    type ExecutionData;

    /// Build the post-state. Must not change `pre`; sheets it leaves alone
    /// stay shared with `pre`.
    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)>;

    /// Describe in code what `execute` did in data.
    fn transpile(
        &self,
        pre: &State,
        post: &State,
        data: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>>;

    /// Sheets this step writes, known from params alone.
    fn edited_sheet_indexes(&self) -> Vec<usize>;
}

fn perform<P: StepPerformer>(params: &P, pre: &State) -> Result<(State, Vec<ChunkKind>)> {
    let (post, data) = params.execute(pre)?;
    let chunks = params.transpile(pre, &post, &data)?;
    Ok((post, chunks))
}

/// Discriminator of a step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    SimpleImport,
    AddColumn,
    DeleteColumn,
    RenameColumn,
    ReorderColumn,
    SetColumnFormula,
    ChangeColumnDtype,
    FilterColumn,
    Sort,
    Pivot,
    Merge,
    OneHotEncoding,
    PromoteRowToHeader,
    DataframeDuplicate,
    DataframeDelete,
    DataframeRename,
    SetDataframeFormat,
    Graph,
    ExportToFile,
    BulkOldRename,
}

impl StepType {
    pub const ALL: [Self; 20] = [
        Self::SimpleImport,
        Self::AddColumn,
        Self::DeleteColumn,
        Self::RenameColumn,
        Self::ReorderColumn,
        Self::SetColumnFormula,
        Self::ChangeColumnDtype,
        Self::FilterColumn,
        Self::Sort,
        Self::Pivot,
        Self::Merge,
        Self::OneHotEncoding,
        Self::PromoteRowToHeader,
        Self::DataframeDuplicate,
        Self::DataframeDelete,
        Self::DataframeRename,
        Self::SetDataframeFormat,
        Self::Graph,
        Self::ExportToFile,
        Self::BulkOldRename,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleImport => "simple_import",
            Self::AddColumn => "add_column",
            Self::DeleteColumn => "delete_column",
            Self::RenameColumn => "rename_column",
            Self::ReorderColumn => "reorder_column",
            Self::SetColumnFormula => "set_column_formula",
            Self::ChangeColumnDtype => "change_column_dtype",
            Self::FilterColumn => "filter_column",
            Self::Sort => "sort",
            Self::Pivot => "pivot",
            Self::Merge => "merge",
            Self::OneHotEncoding => "one_hot_encoding",
            Self::PromoteRowToHeader => "promote_row_to_header",
            Self::DataframeDuplicate => "dataframe_duplicate",
            Self::DataframeDelete => "dataframe_delete",
            Self::DataframeRename => "dataframe_rename",
            Self::SetDataframeFormat => "set_dataframe_format",
            Self::Graph => "graph",
            Self::ExportToFile => "export_to_file",
            Self::BulkOldRename => "bulk_old_rename",
        }
    }

    /// Current schema version of this step's params.
    pub fn version(self) -> u32 {
        match self {
            Self::DeleteColumn => 3,
            Self::FilterColumn | Self::Merge | Self::Graph => 4,
            Self::Pivot => 6,
            Self::SimpleImport
            | Self::AddColumn
            | Self::RenameColumn
            | Self::ReorderColumn
            | Self::SetColumnFormula
            | Self::ChangeColumnDtype
            | Self::Sort => 2,
            Self::OneHotEncoding
            | Self::PromoteRowToHeader
            | Self::DataframeDuplicate
            | Self::DataframeDelete
            | Self::DataframeRename
            | Self::SetDataframeFormat
            | Self::ExportToFile
            | Self::BulkOldRename => 1,
        }
    }

    pub fn parse(step_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == step_type)
    }

    /// Steps that bring data into the session; `clear()` keeps these.
    pub fn is_import(self) -> bool {
        matches!(self, Self::SimpleImport)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Params of one step, tagged by step type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", content = "params", rename_all = "snake_case")]
pub enum StepParams {
    SimpleImport(SimpleImportParams),
    AddColumn(AddColumnParams),
    DeleteColumn(DeleteColumnParams),
    RenameColumn(RenameColumnParams),
    ReorderColumn(ReorderColumnParams),
    SetColumnFormula(SetColumnFormulaParams),
    ChangeColumnDtype(ChangeColumnDtypeParams),
    FilterColumn(FilterColumnParams),
    Sort(SortParams),
    Pivot(PivotParams),
    Merge(MergeParams),
    OneHotEncoding(OneHotEncodingParams),
    PromoteRowToHeader(PromoteRowToHeaderParams),
    DataframeDuplicate(DataframeDuplicateParams),
    DataframeDelete(DataframeDeleteParams),
    DataframeRename(DataframeRenameParams),
    SetDataframeFormat(SetDataframeFormatParams),
    Graph(GraphParams),
    ExportToFile(ExportToFileParams),
    BulkOldRename(BulkOldRenameParams),
}

impl StepParams {
    /// Params from a step type name and its untyped params object.
    pub fn from_parts(step_type: &str, params: serde_json::Value) -> Result<Self> {
        if StepType::parse(step_type).is_none() {
            return Err(SheetError::UnknownStep(step_type.to_owned()));
        }
        let tagged = serde_json::json!({ "step_type": step_type, "params": params });
        serde_json::from_value(tagged).map_err(|e| {
            SheetError::invalid_params(format!("bad params for {step_type}: {e}"))
        })
    }

    /// The untyped params object, as persisted.
    pub fn params_value(&self) -> Result<serde_json::Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("params")
            .map(serde_json::Value::take)
            .unwrap_or_default())
    }

    pub fn step_type(&self) -> StepType {
        match self {
            Self::SimpleImport(_) => StepType::SimpleImport,
            Self::AddColumn(_) => StepType::AddColumn,
            Self::DeleteColumn(_) => StepType::DeleteColumn,
            Self::RenameColumn(_) => StepType::RenameColumn,
            Self::ReorderColumn(_) => StepType::ReorderColumn,
            Self::SetColumnFormula(_) => StepType::SetColumnFormula,
            Self::ChangeColumnDtype(_) => StepType::ChangeColumnDtype,
            Self::FilterColumn(_) => StepType::FilterColumn,
            Self::Sort(_) => StepType::Sort,
            Self::Pivot(_) => StepType::Pivot,
            Self::Merge(_) => StepType::Merge,
            Self::OneHotEncoding(_) => StepType::OneHotEncoding,
            Self::PromoteRowToHeader(_) => StepType::PromoteRowToHeader,
            Self::DataframeDuplicate(_) => StepType::DataframeDuplicate,
            Self::DataframeDelete(_) => StepType::DataframeDelete,
            Self::DataframeRename(_) => StepType::DataframeRename,
            Self::SetDataframeFormat(_) => StepType::SetDataframeFormat,
            Self::Graph(_) => StepType::Graph,
            Self::ExportToFile(_) => StepType::ExportToFile,
            Self::BulkOldRename(_) => StepType::BulkOldRename,
        }
    }

    /// Run the performer for this step kind.
    fn perform(&self, pre: &State) -> Result<(State, Vec<ChunkKind>)> {
        match self {
            Self::SimpleImport(p) => perform(p, pre),
            Self::AddColumn(p) => perform(p, pre),
            Self::DeleteColumn(p) => perform(p, pre),
            Self::RenameColumn(p) => perform(p, pre),
            Self::ReorderColumn(p) => perform(p, pre),
            Self::SetColumnFormula(p) => perform(p, pre),
            Self::ChangeColumnDtype(p) => perform(p, pre),
            Self::FilterColumn(p) => perform(p, pre),
            Self::Sort(p) => perform(p, pre),
            Self::Pivot(p) => perform(p, pre),
            Self::Merge(p) => perform(p, pre),
            Self::OneHotEncoding(p) => perform(p, pre),
            Self::PromoteRowToHeader(p) => perform(p, pre),
            Self::DataframeDuplicate(p) => perform(p, pre),
            Self::DataframeDelete(p) => perform(p, pre),
            Self::DataframeRename(p) => perform(p, pre),
            Self::SetDataframeFormat(p) => perform(p, pre),
            Self::Graph(p) => perform(p, pre),
            Self::ExportToFile(p) => perform(p, pre),
            Self::BulkOldRename(p) => perform(p, pre),
        }
    }

    pub fn edited_sheet_indexes(&self) -> Vec<usize> {
        match self {
            Self::SimpleImport(p) => p.edited_sheet_indexes(),
            Self::AddColumn(p) => p.edited_sheet_indexes(),
            Self::DeleteColumn(p) => p.edited_sheet_indexes(),
            Self::RenameColumn(p) => p.edited_sheet_indexes(),
            Self::ReorderColumn(p) => p.edited_sheet_indexes(),
            Self::SetColumnFormula(p) => p.edited_sheet_indexes(),
            Self::ChangeColumnDtype(p) => p.edited_sheet_indexes(),
            Self::FilterColumn(p) => p.edited_sheet_indexes(),
            Self::Sort(p) => p.edited_sheet_indexes(),
            Self::Pivot(p) => p.edited_sheet_indexes(),
            Self::Merge(p) => p.edited_sheet_indexes(),
            Self::OneHotEncoding(p) => p.edited_sheet_indexes(),
            Self::PromoteRowToHeader(p) => p.edited_sheet_indexes(),
            Self::DataframeDuplicate(p) => p.edited_sheet_indexes(),
            Self::DataframeDelete(p) => p.edited_sheet_indexes(),
            Self::DataframeRename(p) => p.edited_sheet_indexes(),
            Self::SetDataframeFormat(p) => p.edited_sheet_indexes(),
            Self::Graph(p) => p.edited_sheet_indexes(),
            Self::ExportToFile(p) => p.edited_sheet_indexes(),
            Self::BulkOldRename(p) => p.edited_sheet_indexes(),
        }
    }
}

/// One executed edit: params, the states around it, and the code it produced.
#[derive(Debug, Clone)]
pub struct Step {
    pub step_id: String,
    pub params: StepParams,
    pub pre_state: Arc<State>,
    pub post_state: Arc<State>,
    pub code_chunks: Vec<CodeChunk>,
    pub execution_time: Duration,
}

impl Step {
    /// Execute `params` against `pre_state`.
    ///
    /// # Errors
    ///
    /// `InvalidParams` when params reference missing sheets or columns,
    /// `Execution` when the tabular engine fails.
    pub fn run(step_id: String, params: StepParams, pre_state: Arc<State>) -> Result<Self> {
        let start = Instant::now();
        let (post_state, kinds) = params.perform(&pre_state)?;
        let code_chunks = kinds
            .into_iter()
            .map(|kind| CodeChunk::new(step_id.clone(), kind))
            .collect();
        Ok(Self {
            step_id,
            params,
            pre_state,
            post_state: Arc::new(post_state),
            code_chunks,
            execution_time: start.elapsed(),
        })
    }

    pub fn step_type(&self) -> StepType {
        self.params.step_type()
    }

    pub fn step_version(&self) -> u32 {
        self.step_type().version()
    }
}

/// How `sheet` looks to code that runs after a block.
pub(crate) fn block_output(sheet: &Sheet) -> BlockOutput {
    BlockOutput {
        sheet: sheet.id,
        name: sheet.name.clone(),
        columns: sheet
            .headers()
            .into_iter()
            .filter_map(|header| sheet.columns.id(&header).cloned().map(|id| (id, header)))
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use polars::prelude::*;

    /// State with one sheet `df1` holding column `A`.
    pub fn state_a(values: &[i64]) -> Arc<State> {
        let df = DataFrame::new(vec![Column::from(Series::new("A".into(), values))])
            .expect("build df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    pub fn run(params: StepParams, pre: &Arc<State>) -> Step {
        Step::run("test-step".to_owned(), params, Arc::clone(pre)).expect("step runs")
    }

    pub fn code(step: &Step) -> Vec<String> {
        step.code_chunks.iter().flat_map(CodeChunk::code).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_types_round_trip_names() {
        for step_type in StepType::ALL {
            assert_eq!(StepType::parse(step_type.as_str()), Some(step_type));
        }
        assert_eq!(StepType::parse("fly_to_moon"), None);
    }

    #[test]
    fn test_from_parts_rejects_unknown_type() {
        let err = StepParams::from_parts("fly_to_moon", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, SheetError::UnknownStep(_)));
    }

    #[test]
    fn test_from_parts_rejects_bad_shape() {
        let err =
            StepParams::from_parts("add_column", serde_json::json!({"sheet_index": "zero"}))
                .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
    }

    #[test]
    fn test_params_value_strips_tag() {
        let params = StepParams::DataframeDelete(DataframeDeleteParams { sheet_index: 2 });
        assert_eq!(
            params.params_value().expect("value"),
            serde_json::json!({"sheet_index": 2})
        );
    }
}
