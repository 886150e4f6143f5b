use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::column_headers::ColumnId;
use crate::error::Result;
use crate::formula::{self, ParsedFormula};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Recompute a column from a spreadsheet formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetColumnFormulaParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_formula: String,
    /// What the front-end showed before the edit; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_formula: Option<String>,
}

impl StepPerformer for SetColumnFormulaParams {
    type ExecutionData = ParsedFormula;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?.to_owned();
        let parsed = formula::parse(&self.new_formula, &sheet.headers())?;

        let data = sheet
            .data
            .clone()
            .lazy()
            .with_column(parsed.to_expr().alias(header.as_str()))
            .collect()?;

        let mut new_sheet = sheet.with_data(data, sheet.columns.clone());
        new_sheet
            .formulas
            .insert(self.column_id.clone(), self.new_formula.clone());

        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, parsed))
    }

    fn transpile(
        &self,
        pre: &State,
        _post: &State,
        parsed: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let sheet = pre.sheet(self.sheet_index)?;
        let reads = parsed
            .dependencies()
            .iter()
            .filter_map(|header| sheet.columns.id(header).cloned())
            .collect();
        Ok(vec![ChunkKind::SetFormula {
            sheet: sheet.id,
            df: sheet.name.clone(),
            column_id: self.column_id.clone(),
            header: sheet.header(&self.column_id)?.to_owned(),
            value: parsed.to_pandas(&sheet.name),
            reads,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
