use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::ColumnId;
use crate::error::Result;
use crate::filter::{self, FilterOrGroup, Operator};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Keep only the rows where one column passes a set of filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterColumnParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub operator: Operator,
    pub filters: Vec<FilterOrGroup>,
}

impl StepPerformer for FilterColumnParams {
    /// Whether any row filtering happened at all.
    type ExecutionData = bool;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?;
        let dtype = sheet.dtype(&self.column_id)?;
        let Some(predicate) = filter::predicate(header, &dtype, self.operator, &self.filters)?
        else {
            return Ok((pre.clone(), false));
        };

        let data = sheet.data.clone().lazy().filter(predicate).collect()?;
        let new_sheet = sheet.with_data(data, sheet.columns.clone());
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, true))
    }

    fn transpile(
        &self,
        pre: &State,
        post: &State,
        filtered: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        if !filtered {
            return Ok(Vec::new());
        }
        let sheet = pre.sheet(self.sheet_index)?;
        let df = &sheet.name;
        let header = sheet.header(&self.column_id)?;
        let target = format!("{df}[{}]", py_str(header));
        let dtype = sheet.dtype(&self.column_id)?;
        let Some(mask) = filter::mask_code(&target, &dtype, self.operator, &self.filters)? else {
            return Ok(Vec::new());
        };
        Ok(vec![ChunkKind::Block {
            display_name: "Filtered",
            description: format!("Filtered {header} in {df}"),
            statements: vec![format!("{df} = {df}[{mask}]")],
            footprint: Footprint::default()
                .read(sheet.id, Columns::one(self.column_id.clone()))
                .write(sheet.id, Columns::All),
            outputs: vec![block_output(post.sheet(self.sheet_index)?)],
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
