use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::formula::rename_references;
use crate::state::State;
use serde::{Deserialize, Serialize};

/// Change the header of one column. Its id does not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameColumnParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_column_header: ColumnHeader,
}

impl StepPerformer for RenameColumnParams {
    /// Header before the rename.
    type ExecutionData = ColumnHeader;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let old_header = sheet.header(&self.column_id)?.to_owned();
        if old_header == self.new_column_header {
            return Ok((pre.clone(), old_header));
        }
        if self.new_column_header.is_empty() {
            return Err(SheetError::invalid_params("column headers cannot be empty"));
        }
        if sheet.columns.id(&self.new_column_header).is_some() {
            return Err(SheetError::execution(
                ExecutionErrorKind::DuplicateValue,
                format!(
                    "Column header {} already exists in {}",
                    self.new_column_header, sheet.name
                ),
            ));
        }

        // `set_column_names` also resets the frame's cached schema.
        let names: Vec<String> = sheet
            .data
            .get_column_names()
            .into_iter()
            .map(|name| {
                if name.as_str() == old_header {
                    self.new_column_header.clone()
                } else {
                    name.to_string()
                }
            })
            .collect();
        let mut data = sheet.data.clone();
        data.set_column_names(names.iter().map(String::as_str))?;
        let mut columns = sheet.columns.clone();
        columns.rename(&self.column_id, self.new_column_header.clone());

        let mut new_sheet = sheet.with_data(data, columns);
        for formula in new_sheet.formulas.values_mut() {
            *formula = rename_references(formula, &old_header, &self.new_column_header);
        }

        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, old_header))
    }

    fn transpile(
        &self,
        _pre: &State,
        post: &State,
        old_header: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        if *old_header == self.new_column_header {
            return Ok(Vec::new());
        }
        let sheet = post.sheet(self.sheet_index)?;
        Ok(vec![ChunkKind::RenameColumn {
            sheet: sheet.id,
            df: sheet.name.clone(),
            column_id: self.column_id.clone(),
            old_header: old_header.clone(),
            new_header: self.new_column_header.clone(),
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
