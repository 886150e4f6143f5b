use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::error::{Result, SheetError};
use crate::state::{DataframeFormat, State};
use serde::{Deserialize, Serialize};

/// Replace the display formatting of a sheet. Emits no statements; the
/// transpiler renders formatting once, after all chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDataframeFormatParams {
    pub sheet_index: usize,
    pub df_format: DataframeFormat,
}

impl StepPerformer for SetDataframeFormatParams {
    type ExecutionData = ();

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let referenced = self
            .df_format
            .columns
            .keys()
            .chain(
                self.df_format
                    .conditional_formats
                    .iter()
                    .flat_map(|cf| cf.column_ids.iter()),
            );
        for id in referenced {
            if !sheet.columns.contains(id) {
                return Err(SheetError::invalid_params(format!(
                    "column '{id}' does not exist in dataframe {}",
                    sheet.name
                )));
            }
        }
        let mut formatted = (**sheet).clone();
        formatted.format = self.df_format.clone();
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, formatted)?;
        Ok((post, ()))
    }

    fn transpile(&self, _pre: &State, _post: &State, _: &()) -> Result<Vec<ChunkKind>> {
        Ok(Vec::new())
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
