use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::{State, valid_df_name};
use serde::{Deserialize, Serialize};

/// Give a sheet a new variable name. Invalid names are cleaned up first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataframeRenameParams {
    pub sheet_index: usize,
    pub new_dataframe_name: String,
}

impl StepPerformer for DataframeRenameParams {
    /// Name before the rename.
    type ExecutionData = String;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let new_name = valid_df_name(&self.new_dataframe_name);
        if new_name == sheet.name {
            return Ok((pre.clone(), sheet.name.clone()));
        }
        if pre.df_names().contains(&new_name.as_str()) {
            return Err(SheetError::execution(
                ExecutionErrorKind::DuplicateValue,
                format!("a dataframe named {new_name} already exists"),
            ));
        }
        let mut renamed = (**sheet).clone();
        renamed.name = new_name;
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, renamed)?;
        Ok((post, sheet.name.clone()))
    }

    fn transpile(&self, _pre: &State, post: &State, old_name: &String) -> Result<Vec<ChunkKind>> {
        let sheet = post.sheet(self.sheet_index)?;
        if sheet.name == *old_name {
            return Ok(Vec::new());
        }
        Ok(vec![ChunkKind::RenameDataframe {
            sheet: sheet.id,
            old_name: old_name.clone(),
            new_name: sheet.name.clone(),
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
