use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::error::Result;
use crate::state::{SheetId, State};
use serde::{Deserialize, Serialize};

/// Copy a sheet, ids and formatting included, as `<name>_copy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataframeDuplicateParams {
    pub sheet_index: usize,
}

impl StepPerformer for DataframeDuplicateParams {
    /// Lineage id of the copy.
    type ExecutionData = SheetId;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let source = pre.sheet(self.sheet_index)?;
        let mut post = pre.clone();
        let name = post.unique_df_name(&format!("{}_copy", source.name));
        let mut copy = post.mint_sheet(name, source.data.clone());
        copy.columns = source.columns.clone();
        copy.formulas = source.formulas.clone();
        copy.format = source.format.clone();
        let id = copy.id;
        post.push_sheet(copy);
        Ok((post, id))
    }

    fn transpile(&self, pre: &State, post: &State, copy_id: &SheetId) -> Result<Vec<ChunkKind>> {
        let source = pre.sheet(self.sheet_index)?;
        let new_df = post
            .sheet_by_id(*copy_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        Ok(vec![ChunkKind::DuplicateDataframe {
            source: source.id,
            source_df: source.name.clone(),
            sheet: *copy_id,
            new_df,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepParams;
    use crate::steps::test_support::{code, run, state_a};

    #[test]
    fn test_duplicate_appends_copy() {
        let pre = state_a(&[1, 2]);
        let step = run(
            StepParams::DataframeDuplicate(DataframeDuplicateParams { sheet_index: 0 }),
            &pre,
        );
        assert_eq!(step.post_state.df_names(), vec!["df1", "df1_copy"]);
        assert_ne!(step.post_state.sheets()[0].id, step.post_state.sheets()[1].id);
        assert_eq!(code(&step), vec!["df1_copy = df1.copy(deep=True)"]);
    }
}
