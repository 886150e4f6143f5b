use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::error::Result;
use crate::state::{Sheet, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Remove a sheet. Later sheets shift down one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataframeDeleteParams {
    pub sheet_index: usize,
}

impl StepPerformer for DataframeDeleteParams {
    type ExecutionData = Arc<Sheet>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let mut post = pre.clone();
        let removed = post.remove_sheet(self.sheet_index)?;
        Ok((post, removed))
    }

    fn transpile(&self, _pre: &State, _post: &State, removed: &Arc<Sheet>) -> Result<Vec<ChunkKind>> {
        Ok(vec![ChunkKind::DeleteDataframe {
            sheet: removed.id,
            df: removed.name.clone(),
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepParams;
    use crate::steps::test_support::{code, run, state_a};

    #[test]
    fn test_delete_removes_sheet() {
        let pre = state_a(&[1]);
        let step = run(
            StepParams::DataframeDelete(DataframeDeleteParams { sheet_index: 0 }),
            &pre,
        );
        assert!(step.post_state.is_empty());
        assert_eq!(code(&step), vec!["del df1"]);
    }

    #[test]
    fn test_delete_missing_sheet_is_invalid() {
        let err = DataframeDeleteParams { sheet_index: 4 }
            .execute(&state_a(&[1]))
            .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
    }
}
