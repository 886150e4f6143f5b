use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{Result, SheetError};
use crate::state::State;
use serde::{Deserialize, Serialize};

/// Delete several columns of one sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteColumnParams {
    pub sheet_index: usize,
    pub column_ids: Vec<ColumnId>,
}

impl DeleteColumnParams {
    fn unique_ids(&self) -> Vec<ColumnId> {
        let mut ids: Vec<ColumnId> = Vec::with_capacity(self.column_ids.len());
        for id in &self.column_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

impl StepPerformer for DeleteColumnParams {
    /// Headers the deleted columns had.
    type ExecutionData = Vec<ColumnHeader>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        if self.column_ids.is_empty() {
            return Err(SheetError::invalid_params("no columns to delete"));
        }
        let sheet = pre.sheet(self.sheet_index)?;
        let ids = self.unique_ids();
        let headers = sheet.headers_for(&ids)?;

        let data = sheet.data.drop_many(headers.iter().map(String::as_str));
        let mut columns = sheet.columns.clone();
        for id in &ids {
            columns.remove(id);
        }
        let mut new_sheet = sheet.with_data(data, columns);
        new_sheet
            .format
            .columns
            .retain(|id, _| !ids.contains(id));

        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, headers))
    }

    fn transpile(
        &self,
        pre: &State,
        _post: &State,
        headers: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let sheet = pre.sheet(self.sheet_index)?;
        Ok(vec![ChunkKind::DeleteColumns {
            sheet: sheet.id,
            df: sheet.name.clone(),
            column_ids: self.unique_ids(),
            headers: headers.clone(),
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
    use crate::steps::test_support::{code, run};
    use polars::prelude::*;
    use std::sync::Arc;

    fn abc() -> Arc<State> {
        let df = df!("A" => [1i64], "B" => [2i64], "C" => [3i64]).expect("df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    #[test]
    fn test_delete_keeps_param_order_in_code() {
        let step = run(
            StepParams::DeleteColumn(DeleteColumnParams {
                sheet_index: 0,
                column_ids: vec!["C".into(), "B".into()],
            }),
            &abc(),
        );
        assert_eq!(step.post_state.sheets()[0].headers(), vec!["A"]);
        assert_eq!(code(&step), vec!["df1.drop(['C', 'B'], axis=1, inplace=True)"]);
    }

    #[test]
    fn test_missing_column_is_invalid() {
        let params = DeleteColumnParams {
            sheet_index: 0,
            column_ids: vec!["Z".into()],
        };
        let err = params.execute(&abc()).unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
    }
}
