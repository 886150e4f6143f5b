use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Add an all-zero column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddColumnParams {
    pub sheet_index: usize,
    pub column_header: ColumnHeader,
    /// Position of the new column; `-1` appends.
    pub column_header_index: i64,
}

impl StepPerformer for AddColumnParams {
    /// Id of the new column and where it went.
    type ExecutionData = (ColumnId, usize);

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        if sheet.columns.id(&self.column_header).is_some() {
            return Err(SheetError::execution(
                ExecutionErrorKind::DuplicateValue,
                format!(
                    "Column header {} already exists in {}",
                    self.column_header, sheet.name
                ),
            ));
        }
        let width = sheet.data.width();
        let index = usize::try_from(self.column_header_index)
            .map_or(width, |index| index.min(width));

        let mut data = sheet.data.clone();
        let zeros = Series::new(
            self.column_header.as_str().into(),
            vec![0i64; data.height()],
        );
        data.insert_column(index, zeros)?;
        let mut columns = sheet.columns.clone();
        let column_id = columns.insert(self.column_header.clone());

        let new_sheet = sheet.with_data(data, columns);
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, (column_id, index)))
    }

    fn transpile(
        &self,
        _pre: &State,
        post: &State,
        (column_id, index): &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let sheet = post.sheet(self.sheet_index)?;
        Ok(vec![ChunkKind::AddColumn {
            sheet: sheet.id,
            df: sheet.name.clone(),
            column_id: column_id.clone(),
            header: self.column_header.clone(),
            index: *index,
            value: None,
            value_reads: Vec::new(),
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

    fn add(header: &str, index: i64) -> StepParams {
        StepParams::AddColumn(AddColumnParams {
            sheet_index: 0,
            column_header: header.to_owned(),
            column_header_index: index,
        })
    }

    #[test]
    fn test_append_column_of_zeros() {
        let pre = state_a(&[1, 2, 3]);
        let step = run(add("B", -1), &pre);

        let df = &step.post_state.sheets()[0].data;
        assert_eq!(df.get_column_names(), vec!["A", "B"]);
        assert_eq!(df.column("B").expect("B").i64().expect("i64").sum(), Some(0));
        assert_eq!(code(&step), vec!["df1.insert(1, 'B', 0)"]);
    }

    #[test]
    fn test_insert_at_front() {
        let pre = state_a(&[1]);
        let step = run(add("B", 0), &pre);
        assert_eq!(
            step.post_state.sheets()[0].data.get_column_names(),
            vec!["B", "A"]
        );
        assert_eq!(code(&step), vec!["df1.insert(0, 'B', 0)"]);
    }

    #[test]
    fn test_existing_header_rejected() {
        let pre = state_a(&[1]);
        let params = AddColumnParams {
            sheet_index: 0,
            column_header: "A".to_owned(),
            column_header_index: -1,
        };
        let err = params.execute(&pre).unwrap_err();
        assert_eq!(err.error_kind(), "duplicate_value");
    }

    #[test]
    fn test_readded_header_gets_fresh_id() {
        let pre = state_a(&[1]);
        let added = run(add("B", -1), &pre);
        let deleted = run(
            StepParams::DeleteColumn(crate::steps::DeleteColumnParams {
                sheet_index: 0,
                column_ids: vec!["B".into()],
            }),
            &added.post_state,
        );
        let again = run(add("B", -1), &deleted.post_state);
        let ids = again.post_state.column_ids(0).expect("sheet");
        assert_eq!(ids.id("B").map(ColumnId::as_str), Some("B_1"));
    }
}
