use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::ColumnId;
use crate::error::Result;
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
    /// Leaves the rows alone.
    None,
}

/// Sort the rows of a sheet by one column. Missing values go first when
/// ascending and last when descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub sort_direction: SortDirection,
}

impl StepPerformer for SortParams {
    type ExecutionData = ();

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?;
        let descending = match self.sort_direction {
            SortDirection::None => return Ok((pre.clone(), ())),
            SortDirection::Ascending => false,
            SortDirection::Descending => true,
        };

        let data = sheet.data.sort(
            [header],
            SortMultipleOptions::default()
                .with_order_descending(descending)
                .with_nulls_last(descending)
                .with_maintain_order(true),
        )?;
        let new_sheet = sheet.with_data(data, sheet.columns.clone());
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, ()))
    }

    fn transpile(&self, pre: &State, post: &State, _: &()) -> Result<Vec<ChunkKind>> {
        let (ascending, na_position) = match self.sort_direction {
            SortDirection::None => return Ok(Vec::new()),
            SortDirection::Ascending => ("True", "first"),
            SortDirection::Descending => ("False", "last"),
        };
        let sheet = pre.sheet(self.sheet_index)?;
        let df = &sheet.name;
        let header = sheet.header(&self.column_id)?;
        Ok(vec![ChunkKind::Block {
            display_name: "Sorted",
            description: format!(
                "Sorted {header} in {df} in {} order",
                if ascending == "True" { "ascending" } else { "descending" }
            ),
            statements: vec![format!(
                "{df} = {df}.sort_values(by={}, ascending={ascending}, na_position='{na_position}')",
                py_str(header)
            )],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepParams;
    use crate::steps::test_support::{code, run};
    use std::sync::Arc;

    fn sort(direction: SortDirection) -> StepParams {
        StepParams::Sort(SortParams {
            sheet_index: 0,
            column_id: "A".into(),
            sort_direction: direction,
        })
    }

    fn values(step: &crate::steps::Step) -> Vec<Option<i64>> {
        step.post_state.sheets()[0]
            .data
            .column("A")
            .expect("A")
            .i64()
            .expect("i64")
            .into_iter()
            .collect()
    }

    fn with_null() -> Arc<State> {
        let df = df!("A" => [Some(2i64), None, Some(1)]).expect("df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    #[test]
    fn test_ascending_puts_nulls_first() {
        let step = run(sort(SortDirection::Ascending), &with_null());
        assert_eq!(values(&step), vec![None, Some(1), Some(2)]);
        assert_eq!(
            code(&step),
            vec!["df1 = df1.sort_values(by='A', ascending=True, na_position='first')"]
        );
    }

    #[test]
    fn test_descending_puts_nulls_last() {
        let step = run(sort(SortDirection::Descending), &with_null());
        assert_eq!(values(&step), vec![Some(2), Some(1), None]);
    }

    #[test]
    fn test_none_direction_changes_nothing() {
        let step = run(sort(SortDirection::None), &with_null());
        assert!(step.code_chunks.is_empty());
    }
}
