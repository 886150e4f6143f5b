use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::ColumnId;
use crate::error::Result;
use crate::state::State;
use serde::{Deserialize, Serialize};

/// Move one column to a new position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderColumnParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_column_index: usize,
}

impl StepPerformer for ReorderColumnParams {
    /// Position the column ended up at, `None` when it did not move.
    type ExecutionData = Option<usize>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let current = sheet.column_index(&self.column_id)?;
        let target = self.new_column_index.min(sheet.data.width().saturating_sub(1));
        if current == target {
            return Ok((pre.clone(), None));
        }

        let mut order = sheet.headers();
        let moved = order.remove(current);
        order.insert(target, moved);
        let data = sheet.data.select(order)?;

        let new_sheet = sheet.with_data(data, sheet.columns.clone());
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, Some(target)))
    }

    fn transpile(
        &self,
        _pre: &State,
        post: &State,
        target: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        let sheet = post.sheet(self.sheet_index)?;
        let df = &sheet.name;
        let header = py_str(sheet.header(&self.column_id)?);
        Ok(vec![ChunkKind::Block {
            display_name: "Reordered column",
            description: format!(
                "Reordered column {} in {df}",
                sheet.header(&self.column_id)?
            ),
            statements: vec![
                format!("{df}_columns = [col for col in {df}.columns if col != {header}]"),
                format!("{df}_columns.insert({target}, {header})"),
                format!("{df} = {df}[{df}_columns]"),
            ],
            footprint: Footprint::default()
                .read(sheet.id, Columns::one(self.column_id.clone()))
                .write(sheet.id, Columns::All),
            outputs: vec![block_output(sheet)],
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
