use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Add one 0/1 column per distinct value of a column, right after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncodingParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
}

/// Distinct non-null values of `header`, sorted, as text.
fn distinct_values(data: &DataFrame, header: &str) -> Result<Vec<String>> {
    let values = data
        .select([header])?
        .lazy()
        .drop_nulls(None)
        .unique_stable(None, UniqueKeepStrategy::First)
        .sort([header], SortMultipleOptions::default())
        .select([col(header).cast(DataType::String)])
        .collect()?;
    Ok(values
        .column(header)?
        .str()?
        .into_iter()
        .flatten()
        .map(ToOwned::to_owned)
        .collect())
}

impl StepPerformer for OneHotEncodingParams {
    /// Ids of the new columns, in order.
    type ExecutionData = Vec<ColumnId>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?;
        let position = sheet.column_index(&self.column_id)?;
        let values = distinct_values(&sheet.data, header)?;

        let existing: Vec<&str> = values
            .iter()
            .filter(|v| sheet.columns.id(v).is_some())
            .map(String::as_str)
            .collect();
        if !existing.is_empty() {
            return Err(SheetError::execution(
                ExecutionErrorKind::DuplicateValue,
                format!("Column headers {} already exist", existing.join(", ")),
            ));
        }

        let dummies: Vec<Expr> = values
            .iter()
            .map(|v| {
                col(header)
                    .cast(DataType::String)
                    .eq(lit(v.as_str()))
                    .fill_null(lit(false))
                    .cast(DataType::UInt8)
                    .alias(v.as_str())
            })
            .collect();
        let mut order: Vec<ColumnHeader> = sheet.headers();
        order.splice(position + 1..position + 1, values.iter().cloned());
        let data = sheet
            .data
            .clone()
            .lazy()
            .with_columns(dummies)
            .select(order.iter().map(|h| col(h.as_str())).collect::<Vec<_>>())
            .collect()?;

        let mut columns = sheet.columns.clone();
        let ids = values.into_iter().map(|v| columns.insert(v)).collect();
        let new_sheet = sheet.with_data(data, columns);
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, ids))
    }

    fn transpile(
        &self,
        pre: &State,
        post: &State,
        new_ids: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let sheet = pre.sheet(self.sheet_index)?;
        let df = &sheet.name;
        let header = sheet.header(&self.column_id)?;
        let split = sheet.column_index(&self.column_id)? + 1;
        Ok(vec![ChunkKind::Block {
            display_name: "One hot encoded",
            description: format!("One hot encoded {header} in {df}"),
            statements: vec![
                format!("tmp_df = pd.get_dummies({df}[{}], dtype='uint8')", py_str(header)),
                "tmp_df.columns = tmp_df.columns.astype(str)".to_owned(),
                format!(
                    "{df} = pd.concat([{df}.iloc[:, :{split}], tmp_df, {df}.iloc[:, {split}:]], axis=1)"
                ),
            ],
            footprint: Footprint::default()
                .read(sheet.id, Columns::All)
                .write(sheet.id, Columns::many(new_ids.iter().cloned())),
            outputs: vec![block_output(post.sheet(self.sheet_index)?)],
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
