use super::{StepPerformer, block_output};
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::ColumnHeader;
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Use the values of one row as the headers, then drop that row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteRowToHeaderParams {
    pub sheet_index: usize,
    pub row_index: usize,
}

fn row_as_headers(data: &DataFrame, row: usize) -> Result<Vec<ColumnHeader>> {
    data.get_columns()
        .iter()
        .map(|column| {
            let text = column.cast(&DataType::String)?;
            Ok(text
                .str()?
                .get(row)
                .map_or_else(|| "nan".to_owned(), ToOwned::to_owned))
        })
        .collect()
}

impl StepPerformer for PromoteRowToHeaderParams {
    type ExecutionData = ();

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let height = sheet.data.height();
        if self.row_index >= height {
            return Err(SheetError::invalid_params(format!(
                "row {} does not exist in {}",
                self.row_index, sheet.name
            )));
        }
        let headers = row_as_headers(&sheet.data, self.row_index)?;
        for (i, header) in headers.iter().enumerate() {
            if headers[..i].contains(header) {
                return Err(SheetError::execution(
                    ExecutionErrorKind::DuplicateValue,
                    format!("row {} repeats the header {header}", self.row_index),
                ));
            }
        }

        let row = i64::try_from(self.row_index)
            .map_err(|_| SheetError::invalid_params("row index is too large"))?;
        let mut data = sheet.data.slice(0, self.row_index);
        data.vstack_mut(&sheet.data.slice(row + 1, height))?;
        data.set_column_names(headers.iter().map(String::as_str))?;

        // New headers may swap with old ones, so unmap everything before remapping.
        let mut columns = sheet.columns.clone();
        let ids = sheet.column_ids();
        for id in &ids {
            columns.remove(id);
        }
        for (id, header) in ids.into_iter().zip(&headers) {
            columns.insert_with_id(id, header.clone());
        }
        let new_sheet = sheet.with_data(data, columns);
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, ()))
    }

    fn transpile(&self, pre: &State, post: &State, _: &()) -> Result<Vec<ChunkKind>> {
        let sheet = pre.sheet(self.sheet_index)?;
        let df = &sheet.name;
        let row = self.row_index;
        Ok(vec![ChunkKind::Block {
            display_name: "Promoted row to header",
            description: format!("Promoted {row} to header in {df}"),
            statements: vec![
                format!("{df}.columns = {df}.iloc[{row}].astype(str)"),
                format!("{df}.drop({df}.index[{row}], axis=0, inplace=True)"),
            ],
            footprint: Footprint::default()
                .read(sheet.id, Columns::All)
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

    fn raw() -> Arc<State> {
        let df = df!(
            "column_1" => ["name", "ann", "bob"],
            "column_2" => ["age", "31", "42"]
        )
        .expect("df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    #[test]
    fn test_first_row_becomes_headers() {
        let step = run(
            StepParams::PromoteRowToHeader(PromoteRowToHeaderParams {
                sheet_index: 0,
                row_index: 0,
            }),
            &raw(),
        );
        let sheet = &step.post_state.sheets()[0];
        assert_eq!(sheet.headers(), vec!["name", "age"]);
        assert_eq!(sheet.data.height(), 2);
        assert_eq!(sheet.columns.header(&"column_1".into()), Some("name"));
        assert_eq!(
            code(&step),
            vec![
                "df1.columns = df1.iloc[0].astype(str)",
                "df1.drop(df1.index[0], axis=0, inplace=True)",
            ]
        );
    }

    #[test]
    fn test_missing_row_is_invalid() {
        let err = PromoteRowToHeaderParams {
            sheet_index: 0,
            row_index: 3,
        }
        .execute(&raw())
        .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
    }
}
