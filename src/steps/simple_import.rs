//! Import one or more CSV files as new sheets.

use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_path;
use crate::code_chunks::{ChunkKind, Footprint};
use crate::column_headers::{ColumnIdMap, legacy_valid_header};
use crate::error::{ResultExt, Result, SheetError};
use crate::state::{SheetId, State};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleImportParams {
    pub file_names: Vec<String>,
    /// Issue ids the way analyses before 0.2.0 did.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_deprecated_id_algorithm: bool,
}

/// Read a CSV with the engine's usual inference settings.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    LazyCsvReader::new(path)
        .with_infer_schema_length(Some(10000))
        .with_has_header(true)
        .finish()
        .and_then(LazyFrame::collect)
        .with_context(|| format!("Failed to read CSV {}", path.display()))
}

fn df_name_base(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_owned()
}

impl StepPerformer for SimpleImportParams {
    /// Lineage ids of the sheets that were created, in file order.
    type ExecutionData = Vec<SheetId>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        if self.file_names.is_empty() {
            return Err(SheetError::invalid_params("no files to import"));
        }
        let mut post = pre.clone();
        let mut created = Vec::with_capacity(self.file_names.len());
        for file_name in &self.file_names {
            let data = read_csv(Path::new(file_name))?;
            let name = post.unique_df_name(&df_name_base(file_name));
            let mut sheet = post.mint_sheet(name, data);
            if self.use_deprecated_id_algorithm {
                let mut columns = ColumnIdMap::default();
                for header in sheet.headers() {
                    columns.insert_with_id(legacy_valid_header(&header).as_str().into(), header);
                }
                sheet.columns = columns;
            }
            created.push(sheet.id);
            post.push_sheet(sheet);
        }
        Ok((post, created))
    }

    fn transpile(
        &self,
        _pre: &State,
        post: &State,
        created: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let mut statements = Vec::new();
        let mut outputs = Vec::new();
        let mut footprint = Footprint::default();
        for (file_name, sheet_id) in self.file_names.iter().zip(created) {
            let sheet = post
                .sheet_by_id(*sheet_id)
                .ok_or_else(|| SheetError::Other(format!("imported {sheet_id} is missing")))?;
            statements.push(format!("{} = pd.read_csv({})", sheet.name, py_path(file_name)));
            outputs.push(block_output(sheet));
            footprint = footprint.create(*sheet_id);
        }
        let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
        Ok(vec![ChunkKind::Block {
            display_name: "Imported",
            description: format!("Imported {}", names.join(", ")),
            statements,
            footprint,
            outputs,
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        Vec::new()
    }
}
