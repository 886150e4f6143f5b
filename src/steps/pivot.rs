//! Pivot tables.
//!
//! The engine computes a pivot as one `group_by` over the row keys. Every
//! `(value column, aggregation, column-key combination)` becomes one
//! aggregation expression restricted to the rows of that combination, so the
//! wide result comes out of a single pass without a reshape.

use super::{StepPerformer, block_output};
use crate::code_chunks::python::{py_str, py_str_list};
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::{ColumnHeader, ColumnId, ColumnIdMap};
use crate::error::{Result, SheetError};
use crate::state::{Sheet, SheetId, State};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "count unique")]
    CountUnique,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "mean")]
    Mean,
    #[serde(rename = "median")]
    Median,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "std")]
    Std,
}

impl AggregationType {
    /// Name pandas uses for the aggregation, which is also what the headers show.
    pub fn pandas_name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountUnique => "nunique",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
        }
    }

    fn apply(self, values: Expr) -> Expr {
        match self {
            Self::Count => values.count(),
            Self::CountUnique => values.drop_nulls().n_unique(),
            Self::Sum => values.sum(),
            Self::Mean => values.mean(),
            Self::Median => values.median(),
            Self::Min => values.min(),
            Self::Max => values.max(),
            Self::Std => values.std(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotParams {
    pub sheet_index: usize,
    pub pivot_rows_column_ids: Vec<ColumnId>,
    #[serde(default)]
    pub pivot_columns_column_ids: Vec<ColumnId>,
    pub values_column_ids_map: BTreeMap<ColumnId, Vec<AggregationType>>,
    /// Multi-level headers are always flattened; kept for the saved format.
    #[serde(default = "default_true")]
    pub flatten_column_headers: bool,
    /// Overwrite this sheet instead of creating a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_sheet_index: Option<usize>,
    /// Join header parts with `_` like analyses before 0.2.0 did.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_deprecated_id_algorithm: bool,
}

fn default_true() -> bool {
    true
}

/// Resolved column names for one pivot.
struct Layout {
    rows: Vec<ColumnHeader>,
    columns: Vec<ColumnHeader>,
    values: Vec<(ColumnHeader, Vec<AggregationType>)>,
}

impl PivotParams {
    fn layout(&self, sheet: &Sheet) -> Result<Layout> {
        if self.pivot_rows_column_ids.is_empty() {
            return Err(SheetError::invalid_params("a pivot table needs at least one row"));
        }
        if self.values_column_ids_map.values().all(Vec::is_empty) {
            return Err(SheetError::invalid_params("a pivot table needs at least one value"));
        }
        let rows = sheet.headers_for(&self.pivot_rows_column_ids)?;
        let columns = sheet.headers_for(&self.pivot_columns_column_ids)?;
        let mut values = Vec::new();
        for (id, aggs) in &self.values_column_ids_map {
            if aggs.is_empty() {
                continue;
            }
            if self.pivot_rows_column_ids.contains(id) || self.pivot_columns_column_ids.contains(id)
            {
                return Err(SheetError::invalid_params(format!(
                    "column '{id}' cannot be both a pivot key and a value"
                )));
            }
            values.push((sheet.header(id)?.to_owned(), aggs.clone()));
        }
        Ok(Layout {
            rows,
            columns,
            values,
        })
    }

    fn flatten(&self, parts: &[&str]) -> ColumnHeader {
        parts.join(if self.use_deprecated_id_algorithm { "_" } else { " " })
    }
}

/// Sorted distinct column-key combinations, each rendered as one string.
fn column_keys(data: &DataFrame, columns: &[ColumnHeader]) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let as_text: Vec<Expr> = columns
        .iter()
        .map(|c| col(c.as_str()).cast(DataType::String))
        .collect();
    let keys = data
        .select(columns.iter().map(String::as_str))?
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .sort(
            columns.iter().map(String::as_str).collect::<Vec<_>>(),
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .select([concat_str(as_text, " ", false).alias("key")])
        .drop_nulls(None)
        .collect()?;
    Ok(keys
        .column("key")?
        .str()?
        .into_iter()
        .flatten()
        .map(ToOwned::to_owned)
        .collect())
}

fn key_expr(columns: &[ColumnHeader]) -> Expr {
    let as_text: Vec<Expr> = columns
        .iter()
        .map(|c| col(c.as_str()).cast(DataType::String))
        .collect();
    concat_str(as_text, " ", false)
}

impl StepPerformer for PivotParams {
    /// The sheet holding the result.
    type ExecutionData = SheetId;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let source = pre.sheet(self.sheet_index)?;
        let layout = self.layout(source)?;
        let keys = column_keys(&source.data, &layout.columns)?;

        let mut aggs = Vec::new();
        let mut headers = Vec::new();
        for (value, value_aggs) in &layout.values {
            for agg in value_aggs {
                if layout.columns.is_empty() {
                    let header = self.flatten(&[value, agg.pandas_name()]);
                    aggs.push(agg.apply(col(value.as_str())).alias(header.as_str()));
                    headers.push(header);
                    continue;
                }
                for key in &keys {
                    let in_combination = key_expr(&layout.columns).eq(lit(key.as_str()));
                    let present = in_combination.clone().cast(DataType::UInt32).sum().gt(lit(0));
                    let header = self.flatten(&[value, agg.pandas_name(), key]);
                    let cell = agg.apply(col(value.as_str()).filter(in_combination));
                    aggs.push(
                        when(present)
                            .then(cell)
                            .otherwise(lit(NULL))
                            .alias(header.as_str()),
                    );
                    headers.push(header);
                }
            }
        }

        let key_columns: Vec<Expr> = layout
            .rows
            .iter()
            .chain(&layout.columns)
            .map(|h| col(h.as_str()))
            .collect();
        let not_null = key_columns
            .iter()
            .map(|c| c.clone().is_not_null())
            .reduce(|a, b| a.and(b))
            .unwrap_or_else(|| lit(true));
        let row_exprs: Vec<Expr> = layout.rows.iter().map(|h| col(h.as_str())).collect();
        let data = source
            .data
            .clone()
            .lazy()
            .filter(not_null)
            .group_by(row_exprs)
            .agg(aggs)
            .sort(
                layout.rows.iter().map(String::as_str).collect::<Vec<_>>(),
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .collect()?;

        let mut post = pre.clone();
        let output_id = match self.destination_sheet_index {
            Some(destination) => {
                let target = pre.sheet(destination)?;
                let columns = ColumnIdMap::from_headers(layout.rows.iter().cloned().chain(headers));
                let mut sheet = target.with_data(data, columns);
                sheet.formulas.clear();
                post.replace_sheet(destination, sheet)?;
                target.id
            }
            None => {
                let name = post.unique_df_name(&format!("{}_pivot", source.name));
                let sheet = post.mint_sheet(name, data);
                let id = sheet.id;
                post.push_sheet(sheet);
                id
            }
        };
        Ok((post, output_id))
    }

    fn transpile(
        &self,
        pre: &State,
        post: &State,
        output_id: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let source = pre.sheet(self.sheet_index)?;
        let layout = self.layout(source)?;
        let output = post
            .sheet_by_id(*output_id)
            .ok_or_else(|| SheetError::Other(format!("pivot output {output_id} is missing")))?;

        let used: Vec<&ColumnHeader> = layout
            .rows
            .iter()
            .chain(&layout.columns)
            .chain(layout.values.iter().map(|(v, _)| v))
            .collect();
        let value_headers: Vec<&str> = layout.values.iter().map(|(v, _)| v.as_str()).collect();
        let aggfunc: Vec<String> = layout
            .values
            .iter()
            .map(|(v, aggs)| {
                let names: Vec<&str> = aggs.iter().map(|a| a.pandas_name()).collect();
                format!("{}: {}", py_str(v), py_str_list(&names))
            })
            .collect();

        let mut call = vec![format!("    index={},", py_str_list(&layout.rows))];
        if !layout.columns.is_empty() {
            call.push(format!("    columns={},", py_str_list(&layout.columns)));
        }
        call.push(format!("    values={},", py_str_list(&value_headers)));
        call.push(format!("    aggfunc={{{}}}", aggfunc.join(", ")));

        let flatten = if self.use_deprecated_id_algorithm {
            "'_'.join([str(c) for c in col]).strip('_')"
        } else {
            "flatten_column_header(col)"
        };
        let statements = vec![
            format!("tmp_df = {}[{}]", source.name, py_str_list(&used)),
            format!("pivot_table = tmp_df.pivot_table(\n{}\n)", call.join("\n")),
            format!(
                "pivot_table = pivot_table.set_axis([{flatten} for col in pivot_table.keys()], axis=1)"
            ),
            format!("{} = pivot_table.reset_index()", output.name),
        ];

        let reads: Vec<ColumnId> = self
            .pivot_rows_column_ids
            .iter()
            .chain(&self.pivot_columns_column_ids)
            .chain(self.values_column_ids_map.keys())
            .cloned()
            .collect();
        let mut footprint = Footprint::default().read(source.id, Columns::many(reads));
        footprint = match self.destination_sheet_index {
            Some(_) => footprint.write(output.id, Columns::All),
            None => footprint.create(output.id),
        };

        Ok(vec![ChunkKind::Block {
            display_name: "Pivoted",
            description: format!("Pivoted {} into {}", source.name, output.name),
            statements,
            footprint,
            outputs: vec![block_output(output)],
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        self.destination_sheet_index.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepParams;
    use crate::steps::test_support::{code, run};
    use std::sync::Arc;

    fn sales() -> Arc<State> {
        let df = df!(
            "Region" => ["east", "west", "east", "west", "east"],
            "Year" => [2020i64, 2020, 2021, 2021, 2021],
            "Units" => [1i64, 2, 3, 4, 5]
        )
        .expect("df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    fn pivot(columns: Vec<ColumnId>, destination: Option<usize>) -> PivotParams {
        PivotParams {
            sheet_index: 0,
            pivot_rows_column_ids: vec!["Region".into()],
            pivot_columns_column_ids: columns,
            values_column_ids_map: BTreeMap::from([(
                ColumnId::from("Units"),
                vec![AggregationType::Sum],
            )]),
            flatten_column_headers: true,
            destination_sheet_index: destination,
            use_deprecated_id_algorithm: false,
        }
    }

    fn i64s(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
        df.column(name)
            .expect("column")
            .i64()
            .expect("i64")
            .into_iter()
            .collect()
    }

    #[test]
    fn test_pivot_rows_only() {
        let step = run(StepParams::Pivot(pivot(Vec::new(), None)), &sales());
        let output = &step.post_state.sheets()[1];
        assert_eq!(output.name, "df1_pivot");
        assert_eq!(output.headers(), vec!["Region", "Units sum"]);
        assert_eq!(i64s(&output.data, "Units sum"), vec![Some(9), Some(6)]);
    }

    #[test]
    fn test_pivot_with_column_keys() {
        let step = run(StepParams::Pivot(pivot(vec!["Year".into()], None)), &sales());
        let output = &step.post_state.sheets()[1];
        assert_eq!(
            output.headers(),
            vec!["Region", "Units sum 2020", "Units sum 2021"]
        );
        assert_eq!(i64s(&output.data, "Units sum 2021"), vec![Some(8), Some(4)]);
        assert_eq!(
            code(&step),
            vec![
                "tmp_df = df1[['Region', 'Year', 'Units']]",
                "pivot_table = tmp_df.pivot_table(\n    index=['Region'],\n    columns=['Year'],\n    values=['Units'],\n    aggfunc={'Units': ['sum']}\n)",
                "pivot_table = pivot_table.set_axis([flatten_column_header(col) for col in pivot_table.keys()], axis=1)",
                "df1_pivot = pivot_table.reset_index()",
            ]
        );
    }

    #[test]
    fn test_pivot_into_existing_destination_keeps_sheet_identity() {
        let first = run(StepParams::Pivot(pivot(Vec::new(), None)), &sales());
        let again = run(
            StepParams::Pivot(pivot(vec!["Year".into()], Some(1))),
            &first.post_state,
        );
        assert_eq!(again.post_state.len(), 2);
        assert_eq!(again.post_state.sheets()[1].id, first.post_state.sheets()[1].id);
        assert_eq!(again.post_state.sheets()[1].name, "df1_pivot");
    }

    #[test]
    fn test_pivot_without_values_is_invalid() {
        let mut params = pivot(Vec::new(), None);
        params.values_column_ids_map.clear();
        assert_eq!(params.execute(&sales()).unwrap_err().error_kind(), "invalid_params");
    }
}
