//! Merge two sheets into a new one.

use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str_list;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::{Sheet, SheetId, State};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeHow {
    /// Left join against the first match of each key on the right.
    #[serde(rename = "lookup")]
    Lookup,
    #[serde(rename = "left")]
    Left,
    #[serde(rename = "right")]
    Right,
    #[serde(rename = "inner")]
    Inner,
    #[serde(rename = "outer")]
    Outer,
    /// Left rows whose key has no match on the right.
    #[serde(rename = "unique in left")]
    UniqueInLeft,
    /// Right rows whose key has no match on the left.
    #[serde(rename = "unique in right")]
    UniqueInRight,
}

impl MergeHow {
    fn pandas(self) -> &'static str {
        match self {
            Self::Lookup | Self::Left => "left",
            Self::Right => "right",
            Self::Inner => "inner",
            Self::Outer => "outer",
            Self::UniqueInLeft | Self::UniqueInRight => "left",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    pub how: MergeHow,
    pub sheet_index_one: usize,
    pub sheet_index_two: usize,
    /// `[left key, right key]` pairs.
    pub merge_key_column_ids: Vec<(ColumnId, ColumnId)>,
    pub selected_column_ids_one: Vec<ColumnId>,
    pub selected_column_ids_two: Vec<ColumnId>,
}

/// Headers taking part in the merge, and what each one is called afterwards.
struct Plan {
    left_keys: Vec<ColumnHeader>,
    right_keys: Vec<ColumnHeader>,
    /// `(input header, output header)` of selected left columns.
    left: Vec<(ColumnHeader, ColumnHeader)>,
    /// `(input header, output header)` of selected right columns. Right keys
    /// named like their left key are folded into the left one and left out.
    right: Vec<(ColumnHeader, ColumnHeader)>,
}

/// Selected ids with any missing keys put in front.
fn with_keys(selected: &[ColumnId], keys: impl Iterator<Item = ColumnId>) -> Vec<ColumnId> {
    let mut ids: Vec<ColumnId> = keys.filter(|k| !selected.contains(k)).collect();
    ids.extend(selected.iter().cloned());
    ids
}

impl MergeParams {
    fn sheets<'a>(&self, state: &'a State) -> Result<(&'a Sheet, &'a Sheet)> {
        Ok((
            state.sheet(self.sheet_index_one)?,
            state.sheet(self.sheet_index_two)?,
        ))
    }

    fn plan(&self, one: &Sheet, two: &Sheet) -> Result<Plan> {
        if self.merge_key_column_ids.is_empty() {
            return Err(SheetError::invalid_params("a merge needs at least one key"));
        }
        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();
        for (left_id, right_id) in &self.merge_key_column_ids {
            let (left_type, right_type) = (one.dtype(left_id)?, two.dtype(right_id)?);
            let compatible = left_type == right_type
                || (left_type.is_primitive_numeric() && right_type.is_primitive_numeric());
            if !compatible {
                return Err(SheetError::execution(
                    ExecutionErrorKind::TypeMismatch,
                    format!(
                        "merge keys {} and {} have incompatible types {left_type} and {right_type}",
                        one.header(left_id)?,
                        two.header(right_id)?
                    ),
                ));
            }
            left_keys.push(one.header(left_id)?.to_owned());
            right_keys.push(two.header(right_id)?.to_owned());
        }

        let left_ids = with_keys(
            &self.selected_column_ids_one,
            self.merge_key_column_ids.iter().map(|(l, _)| l.clone()),
        );
        let right_ids = with_keys(
            &self.selected_column_ids_two,
            self.merge_key_column_ids.iter().map(|(_, r)| r.clone()),
        );
        let left_headers = one.headers_for(&left_ids)?;
        let right_headers = two.headers_for(&right_ids)?;

        let folded = |h: &ColumnHeader| {
            left_keys
                .iter()
                .zip(&right_keys)
                .any(|(l, r)| l == h && r == h)
        };
        let left = left_headers
            .iter()
            .map(|h| {
                let out = if right_headers.contains(h) && !folded(h) {
                    format!("{h}_{}", one.name)
                } else {
                    h.clone()
                };
                (h.clone(), out)
            })
            .collect();
        let right = right_headers
            .iter()
            .filter(|h| !folded(h))
            .map(|h| {
                let out = if left_headers.contains(h) {
                    format!("{h}_{}", two.name)
                } else {
                    h.clone()
                };
                (h.clone(), out)
            })
            .collect();
        Ok(Plan {
            left_keys,
            right_keys,
            left,
            right,
        })
    }
}

fn left_key(i: usize) -> String {
    format!("__merge_left_key_{i}")
}

fn right_key(i: usize) -> String {
    format!("__merge_right_key_{i}")
}

/// Selected columns renamed to their output names, plus one hidden copy per key.
fn side(
    data: &DataFrame,
    columns: &[(ColumnHeader, ColumnHeader)],
    keys: &[ColumnHeader],
    key_name: fn(usize) -> String,
) -> LazyFrame {
    let mut exprs: Vec<Expr> = columns
        .iter()
        .map(|(input, output)| col(input.as_str()).alias(output.as_str()))
        .collect();
    exprs.extend(
        keys.iter()
            .enumerate()
            .map(|(i, k)| col(k.as_str()).alias(key_name(i).as_str())),
    );
    data.clone().lazy().select(exprs)
}

fn key_exprs(count: usize, key_name: fn(usize) -> String) -> Vec<Expr> {
    (0..count).map(|i| col(key_name(i).as_str())).collect()
}

fn merged(plan: &Plan, how: MergeHow, one: &Sheet, two: &Sheet) -> Result<DataFrame> {
    let n = plan.left_keys.len();
    let mut left = side(&one.data, &plan.left, &plan.left_keys, left_key);
    let mut right = side(&two.data, &plan.right, &plan.right_keys, right_key);

    let join_type = match how {
        MergeHow::UniqueInLeft => JoinType::Anti,
        MergeHow::UniqueInRight => {
            std::mem::swap(&mut left, &mut right);
            JoinType::Anti
        }
        MergeHow::Lookup => {
            let keys: Vec<PlSmallStr> = (0..n).map(|i| right_key(i).into()).collect();
            right = right.unique_stable(Some(keys), UniqueKeepStrategy::First);
            JoinType::Left
        }
        MergeHow::Left => JoinType::Left,
        MergeHow::Right => JoinType::Right,
        MergeHow::Inner => JoinType::Inner,
        MergeHow::Outer => JoinType::Full,
    };
    let (left_on, right_on) = match how {
        MergeHow::UniqueInRight => (key_exprs(n, right_key), key_exprs(n, left_key)),
        _ => (key_exprs(n, left_key), key_exprs(n, right_key)),
    };
    let joined = left.join(
        right,
        left_on,
        right_on,
        JoinArgs::new(join_type).with_coalesce(JoinCoalesce::KeepColumns),
    );

    // Unique-in-one-side merges keep that side's columns under their own names.
    let output: Vec<Expr> = match how {
        MergeHow::UniqueInLeft => plan
            .left
            .iter()
            .map(|(input, output)| col(output.as_str()).alias(input.as_str()))
            .collect(),
        MergeHow::UniqueInRight => {
            let mut exprs: Vec<Expr> = plan
                .right
                .iter()
                .map(|(input, output)| col(output.as_str()).alias(input.as_str()))
                .collect();
            for (i, key) in plan.right_keys.iter().enumerate() {
                if !plan.right.iter().any(|(input, _)| input == key) {
                    exprs.insert(0, col(right_key(i).as_str()).alias(key.as_str()));
                }
            }
            exprs
        }
        _ => {
            let mut exprs = Vec::new();
            for (input, output) in &plan.left {
                let folded_key = plan
                    .left_keys
                    .iter()
                    .zip(&plan.right_keys)
                    .position(|(l, r)| l == input && r == input && input == output);
                exprs.push(match folded_key {
                    Some(i) => when(col(left_key(i).as_str()).is_null())
                        .then(col(right_key(i).as_str()))
                        .otherwise(col(left_key(i).as_str()))
                        .alias(output.as_str()),
                    None => col(output.as_str()),
                });
            }
            exprs.extend(plan.right.iter().map(|(_, output)| col(output.as_str())));
            exprs
        }
    };
    let mut result = joined.select(output);
    if how == MergeHow::Outer {
        let keys: Vec<&str> = plan
            .left
            .iter()
            .filter(|(input, _)| plan.left_keys.contains(input))
            .map(|(_, output)| output.as_str())
            .collect();
        if !keys.is_empty() {
            result = result.sort(
                keys,
                SortMultipleOptions::default()
                    .with_maintain_order(true)
                    .with_nulls_last(true),
            );
        }
    }
    Ok(result.collect()?)
}

impl StepPerformer for MergeParams {
    /// The sheet holding the result.
    type ExecutionData = SheetId;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let (one, two) = self.sheets(pre)?;
        let plan = self.plan(one, two)?;
        let data = merged(&plan, self.how, one, two)?;

        let mut post = pre.clone();
        let name = post.unique_df_name("df_merge");
        let sheet = post.mint_sheet(name, data);
        let id = sheet.id;
        post.push_sheet(sheet);
        Ok((post, id))
    }

    fn transpile(
        &self,
        pre: &State,
        post: &State,
        output_id: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let (one, two) = self.sheets(pre)?;
        let plan = self.plan(one, two)?;
        let output = post
            .sheet_by_id(*output_id)
            .ok_or_else(|| SheetError::Other(format!("merge output {output_id} is missing")))?;
        let out = &output.name;

        let left_cols: Vec<&str> = plan.left.iter().map(|(h, _)| h.as_str()).collect();
        let mut right_cols: Vec<&str> = plan.right.iter().map(|(h, _)| h.as_str()).collect();
        for key in plan.right_keys.iter().rev() {
            if !right_cols.contains(&key.as_str()) {
                right_cols.insert(0, key.as_str());
            }
        }
        let (left_on, right_on) = (py_str_list(&plan.left_keys), py_str_list(&plan.right_keys));

        let statements = match self.how {
            MergeHow::UniqueInLeft | MergeHow::UniqueInRight => {
                let (this, this_cols, this_on, other, other_keys, other_on) =
                    if self.how == MergeHow::UniqueInLeft {
                        (one, &left_cols, &left_on, two, &plan.right_keys, &right_on)
                    } else {
                        (two, &right_cols, &right_on, one, &plan.left_keys, &left_on)
                    };
                vec![
                    format!(
                        "bool_index_array = {}.merge({}[{}].drop_duplicates(), left_on={this_on}, right_on={other_on}, how='left', indicator=True)['_merge'] == 'left_only'",
                        this.name,
                        other.name,
                        py_str_list(other_keys),
                    ),
                    format!(
                        "{out} = {}[{}][bool_index_array.values].reset_index(drop=True)",
                        this.name,
                        py_str_list(this_cols),
                    ),
                ]
            }
            how => {
                let mut statements = Vec::new();
                let right_source = if how == MergeHow::Lookup {
                    statements.push(format!(
                        "temp_df = {}.drop_duplicates(subset={right_on})",
                        two.name
                    ));
                    "temp_df"
                } else {
                    two.name.as_str()
                };
                statements.push(format!(
                    "{out} = {}[{}].merge({right_source}[{}], left_on={left_on}, right_on={right_on}, how='{}', suffixes=['_{}', '_{}'])",
                    one.name,
                    py_str_list(&left_cols),
                    py_str_list(&right_cols),
                    how.pandas(),
                    one.name,
                    two.name,
                ));
                statements
            }
        };

        let reads_one: Vec<ColumnId> = with_keys(
            &self.selected_column_ids_one,
            self.merge_key_column_ids.iter().map(|(l, _)| l.clone()),
        );
        let reads_two: Vec<ColumnId> = with_keys(
            &self.selected_column_ids_two,
            self.merge_key_column_ids.iter().map(|(_, r)| r.clone()),
        );
        Ok(vec![ChunkKind::Block {
            display_name: "Merged",
            description: format!("Merged {} and {} into {out}", one.name, two.name),
            statements,
            footprint: Footprint::default()
                .read(one.id, Columns::many(reads_one))
                .read(two.id, Columns::many(reads_two))
                .create(output.id),
            outputs: vec![block_output(output)],
            keep: false,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        Vec::new()
    }
}
