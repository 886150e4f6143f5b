//! Bridge for analyses saved before column ids existed.
//!
//! Old analyses only ever saw headers made of letters, digits and
//! underscores. This step rewrites every header into that form so that the
//! header text stored in legacy params resolves, and re-keys changed columns
//! so their id is their new header.

use super::{StepPerformer, block_output};
use crate::code_chunks::python::py_str;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::column_headers::{ColumnHeader, legacy_valid_header};
use crate::error::Result;
use crate::formula::rename_references;
use crate::state::{SheetId, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOldRenameParams {
    /// Also reset every column id to its header, as analyses before 0.2.0 expect.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub move_to_deprecated_id_algorithm: bool,
}

/// Headers renamed in one sheet, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRenames {
    pub sheet: SheetId,
    pub renames: Vec<(ColumnHeader, ColumnHeader)>,
}

/// Legacy form of `header` that does not collide with `taken`.
fn unused_legacy_header(header: &str, taken: &BTreeSet<ColumnHeader>) -> ColumnHeader {
    let base = legacy_valid_header(header);
    if !taken.contains(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base)
}

impl StepPerformer for BulkOldRenameParams {
    type ExecutionData = Vec<SheetRenames>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let mut post = pre.clone();
        let mut all_renames = Vec::new();
        for (index, sheet) in pre.sheets().iter().enumerate() {
            let headers = sheet.headers();
            let mut taken: BTreeSet<ColumnHeader> = headers.iter().cloned().collect();
            let mut renames = Vec::new();
            for header in &headers {
                if legacy_valid_header(header) == *header {
                    continue;
                }
                taken.remove(header);
                let new_header = unused_legacy_header(header, &taken);
                taken.insert(new_header.clone());
                renames.push((header.clone(), new_header));
            }
            if renames.is_empty() && !self.move_to_deprecated_id_algorithm {
                continue;
            }

            let mut data = sheet.data.clone();
            let mut columns = sheet.columns.clone();
            let mut formulas = sheet.formulas.clone();
            let names: Vec<String> = data
                .get_column_names()
                .into_iter()
                .map(|name| {
                    renames
                        .iter()
                        .find(|(old, _)| old.as_str() == name.as_str())
                        .map_or_else(|| name.to_string(), |(_, new)| new.clone())
                })
                .collect();
            data.set_column_names(names.iter().map(String::as_str))?;
            for (old, new) in &renames {
                if let Some(id) = columns.id(old).cloned()
                    && let Some(new_id) = columns.rekey(&id, new.clone())
                    && let Some(formula) = formulas.remove(&id)
                {
                    formulas.insert(new_id, formula);
                }
                for formula in formulas.values_mut() {
                    *formula = rename_references(formula, old, new);
                }
            }
            if self.move_to_deprecated_id_algorithm {
                let by_header: Vec<(ColumnHeader, String)> = data
                    .get_column_names()
                    .into_iter()
                    .map(|h| {
                        let formula = columns
                            .id(h.as_str())
                            .map(|id| formulas.get(id).cloned().unwrap_or_default())
                            .unwrap_or_default();
                        (h.to_string(), formula)
                    })
                    .collect();
                columns.reset_to_headers(by_header.iter().map(|(h, _)| h.clone()));
                formulas = by_header
                    .into_iter()
                    .filter(|(_, f)| !f.is_empty())
                    .filter_map(|(h, f)| columns.id(&h).cloned().map(|id| (id, f)))
                    .collect();
            }

            let mut renamed = sheet.with_data(data, columns);
            renamed.formulas = formulas;
            post.replace_sheet(index, renamed)?;
            if !renames.is_empty() {
                all_renames.push(SheetRenames {
                    sheet: sheet.id,
                    renames,
                });
            }
        }
        Ok((post, all_renames))
    }

    fn transpile(
        &self,
        _pre: &State,
        post: &State,
        renamed: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        if renamed.is_empty() {
            return Ok(Vec::new());
        }
        let mut statements = Vec::new();
        let mut outputs = Vec::new();
        let mut footprint = Footprint::default();
        for SheetRenames { sheet, renames } in renamed {
            let Some(after) = post.sheet_by_id(*sheet) else {
                continue;
            };
            let pairs: Vec<String> = renames
                .iter()
                .map(|(old, new)| format!("{}: {}", py_str(old), py_str(new)))
                .collect();
            statements.push(format!(
                "{}.rename(columns={{{}}}, inplace=True)",
                after.name,
                pairs.join(", ")
            ));
            footprint = footprint.write(*sheet, Columns::All);
            outputs.push(block_output(after));
        }
        Ok(vec![ChunkKind::Block {
            display_name: "Renamed headers",
            description: "Renamed headers for compatibility with previous versions".to_owned(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_headers::ColumnId;
    use crate::steps::StepParams;
    use crate::steps::test_support::{code, run};
    use polars::prelude::*;
    use std::sync::Arc;

    fn state(headers: &[&str]) -> Arc<State> {
        let columns = headers
            .iter()
            .map(|h| Column::new((*h).into(), [1i64, 2]))
            .collect();
        let df = DataFrame::new(columns).expect("df");
        Arc::new(State::from_inputs(vec![("df1".to_owned(), df)]).expect("state"))
    }

    #[test]
    fn test_headers_are_made_legacy_safe() {
        let step = run(
            StepParams::BulkOldRename(BulkOldRenameParams::default()),
            &state(&["first name", "ok", "2nd"]),
        );
        let sheet = &step.post_state.sheets()[0];
        assert_eq!(sheet.headers(), vec!["first_name", "ok", "c_2nd"]);
        assert_eq!(
            sheet.columns.id("first_name"),
            Some(&ColumnId::from("first_name"))
        );
        assert_eq!(
            code(&step),
            vec!["df1.rename(columns={'first name': 'first_name', '2nd': 'c_2nd'}, inplace=True)"]
        );
    }

    #[test]
    fn test_clean_headers_emit_nothing() {
        let step = run(
            StepParams::BulkOldRename(BulkOldRenameParams {
                move_to_deprecated_id_algorithm: true,
            }),
            &state(&["A", "B"]),
        );
        assert!(step.code_chunks.is_empty());
        assert_eq!(step.post_state.sheets()[0].headers(), vec!["A", "B"]);
    }

    #[test]
    fn test_collisions_get_suffix() {
        let step = run(
            StepParams::BulkOldRename(BulkOldRenameParams::default()),
            &state(&["a b", "a_b"]),
        );
        assert_eq!(step.post_state.sheets()[0].headers(), vec!["a_b_1", "a_b"]);
    }

    #[test]
    fn test_formula_after_legacy_rename_replaces_column() {
        let renamed = run(
            StepParams::BulkOldRename(BulkOldRenameParams::default()),
            &state(&["first name"]),
        );
        let formula = run(
            StepParams::SetColumnFormula(crate::steps::SetColumnFormulaParams {
                sheet_index: 0,
                column_id: "first_name".into(),
                new_formula: "=1".to_owned(),
                old_formula: None,
            }),
            &renamed.post_state,
        );
        let sheet = &formula.post_state.sheets()[0];
        assert_eq!(sheet.data.width(), 1);
        assert_eq!(sheet.headers(), vec!["first_name"]);
    }
}
