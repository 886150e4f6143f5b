//! Write sheets out as CSV or Excel files.
//!
//! Export is the one step whose effect lives outside the dataframes: the files
//! are written during execution, the state is passed through unchanged, and the
//! emitted block is never optimized away.

use super::StepPerformer;
use crate::code_chunks::python::py_path;
use crate::code_chunks::{ChunkKind, Columns, Footprint};
use crate::error::{Result, ResultExt, SheetError};
use crate::excel::{self, ExportSheet};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Csv,
    Excel,
}

impl ExportType {
    fn default_extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "xlsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportToFileParams {
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub sheet_indexes: Vec<usize>,
    pub file_name: String,
    /// Carry header, row and conditional formatting into Excel exports.
    #[serde(default)]
    pub export_formatting: bool,
}

impl ExportToFileParams {
    fn base_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.file_name);
        if path.extension().is_some() {
            path
        } else {
            path.with_extension(self.export_type.default_extension())
        }
    }

    /// Files written, in order. Excel always writes one workbook; CSV writes one
    /// file per sheet, suffixed with the sheet index when there are several.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let base = self.base_path();
        match self.export_type {
            ExportType::Excel => vec![base],
            ExportType::Csv if self.sheet_indexes.len() <= 1 => vec![base],
            ExportType::Csv => {
                let stem = base
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_owned();
                let ext = base
                    .extension()
                    .and_then(|s| s.to_str())
                    .unwrap_or("csv")
                    .to_owned();
                self.sheet_indexes
                    .iter()
                    .map(|index| base.with_file_name(format!("{stem}_{index}.{ext}")))
                    .collect()
            }
        }
    }
}

/// Write to a sibling temp file first so a failed export never leaves a
/// half-written file at `path`.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("tmp");
    let temp_path = path.with_file_name(format!(".sheetstep_export_{}.{ext}", Uuid::new_v4()));
    if let Err(e) = write(&temp_path) {
        std::fs::remove_file(&temp_path).ok();
        return Err(e);
    }
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to move export into {}", path.display()))
}

fn write_csv(df: &DataFrame, path: &Path) -> Result<()> {
    write_atomically(path, |temp| {
        let mut df = df.clone();
        let file = std::fs::File::create(temp).context("Failed to create CSV file")?;
        CsvWriter::new(file)
            .include_header(true)
            .finish(&mut df)
            .context("Failed to write CSV file")
    })
}

impl StepPerformer for ExportToFileParams {
    type ExecutionData = ();

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        if self.sheet_indexes.is_empty() {
            return Err(SheetError::invalid_params("no sheets to export"));
        }
        if self.file_name.trim().is_empty() {
            return Err(SheetError::invalid_params("export needs a file name"));
        }
        let sheets = self
            .sheet_indexes
            .iter()
            .map(|index| pre.sheet(*index))
            .collect::<Result<Vec<_>>>()?;
        let paths = self.file_paths();

        match self.export_type {
            ExportType::Csv => {
                for (sheet, path) in sheets.iter().zip(&paths) {
                    write_csv(&sheet.data, path)?;
                    tracing::info!(df = %sheet.name, path = %path.display(), "exported CSV");
                }
            }
            ExportType::Excel => {
                let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
                let tab_names = excel::sheet_names(&names);
                let plans = if self.export_formatting {
                    sheets
                        .iter()
                        .zip(&tab_names)
                        .map(|(sheet, tab)| excel::plan(tab, sheet).map(Some))
                        .collect::<Result<Vec<_>>>()?
                } else {
                    vec![None; sheets.len()]
                };
                let exports: Vec<ExportSheet<'_>> = sheets
                    .iter()
                    .zip(&tab_names)
                    .zip(&plans)
                    .map(|((sheet, tab_name), plan)| ExportSheet {
                        tab_name,
                        sheet,
                        formatting: plan.as_ref(),
                    })
                    .collect();
                let path = paths
                    .first()
                    .ok_or_else(|| SheetError::invalid_params("export needs a file name"))?;
                write_atomically(path, |temp| excel::write_workbook(temp, &exports))?;
                tracing::info!(sheets = exports.len(), path = %path.display(), "exported workbook");
            }
        }
        Ok((pre.clone(), ()))
    }

    fn transpile(&self, pre: &State, _post: &State, _: &()) -> Result<Vec<ChunkKind>> {
        let sheets = self
            .sheet_indexes
            .iter()
            .map(|index| pre.sheet(*index))
            .collect::<Result<Vec<_>>>()?;
        let paths = self.file_paths();
        let mut footprint = Footprint::default();
        for sheet in &sheets {
            footprint = footprint.read(sheet.id, Columns::All);
        }
        let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();

        let statements = match self.export_type {
            ExportType::Csv => sheets
                .iter()
                .zip(&paths)
                .map(|(sheet, path)| {
                    format!(
                        "{}.to_csv({}, index=False)",
                        sheet.name,
                        py_path(&path.to_string_lossy())
                    )
                })
                .collect(),
            ExportType::Excel => {
                let path = paths.first().map(|p| p.to_string_lossy().into_owned());
                let mut lines = vec![format!(
                    "with pd.ExcelWriter({}, engine=\"openpyxl\") as writer:",
                    py_path(path.as_deref().unwrap_or_default())
                )];
                let tab_names = excel::sheet_names(&names);
                for (sheet, tab_name) in sheets.iter().zip(&tab_names) {
                    lines.push(format!(
                        "    {}.to_excel(writer, sheet_name={}, index=False)",
                        sheet.name,
                        serde_json::to_string(tab_name)?
                    ));
                }
                if self.export_formatting {
                    for (sheet, tab_name) in sheets.iter().zip(&tab_names) {
                        if let Some(code) = excel::formatting_code(tab_name, &sheet.name, sheet)? {
                            lines.push(code);
                        }
                    }
                }
                lines
            }
        };

        Ok(vec![ChunkKind::Block {
            display_name: "Exported",
            description: format!("Exported {} to {}", names.join(", "), self.file_name),
            statements,
            footprint,
            outputs: Vec::new(),
            keep: true,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        Vec::new()
    }
}
