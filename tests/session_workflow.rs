//! End-to-end tests for editing sessions
//!
//! These drive a `StepsManager` the way a front-end would and check the
//! resulting sheets, the generated script and the files written on export.

use polars::prelude::*;
use pretty_assertions::assert_eq;
use sheetstep::config::EngineSettings;
use sheetstep::excel::{self, ConditionalRule, NamedStyle};
use sheetstep::filter::{Condition, Filter};
use sheetstep::optimizer::{column_layout, input_layout};
use sheetstep::saved_analysis::SavedAnalysis;
use sheetstep::state::{ColorFormat, ConditionalFormat, DataframeFormat};
use sheetstep::steps::{
    AddColumnParams, DataframeDeleteParams, DataframeRenameParams, DeleteColumnParams, ExportToFileParams, ExportType,
    RenameColumnParams, SetColumnFormulaParams, SetDataframeFormatParams, SimpleImportParams,
    SortDirection, SortParams, StepParams,
};
use sheetstep::steps_manager::StepsManager;
use std::path::Path;
use std::sync::Arc;

fn settings() -> EngineSettings {
    EngineSettings {
        verify_optimization: true,
        ..EngineSettings::default()
    }
}

fn session(df: DataFrame) -> StepsManager {
    StepsManager::with_settings(vec![("df1".to_owned(), df)], settings()).expect("session")
}

fn add_column(header: &str) -> StepParams {
    StepParams::AddColumn(AddColumnParams {
        sheet_index: 0,
        column_header: header.to_owned(),
        column_header_index: -1,
    })
}

fn insert_column(header: &str, index: i64) -> StepParams {
    StepParams::AddColumn(AddColumnParams {
        sheet_index: 0,
        column_header: header.to_owned(),
        column_header_index: index,
    })
}

fn set_formula(column_id: &str, formula: &str) -> StepParams {
    StepParams::SetColumnFormula(SetColumnFormulaParams {
        sheet_index: 0,
        column_id: column_id.into(),
        new_formula: formula.to_owned(),
        old_formula: None,
    })
}

fn delete_columns(column_ids: &[&str]) -> StepParams {
    StepParams::DeleteColumn(DeleteColumnParams {
        sheet_index: 0,
        column_ids: column_ids.iter().map(|id| (*id).into()).collect(),
    })
}

fn import(path: &Path) -> StepParams {
    StepParams::SimpleImport(SimpleImportParams {
        file_names: vec![path.to_string_lossy().into_owned()],
        use_deprecated_id_algorithm: false,
    })
}

fn statements(manager: &StepsManager) -> Vec<String> {
    manager
        .steps()
        .iter()
        .flat_map(|step| &step.code_chunks)
        .flat_map(|chunk| chunk.code())
        .collect()
}

fn assert_same_frames(a: &StepsManager, b: &StepsManager) {
    let (a, b) = (a.current_state(), b.current_state());
    assert_eq!(a.df_names(), b.df_names());
    for (left, right) in a.dataframes().into_iter().zip(b.dataframes()) {
        assert!(left.equals_missing(right), "{left} != {right}");
    }
}

#[test]
fn test_add_formula_delete_leaves_no_trace() {
    let mut manager = session(df!("A" => [1i64]).expect("df"));
    manager.push(add_column("B")).expect("add");
    manager.push(set_formula("B", "=10")).expect("formula");
    manager.push(delete_columns(&["B"])).expect("delete");

    let final_df = &manager.current_state().sheets()[0].data;
    assert!(final_df.equals(&df!("A" => [1i64]).expect("df")));
    assert!(manager.transpiled_code().is_empty());
    assert_eq!(manager.optimization_report().chunks_before, 3);
}

#[test]
fn test_deleting_added_and_input_columns_is_one_drop() {
    let mut manager = session(df!("A" => [1i64], "C" => [2i64]).expect("df"));
    manager.push(add_column("B")).expect("add");
    manager.push(set_formula("B", "=10")).expect("formula");
    manager.push(delete_columns(&["A", "B"])).expect("delete");

    let code = manager.transpiled_code();
    let body: Vec<&String> = code
        .iter()
        .filter(|line| line.starts_with("df1"))
        .collect();
    assert_eq!(body, vec!["df1.drop(['A'], axis=1, inplace=True)"]);
    assert!(!code.iter().any(|line| line.contains("10")));
}

#[test]
fn test_dropping_an_insert_keeps_later_insert_positions() {
    let mut manager = session(df!("A" => [1i64]).expect("df"));
    manager.push(insert_column("B", 0)).expect("add B");
    manager.push(insert_column("C", 1)).expect("add C");
    manager.push(delete_columns(&["B"])).expect("delete");

    let sheet = &manager.current_state().sheets()[0];
    assert_eq!(sheet.headers(), vec!["C", "A"]);

    let code = manager.transpiled_code();
    let body: Vec<&String> = code
        .iter()
        .filter(|line| line.starts_with("df1"))
        .collect();
    assert_eq!(
        body,
        vec![
            "df1.insert(0, 'B', 0)",
            "df1.insert(1, 'C', 0)",
            "df1.drop(['B'], axis=1, inplace=True)",
        ]
    );

    let chunks: Vec<_> = manager
        .steps()
        .iter()
        .flat_map(|step| step.code_chunks.iter().cloned())
        .collect();
    let inputs = input_layout(manager.initial_state());
    let layout = column_layout(&chunks, &inputs).expect("layout");
    assert_eq!(layout.get(&sheet.id), Some(&sheet.headers()));
}

#[test]
fn test_header_colors_reach_excel_and_styler() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("formatted.xlsx");
    let mut manager = session(df!("A" => [1i64, 2]).expect("df"));
    manager
        .push(StepParams::SetDataframeFormat(SetDataframeFormatParams {
            sheet_index: 0,
            df_format: DataframeFormat {
                headers: ColorFormat {
                    color: Some("#ffffff".to_owned()),
                    background_color: Some("#000000".to_owned()),
                },
                ..DataframeFormat::default()
            },
        }))
        .expect("format");
    manager
        .push(StepParams::ExportToFile(ExportToFileParams {
            export_type: ExportType::Excel,
            sheet_indexes: vec![0],
            file_name: target.to_string_lossy().into_owned(),
            export_formatting: true,
        }))
        .expect("export");

    assert!(target.exists());
    let script = manager.transpiled_code().join("\n");
    assert!(script.contains("add_formatting_to_excel_sheet(writer, \"df1\", df1"));
    assert!(script.contains("header_background_color='#000000'"));
    assert!(script.contains("header_font_color='#ffffff'"));
    assert!(script.contains(
        "df1_styler = df1.style\\\n    .set_table_styles([\n        {'selector': 'thead', 'props': [('color', '#ffffff'), ('background-color', '#000000')]},"
    ));

    let sheet = &manager.current_state().sheets()[0];
    let planned = excel::plan("df1", sheet).expect("plan");
    assert_eq!(
        planned.header,
        Some(NamedStyle {
            name: "df1_Header".to_owned(),
            font_color: Some("#ffffff".to_owned()),
            background_color: Some("#000000".to_owned()),
        })
    );
}

#[test]
fn test_conditional_format_marks_matching_cells() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("highlighted.xlsx");
    let mut manager = session(df!("A" => [1i64, 2, 3, 4]).expect("df"));
    manager
        .push(StepParams::SetDataframeFormat(SetDataframeFormatParams {
            sheet_index: 0,
            df_format: DataframeFormat {
                conditional_formats: vec![ConditionalFormat {
                    format_uuid: "greater-than-two".to_owned(),
                    column_ids: vec!["A".into()],
                    filters: vec![Filter::new(Condition::Greater, 2)],
                    color: None,
                    background_color: Some("#e72323".to_owned()),
                }],
                ..DataframeFormat::default()
            },
        }))
        .expect("format");
    manager
        .push(StepParams::ExportToFile(ExportToFileParams {
            export_type: ExportType::Excel,
            sheet_indexes: vec![0],
            file_name: target.to_string_lossy().into_owned(),
            export_formatting: true,
        }))
        .expect("export");

    assert!(target.exists());
    let planned = excel::plan("df1", &manager.current_state().sheets()[0]).expect("plan");
    assert_eq!(
        planned.conditional_rules,
        vec![ConditionalRule {
            range: "A2:A5".to_owned(),
            column: 0,
            formula: "A2>2".to_owned(),
            font_color: None,
            background_color: Some("#e72323".to_owned()),
        }]
    );
    let script = manager.transpiled_code().join("\n");
    assert!(script.contains("'background_color': '#e72323'"));
}

#[test]
fn test_csv_export_splits_sheets_into_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let df1 = df!("A" => [1i64]).expect("df");
    let df2 = df!("B" => ["x"]).expect("df");
    let mut manager = StepsManager::with_settings(
        vec![("df1".to_owned(), df1), ("df2".to_owned(), df2)],
        settings(),
    )
    .expect("session");
    manager
        .push(StepParams::ExportToFile(ExportToFileParams {
            export_type: ExportType::Csv,
            sheet_indexes: vec![0, 1],
            file_name: dir.path().join("out").to_string_lossy().into_owned(),
            export_formatting: false,
        }))
        .expect("export");

    assert_eq!(
        std::fs::read_to_string(dir.path().join("out_0.csv")).expect("first"),
        "A\n1\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out_1.csv")).expect("second"),
        "B\nx\n"
    );
}

#[test]
fn test_undo_redo_restores_state_and_code() {
    let mut manager = session(df!("A" => [3i64, 1, 2]).expect("df"));
    manager.push(add_column("B")).expect("add");
    manager
        .push(StepParams::Sort(SortParams {
            sheet_index: 0,
            column_id: "A".into(),
            sort_direction: SortDirection::Ascending,
        }))
        .expect("sort");
    let state = Arc::clone(manager.current_state());
    let code = manager.transpiled_code();

    manager.undo().expect("undo");
    assert_eq!(manager.current_index(), 1);
    assert!(!Arc::ptr_eq(manager.current_state(), &state));
    manager.redo().expect("redo");

    assert!(Arc::ptr_eq(manager.current_state(), &state));
    assert_eq!(manager.transpiled_code(), code);
}

#[test]
fn test_replaying_a_saved_analysis_is_deterministic() {
    let df = df!("A" => [1i64, 2, 3]).expect("df");
    let mut manager = session(df.clone());
    manager.push(add_column("B")).expect("add");
    manager.push(set_formula("B", "=A * 2")).expect("formula");
    manager
        .push(StepParams::RenameColumn(RenameColumnParams {
            sheet_index: 0,
            column_id: "A".into(),
            new_column_header: "base".to_owned(),
        }))
        .expect("rename");
    let analysis = manager.saved_analysis().expect("save");
    let json = analysis.to_json().expect("json");

    let mut first = session(df.clone());
    first
        .load_analysis(&SavedAnalysis::from_json(&json).expect("parse"))
        .expect("first replay");
    let mut second = session(df);
    second
        .load_analysis(&SavedAnalysis::from_json(&json).expect("parse"))
        .expect("second replay");

    assert_same_frames(&first, &second);
    assert_same_frames(&manager, &first);
    assert_eq!(statements(&first), statements(&second));
    assert_eq!(first.transpiled_code(), manager.transpiled_code());
}

#[test]
fn test_renamed_column_is_referenced_by_new_header() {
    let mut manager = session(df!("A" => [2i64, 1]).expect("df"));
    manager
        .push(StepParams::RenameColumn(RenameColumnParams {
            sheet_index: 0,
            column_id: "A".into(),
            new_column_header: "price".to_owned(),
        }))
        .expect("rename");
    let sorted = manager
        .push(StepParams::Sort(SortParams {
            sheet_index: 0,
            column_id: "A".into(),
            sort_direction: SortDirection::Descending,
        }))
        .expect("sort");

    let code: Vec<String> = sorted.code_chunks.iter().flat_map(|c| c.code()).collect();
    assert_eq!(
        code,
        vec!["df1 = df1.sort_values(by='price', ascending=False, na_position='last')"]
    );
    let sheet = &manager.current_state().sheets()[0];
    assert_eq!(sheet.header(&"A".into()).expect("header"), "price");
}

#[test]
fn test_formula_on_renamed_column_keeps_one_column() {
    let mut manager = session(df!("A" => [3i64, 1, 2]).expect("df"));
    manager
        .push(StepParams::RenameColumn(RenameColumnParams {
            sheet_index: 0,
            column_id: "A".into(),
            new_column_header: "R0".to_owned(),
        }))
        .expect("rename");
    manager.push(set_formula("A", "=0")).expect("formula");
    manager
        .push(StepParams::Sort(SortParams {
            sheet_index: 0,
            column_id: "A".into(),
            sort_direction: SortDirection::Ascending,
        }))
        .expect("sort");

    let sheet = &manager.current_state().sheets()[0];
    assert_eq!(sheet.data.width(), 1);
    assert_eq!(sheet.headers(), vec!["R0"]);
    assert!(statements(&manager).contains(&"df1['R0'] = 0".to_owned()));
}

/// Script lines after the prelude.
fn body(manager: &StepsManager) -> Vec<String> {
    manager
        .transpiled_code()
        .into_iter()
        .filter(|line| !line.is_empty() && !line.starts_with("from ") && !line.starts_with("import "))
        .collect()
}

fn rename_column(column_id: &str, header: &str) -> StepParams {
    StepParams::RenameColumn(RenameColumnParams {
        sheet_index: 0,
        column_id: column_id.into(),
        new_column_header: header.to_owned(),
    })
}

fn rename_sheet(sheet_index: usize, name: &str) -> StepParams {
    StepParams::DataframeRename(DataframeRenameParams {
        sheet_index,
        new_dataframe_name: name.to_owned(),
    })
}

#[test]
fn test_swapping_headers_keeps_every_rename() {
    let mut manager = session(df!("A" => [1i64], "B" => [2i64]).expect("df"));
    manager.push(rename_column("A", "T")).expect("A to T");
    manager.push(rename_column("B", "A")).expect("B to A");
    manager.push(rename_column("A", "B")).expect("T to B");

    assert_eq!(manager.current_state().sheets()[0].headers(), vec!["B", "A"]);
    assert_eq!(
        body(&manager),
        vec![
            "df1.rename(columns={'A': 'T'}, inplace=True)",
            "df1.rename(columns={'B': 'A'}, inplace=True)",
            "df1.rename(columns={'T': 'B'}, inplace=True)",
        ]
    );
}

#[test]
fn test_deleting_a_sheet_after_its_name_was_reused() {
    let inputs = vec![
        ("df1".to_owned(), df!("A" => [1i64]).expect("df1")),
        ("df2".to_owned(), df!("A" => [2i64]).expect("df2")),
    ];
    let mut manager = StepsManager::with_settings(inputs, settings()).expect("session");
    manager.push(rename_sheet(0, "x")).expect("df1 to x");
    manager.push(rename_sheet(1, "df1")).expect("df2 to df1");
    manager
        .push(StepParams::DataframeDelete(DataframeDeleteParams { sheet_index: 0 }))
        .expect("delete x");

    assert_eq!(manager.current_state().df_names(), vec!["df1"]);
    assert_eq!(
        body(&manager),
        vec!["x = df1", "del df1", "df1 = df2", "del df2", "del x"]
    );
}

#[test]
fn test_swapping_sheet_names_keeps_both_sheets() {
    let inputs = vec![
        ("df1".to_owned(), df!("A" => [1i64]).expect("df1")),
        ("df2".to_owned(), df!("A" => [2i64]).expect("df2")),
    ];
    let mut manager = StepsManager::with_settings(inputs, settings()).expect("session");
    manager.push(rename_sheet(0, "tmp")).expect("df1 to tmp");
    manager.push(rename_sheet(1, "df1")).expect("df2 to df1");
    manager.push(rename_sheet(0, "df2")).expect("tmp to df2");

    assert_eq!(manager.current_state().df_names(), vec!["df2", "df1"]);
    assert_eq!(
        body(&manager),
        vec!["tmp = df1", "del df1", "df1 = df2", "del df2", "df2 = tmp", "del tmp"]
    );
}

#[test]
fn test_upgraded_legacy_add_column_replays() {
    let legacy = r#"{
        "version": "0.1.59",
        "steps": {"1": {"step_version": 1, "step_type": "add_column", "sheet_index": 0, "column_header": "B"}}
    }"#;
    let analysis = SavedAnalysis::from_json(legacy).expect("parse");
    let upgraded = analysis.upgrade().expect("upgrade");
    let types: Vec<&str> = upgraded
        .steps_data
        .iter()
        .map(|step| step.step_type.as_str())
        .collect();
    assert_eq!(types, vec!["bulk_old_rename", "add_column"]);
    assert_eq!(upgraded.steps_data[1].step_version, 2);
    assert_eq!(upgraded.steps_data[1].params["column_header_index"], -1);

    let mut manager = session(df!("A" => [1i64]).expect("df"));
    manager.load_analysis(&analysis).expect("load");
    assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "B"]);
}

#[test]
fn test_clear_replays_imports_in_log_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = dir.path().join("a.csv");
    let b = dir.path().join("b.csv");
    std::fs::write(&a, "X\n1\n").expect("write a");
    std::fs::write(&b, "Y\n2\n").expect("write b");

    let mut manager = session(df!("A" => [1i64]).expect("df"));
    let first_id = manager.push(import(&a)).expect("import a").step_id.clone();
    manager.push(add_column("B")).expect("add");
    let second_id = manager.push(import(&b)).expect("import b").step_id.clone();
    let third_id = manager.push(import(&a)).expect("import a again").step_id.clone();
    manager
        .push(StepParams::DataframeDelete(DataframeDeleteParams { sheet_index: 1 }))
        .expect("delete a");
    assert_eq!(manager.current_state().df_names(), vec!["df1", "b", "a_1"]);

    manager.clear().expect("clear");

    let ids: Vec<&str> = manager.steps().iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, vec![first_id.as_str(), second_id.as_str(), third_id.as_str()]);
    assert_eq!(manager.current_state().df_names(), vec!["df1", "a", "b", "a_1"]);
    assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A"]);
}
