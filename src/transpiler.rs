//! Turn the code chunks of a step log into the final script.
//!
//! The script is the configured prelude, the (optimized) statements of every
//! chunk in log order, and one pandas `Styler` block per formatted sheet of
//! the final state.

use crate::code_chunks::CodeChunk;
use crate::code_chunks::python::{py_str, py_str_list};
use crate::column_headers::ColumnId;
use crate::config::EngineSettings;
use crate::error::Result;
use crate::filter::{self, Filter};
use crate::optimizer::{self, OptimizationReport};
use crate::state::{ColorFormat, Sheet, State};
use crate::steps::Step;

const NUMPY_IMPORT: &str = "import numpy as np";

/// CSS properties for a colour pair, font colour first.
fn css_props(colors: &ColorFormat) -> Vec<String> {
    let mut props = Vec::new();
    if let Some(color) = &colors.color {
        props.push(format!("('color', {})", py_str(color)));
    }
    if let Some(background) = &colors.background_color {
        props.push(format!("('background-color', {})", py_str(background)));
    }
    props
}

fn css_inline(color: Option<&String>, background: Option<&String>) -> String {
    let mut parts = Vec::new();
    if let Some(color) = color {
        parts.push(format!("color: {color}"));
    }
    if let Some(background) = background {
        parts.push(format!("background-color: {background}"));
    }
    parts.join("; ")
}

/// Pandas condition for one conditional-format filter, `None` when the
/// condition does not apply to the column's type.
fn styler_condition(sheet: &Sheet, id: &ColumnId, filter: &Filter) -> Result<Option<String>> {
    let dtype = sheet.dtype(id)?;
    if !filter.condition.applies_to(&dtype) {
        return Ok(None);
    }
    filter::condition_code("series", &dtype, filter).map(Some)
}

/// The styler block for `sheet` and whether it needs numpy.
///
/// The first data row is even to the user but `nth-child(odd)` to CSS, so
/// the row selectors are swapped.
pub fn styler_code(sheet: &Sheet) -> Result<Option<(String, bool)>> {
    let format = &sheet.format;
    if format.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::new();
    let mut uses_numpy = false;

    if format.has_table_styles() {
        let mut selectors = Vec::new();
        let mut push = |selector: &str, colors: Option<&ColorFormat>| {
            if let Some(colors) = colors.filter(|c| !c.is_empty()) {
                selectors.push(format!(
                    "        {{'selector': '{selector}', 'props': [{}]}},\n",
                    css_props(colors).join(", ")
                ));
            }
        };
        push("thead", Some(&format.headers));
        push("tbody tr:nth-child(odd)", format.rows.even.as_ref());
        push("tbody tr:nth-child(even)", format.rows.odd.as_ref());
        parts.push(format!("set_table_styles([\n{}])", selectors.concat()));
    }

    for conditional in &format.conditional_formats {
        if conditional.color.is_none() && conditional.background_color.is_none() {
            continue;
        }
        let css = css_inline(conditional.color.as_ref(), conditional.background_color.as_ref());
        for id in &conditional.column_ids {
            let Some(header) = sheet.columns.header(id) else {
                continue;
            };
            for filter in &conditional.filters {
                let Some(condition) = styler_condition(sheet, id, filter)? else {
                    continue;
                };
                uses_numpy = true;
                parts.push(format!(
                    "apply(lambda series: np.where({condition}, {}, None), subset={})",
                    py_str(&css),
                    py_str_list(&[header])
                ));
            }
        }
    }

    for id in sheet.column_ids() {
        if let Some(number_format) = format.columns.get(&id)
            && sheet.dtype(&id)?.is_primitive_numeric()
        {
            parts.push(format!(
                "format({}, subset={})",
                py_str(&number_format.styler_format()),
                py_str_list(&[sheet.header(&id)?])
            ));
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    let name = &sheet.name;
    let body: String = parts.iter().map(|p| format!("\\\n    .{p}")).collect();
    Ok(Some((format!("{name}_styler = {name}.style{body}"), uses_numpy)))
}

/// Generated code for a step log.
#[derive(Debug, Clone)]
pub struct Script {
    prelude: Vec<String>,
    chunks: Vec<CodeChunk>,
    stylers: Vec<String>,
    uses_numpy: bool,
    report: OptimizationReport,
}

impl Script {
    /// Collect the chunks of `steps`, optimize them when enabled, and add
    /// stylers for the sheets of `final_state`.
    ///
    /// # Errors
    ///
    /// Optimizer verification failures and formatting that references
    /// missing columns.
    pub fn build(steps: &[Step], final_state: &State, settings: &EngineSettings) -> Result<Self> {
        let chunks: Vec<CodeChunk> = steps
            .iter()
            .flat_map(|step| step.code_chunks.iter().cloned())
            .collect();
        let initial = steps.first().map_or(final_state, |step| &*step.pre_state);
        let inputs = optimizer::input_layout(initial);
        let (chunks, report) = if settings.optimize_code {
            optimizer::optimize(chunks, &inputs, settings)?
        } else {
            let count = chunks.len();
            (
                chunks,
                OptimizationReport {
                    chunks_before: count,
                    chunks_after: count,
                    ..OptimizationReport::default()
                },
            )
        };

        let mut stylers = Vec::new();
        let mut uses_numpy = false;
        for sheet in final_state.sheets() {
            if let Some((code, numpy)) = styler_code(sheet)? {
                stylers.push(code);
                uses_numpy |= numpy;
            }
        }
        Ok(Self {
            prelude: settings.code_prelude.clone(),
            chunks,
            stylers,
            uses_numpy,
            report,
        })
    }

    pub fn chunks(&self) -> &[CodeChunk] {
        &self.chunks
    }

    pub fn report(&self) -> &OptimizationReport {
        &self.report
    }

    fn prelude_lines(&self) -> Vec<String> {
        let mut lines = self.prelude.clone();
        if self.uses_numpy && !lines.iter().any(|l| l == NUMPY_IMPORT) {
            lines.push(NUMPY_IMPORT.to_owned());
        }
        lines
    }

    fn is_empty(&self) -> bool {
        self.stylers.is_empty() && self.chunks.iter().all(|c| c.code().is_empty())
    }

    /// The script as a list of lines: prelude, a blank line, the
    /// statements, then a blank line before each styler. Empty when there is
    /// nothing to run.
    pub fn lines(&self) -> Vec<String> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut lines = self.prelude_lines();
        lines.push(String::new());
        lines.extend(self.chunks.iter().flat_map(CodeChunk::code));
        for styler in &self.stylers {
            lines.push(String::new());
            lines.push(styler.clone());
        }
        lines
    }

    /// The script as one string, each chunk preceded by a `#` comment with
    /// its description.
    pub fn commented(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut sections = vec![self.prelude_lines().join("\n")];
        for chunk in &self.chunks {
            let code = chunk.code();
            if code.is_empty() {
                continue;
            }
            sections.push(format!("# {}\n{}", chunk.description(), code.join("\n")));
        }
        sections.extend(self.stylers.iter().cloned());
        let mut script = sections.join("\n\n");
        script.push('\n');
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use crate::state::{ConditionalFormat, DataframeFormat, NumberFormat, NumberFormatType, RowsFormat};
    use crate::steps::test_support::{run, state_a};
    use crate::steps::{AddColumnParams, SetDataframeFormatParams, StepParams};
    use pretty_assertions::assert_eq;

    fn settings() -> EngineSettings {
        EngineSettings {
            verify_optimization: true,
            ..EngineSettings::default()
        }
    }

    fn formatted(format: DataframeFormat) -> Step {
        run(
            StepParams::SetDataframeFormat(SetDataframeFormatParams {
                sheet_index: 0,
                df_format: format,
            }),
            &state_a(&[1, 2, 3, 4]),
        )
    }

    fn header_colors() -> DataframeFormat {
        DataframeFormat {
            headers: ColorFormat {
                color: Some("#ffffff".to_owned()),
                background_color: Some("#000000".to_owned()),
            },
            ..DataframeFormat::default()
        }
    }

    #[test]
    fn test_no_steps_no_code() {
        let state = state_a(&[1]);
        let script = Script::build(&[], &state, &settings()).expect("script");
        assert!(script.lines().is_empty());
        assert_eq!(script.commented(), "");
    }

    #[test]
    fn test_statements_framed_by_prelude() {
        let step = run(
            StepParams::AddColumn(AddColumnParams {
                sheet_index: 0,
                column_header: "B".to_owned(),
                column_header_index: -1,
            }),
            &state_a(&[1]),
        );
        let script = Script::build(&[step.clone()], &step.post_state, &settings()).expect("script");
        assert_eq!(
            script.lines(),
            vec![
                "from mitosheet.public.v3 import *",
                "import pandas as pd",
                "",
                "df1.insert(1, 'B', 0)",
            ]
        );
        assert!(script.commented().contains("# Added column B"));
    }

    #[test]
    fn test_header_styler_block() {
        let step = formatted(header_colors());
        let script = Script::build(&[step.clone()], &step.post_state, &settings()).expect("script");
        let lines = script.lines();
        assert_eq!(lines[lines.len() - 2], "");
        assert_eq!(
            lines[lines.len() - 1],
            "df1_styler = df1.style\\\n    .set_table_styles([\n        {'selector': 'thead', 'props': [('color', '#ffffff'), ('background-color', '#000000')]},\n])"
        );
    }

    #[test]
    fn test_row_selectors_are_crossed() {
        let step = formatted(DataframeFormat {
            rows: RowsFormat {
                even: Some(ColorFormat {
                    color: Some("#111111".to_owned()),
                    background_color: None,
                }),
                odd: Some(ColorFormat {
                    color: None,
                    background_color: Some("#222222".to_owned()),
                }),
            },
            ..DataframeFormat::default()
        });
        let (code, numpy) = styler_code(&step.post_state.sheets()[0])
            .expect("styler")
            .expect("some styler");
        assert!(!numpy);
        assert!(code.contains("{'selector': 'tbody tr:nth-child(odd)', 'props': [('color', '#111111')]}"));
        assert!(code.contains("{'selector': 'tbody tr:nth-child(even)', 'props': [('background-color', '#222222')]}"));
    }

    #[test]
    fn test_conditional_format_pulls_in_numpy() {
        let step = formatted(DataframeFormat {
            conditional_formats: vec![ConditionalFormat {
                format_uuid: "cf1".to_owned(),
                column_ids: vec![ColumnId::from("A")],
                filters: vec![Filter::new(Condition::Greater, 2)],
                color: Some("#e72323".to_owned()),
                background_color: None,
            }],
            ..DataframeFormat::default()
        });
        let script = Script::build(&[step.clone()], &step.post_state, &settings()).expect("script");
        let lines = script.lines();
        assert_eq!(lines[2], NUMPY_IMPORT);
        assert!(lines.iter().any(|l| l.contains(
            ".apply(lambda series: np.where(series > 2, 'color: #e72323', None), subset=['A'])"
        )));
    }

    #[test]
    fn test_inapplicable_conditional_format_adds_nothing() {
        let step = formatted(DataframeFormat {
            conditional_formats: vec![ConditionalFormat {
                format_uuid: "cf1".to_owned(),
                column_ids: vec![ColumnId::from("A")],
                filters: vec![Filter::new(Condition::StringStartsWith, "x")],
                color: Some("#e72323".to_owned()),
                background_color: None,
            }],
            ..DataframeFormat::default()
        });
        let script = Script::build(&[step.clone()], &step.post_state, &settings()).expect("script");
        assert!(script.lines().is_empty());
    }

    #[test]
    fn test_number_format_styler() {
        let mut format = DataframeFormat::default();
        format.columns.insert(
            ColumnId::from("A"),
            NumberFormat {
                kind: NumberFormatType::Currency,
                precision: Some(2),
            },
        );
        let step = formatted(format);
        let (code, _) = styler_code(&step.post_state.sheets()[0])
            .expect("styler")
            .expect("some styler");
        assert_eq!(code, "df1_styler = df1.style\\\n    .format('${:,.2f}', subset=['A'])");
    }
}
