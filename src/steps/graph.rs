//! Charts. A graph step never changes data and adds nothing to the script;
//! it stores a plotly snippet in the state under its `graph_id`.

use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::code_chunks::python::{py_str, py_str_list};
use crate::column_headers::ColumnId;
use crate::error::Result;
use crate::state::{GraphOutput, Sheet, State};
use serde::{Deserialize, Serialize};

/// Rows plotted when the safety filter is on.
const SAFETY_FILTER_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphType {
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "scatter")]
    Scatter,
    #[serde(rename = "histogram")]
    Histogram,
    #[serde(rename = "box")]
    Box,
    #[serde(rename = "violin")]
    Violin,
    #[serde(rename = "strip")]
    Strip,
    #[serde(rename = "ecdf")]
    Ecdf,
    #[serde(rename = "density heatmap")]
    DensityHeatmap,
    #[serde(rename = "density contour")]
    DensityContour,
    #[serde(rename = "pie")]
    Pie,
}

impl GraphType {
    fn plotly_function(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Scatter => "scatter",
            Self::Histogram => "histogram",
            Self::Box => "box",
            Self::Violin => "violin",
            Self::Strip => "strip",
            Self::Ecdf => "ecdf",
            Self::DensityHeatmap => "density_heatmap",
            Self::DensityContour => "density_contour",
            Self::Pie => "pie",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPreprocessing {
    #[serde(default)]
    pub safety_filter_turned_on_by_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCreation {
    pub graph_type: GraphType,
    pub sheet_index: usize,
    #[serde(default)]
    pub x_axis_column_ids: Vec<ColumnId>,
    #[serde(default)]
    pub y_axis_column_ids: Vec<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColumnId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphParams {
    pub graph_id: String,
    #[serde(default)]
    pub graph_preprocessing: GraphPreprocessing,
    pub graph_creation: GraphCreation,
    #[serde(default)]
    pub graph_styling: serde_json::Value,
    #[serde(default)]
    pub graph_rendering: serde_json::Value,
}

impl GraphParams {
    fn axis(sheet: &Sheet, ids: &[ColumnId]) -> Result<Option<String>> {
        let headers = sheet.headers_for(ids)?;
        Ok(match headers.as_slice() {
            [] => None,
            [single] => Some(py_str(single)),
            many => Some(py_str_list(many)),
        })
    }

    fn title(&self) -> Option<&str> {
        self.graph_styling
            .get("title")
            .and_then(|t| t.get("title"))
            .and_then(serde_json::Value::as_str)
    }

    fn plotly_code(&self, sheet: &Sheet) -> Result<String> {
        let creation = &self.graph_creation;
        let mut source = sheet.name.clone();
        let mut lines = vec!["import plotly.express as px".to_owned()];
        if self.graph_preprocessing.safety_filter_turned_on_by_user
            && sheet.data.height() > SAFETY_FILTER_ROWS
        {
            lines.push(format!(
                "{source}_filtered = {source}.head({SAFETY_FILTER_ROWS})"
            ));
            source = format!("{source}_filtered");
        }

        let mut args = vec![source];
        if let Some(x) = Self::axis(sheet, &creation.x_axis_column_ids)? {
            args.push(format!("x={x}"));
        }
        if let Some(y) = Self::axis(sheet, &creation.y_axis_column_ids)? {
            args.push(format!("y={y}"));
        }
        if let Some(color) = &creation.color {
            args.push(format!("color={}", py_str(sheet.header(color)?)));
        }
        lines.push(format!(
            "fig = px.{}({})",
            creation.graph_type.plotly_function(),
            args.join(", ")
        ));
        if let Some(title) = self.title() {
            lines.push(format!("fig.update_layout(title={})", py_str(title)));
        }
        lines.push("fig.show()".to_owned());
        Ok(lines.join("\n"))
    }
}

impl StepPerformer for GraphParams {
    type ExecutionData = ();

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.graph_creation.sheet_index)?;
        let code = self.plotly_code(sheet)?;
        let mut post = pre.clone();
        post.set_graph(
            self.graph_id.clone(),
            GraphOutput {
                sheet_id: sheet.id,
                graph_type: self.graph_creation.graph_type.plotly_function().to_owned(),
                code,
            },
        );
        Ok((post, ()))
    }

    fn transpile(&self, _pre: &State, _post: &State, _: &()) -> Result<Vec<ChunkKind>> {
        Ok(Vec::new())
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        Vec::new()
    }
}
