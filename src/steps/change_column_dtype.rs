use super::StepPerformer;
use crate::code_chunks::ChunkKind;
use crate::code_chunks::python::py_str;
use crate::column_headers::ColumnId;
use crate::error::{ExecutionErrorKind, Result, SheetError};
use crate::state::State;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Column types a user can convert between, named the way pandas prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    #[serde(rename = "int64", alias = "int", alias = "int32", alias = "uint8")]
    Int,
    #[serde(rename = "float64", alias = "float", alias = "float32")]
    Float,
    #[serde(rename = "bool", alias = "boolean")]
    Bool,
    #[serde(rename = "str", alias = "object", alias = "string")]
    Str,
    #[serde(rename = "datetime64[ns]", alias = "datetime")]
    Datetime,
    #[serde(rename = "timedelta64[ns]", alias = "timedelta")]
    Timedelta,
}

impl Dtype {
    pub fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => Self::Bool,
            DataType::Float32 | DataType::Float64 => Self::Float,
            d if d.is_integer() => Self::Int,
            DataType::Datetime(..) | DataType::Date => Self::Datetime,
            DataType::Duration(_) => Self::Timedelta,
            _ => Self::Str,
        }
    }
}

const TRUTHY: [&str; 5] = ["true", "t", "yes", "y", "1"];

/// Polars expression converting `header` from `from` to `to`.
fn conversion_expr(header: &str, from: Dtype, to: Dtype) -> Result<Expr> {
    let c = col(header);
    let seconds_to_us = |e: Expr| e.cast(DataType::Int64) * lit(1_000_000i64);
    let expr = match (from, to) {
        (Dtype::Str, Dtype::Bool) => {
            let lower = c.str().to_lowercase();
            TRUTHY
                .iter()
                .map(|t| lower.clone().eq(lit(*t)))
                .reduce(|a, b| a.or(b))
                .unwrap_or_else(|| lit(false))
                .fill_null(lit(false))
        }
        (Dtype::Int | Dtype::Float, Dtype::Bool) => c.neq(lit(0)).fill_null(lit(false)),
        (Dtype::Datetime, Dtype::Int | Dtype::Float) => c
            .cast(DataType::Datetime(TimeUnit::Nanoseconds, None))
            .cast(DataType::Int64)
            .cast(if to == Dtype::Int {
                DataType::Int64
            } else {
                DataType::Float64
            }),
        (Dtype::Timedelta, Dtype::Int | Dtype::Float) => c
            .cast(DataType::Duration(TimeUnit::Nanoseconds))
            .cast(DataType::Int64)
            .cast(if to == Dtype::Int {
                DataType::Int64
            } else {
                DataType::Float64
            }),
        (Dtype::Float, Dtype::Int) => c.fill_null(lit(0)).cast(DataType::Int64),
        (_, Dtype::Int) => c.cast(DataType::Int64),
        (_, Dtype::Float) => c.cast(DataType::Float64),
        (_, Dtype::Str) => c.cast(DataType::String),
        (Dtype::Str, Dtype::Datetime) => c.cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        (Dtype::Int | Dtype::Float, Dtype::Datetime) => {
            seconds_to_us(c).cast(DataType::Datetime(TimeUnit::Microseconds, None))
        }
        (Dtype::Int | Dtype::Float, Dtype::Timedelta) => {
            seconds_to_us(c).cast(DataType::Duration(TimeUnit::Microseconds))
        }
        (from, to) => {
            return Err(SheetError::execution(
                ExecutionErrorKind::TypeMismatch,
                format!("cannot convert {header} from {from:?} to {to:?}"),
            ));
        }
    };
    Ok(expr.alias(header))
}

/// Pandas statement doing the same conversion.
fn conversion_code(df: &str, header: &str, from: Dtype, to: Dtype) -> String {
    let target = format!("{df}[{}]", py_str(header));
    let value = match (from, to) {
        (Dtype::Str, Dtype::Bool) => format!("to_boolean_series({target})"),
        (_, Dtype::Bool) => format!("{target}.fillna(0) != 0"),
        (Dtype::Datetime | Dtype::Timedelta, Dtype::Int) => format!("{target}.astype('int64')"),
        (Dtype::Datetime | Dtype::Timedelta, Dtype::Float) => {
            format!("{target}.astype('int64').astype('float')")
        }
        (Dtype::Str, Dtype::Int) => format!("to_int_series({target})"),
        (Dtype::Float, Dtype::Int) => format!("{target}.fillna(0).astype('int')"),
        (_, Dtype::Int) => format!("{target}.astype('int')"),
        (Dtype::Str, Dtype::Float) => format!("to_float_series({target})"),
        (_, Dtype::Float) => format!("{target}.astype('float')"),
        (_, Dtype::Str) => format!("{target}.astype('str')"),
        (Dtype::Str, Dtype::Datetime) => format!("pd.to_datetime({target}, errors='coerce')"),
        (_, Dtype::Datetime) => format!("pd.to_datetime({target}, unit='s', errors='coerce')"),
        (_, Dtype::Timedelta) => format!("pd.to_timedelta({target}, unit='s', errors='coerce')"),
    };
    format!("{target} = {value}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeColumnDtypeParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    /// Type the front-end showed; the sheet's actual type wins.
    pub old_dtype: Dtype,
    pub new_dtype: Dtype,
}

impl StepPerformer for ChangeColumnDtypeParams {
    /// Actual type before conversion, `None` when nothing changed.
    type ExecutionData = Option<Dtype>;

    fn execute(&self, pre: &State) -> Result<(State, Self::ExecutionData)> {
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?;
        let from = Dtype::of(&sheet.dtype(&self.column_id)?);
        if from == self.new_dtype {
            return Ok((pre.clone(), None));
        }

        let data = sheet
            .data
            .clone()
            .lazy()
            .with_column(conversion_expr(header, from, self.new_dtype)?)
            .collect()?;

        let mut new_sheet = sheet.with_data(data, sheet.columns.clone());
        new_sheet.formulas.remove(&self.column_id);
        let mut post = pre.clone();
        post.replace_sheet(self.sheet_index, new_sheet)?;
        Ok((post, Some(from)))
    }

    fn transpile(
        &self,
        pre: &State,
        _post: &State,
        from: &Self::ExecutionData,
    ) -> Result<Vec<ChunkKind>> {
        let Some(from) = from else {
            return Ok(Vec::new());
        };
        let sheet = pre.sheet(self.sheet_index)?;
        let header = sheet.header(&self.column_id)?.to_owned();
        Ok(vec![ChunkKind::ChangeDtype {
            sheet: sheet.id,
            df: sheet.name.clone(),
            column_id: self.column_id.clone(),
            statements: vec![conversion_code(&sheet.name, &header, *from, self.new_dtype)],
            header,
        }])
    }

    fn edited_sheet_indexes(&self) -> Vec<usize> {
        vec![self.sheet_index]
    }
}
