//! Filter conditions shared by the filter step and conditional formatting.
//!
//! A condition evaluates two ways: as a polars predicate against the live
//! dataframe, and as a pandas boolean mask in the generated script. Both must
//! agree on nulls: a missing value never matches a positive condition and
//! always matches a negated one (`number_not_exactly`, `string_not_exactly`,
//! `string_does_not_contain`, `datetime_not_exactly`).

use crate::code_chunks::python::{py_number, py_str};
use crate::error::{ExecutionErrorKind, Result, SheetError};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Greater,
    GreaterThanOrEqual,
    Less,
    LessThanOrEqual,
    NumberExactly,
    NumberNotExactly,
    Contains,
    StringContainsCaseInsensitive,
    StringDoesNotContain,
    StringStartsWith,
    StringEndsWith,
    StringExactly,
    StringNotExactly,
    BooleanIsTrue,
    BooleanIsFalse,
    Empty,
    NotEmpty,
    DatetimeGreater,
    DatetimeGreaterThanOrEqual,
    DatetimeLess,
    DatetimeLessThanOrEqual,
    DatetimeExactly,
    DatetimeNotExactly,
}

/// Which column types a condition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFamily {
    Number,
    String,
    Boolean,
    Datetime,
    Any,
}

impl Condition {
    pub fn family(self) -> ConditionFamily {
        use Condition::*;
        match self {
            Greater | GreaterThanOrEqual | Less | LessThanOrEqual | NumberExactly
            | NumberNotExactly => ConditionFamily::Number,
            Contains | StringContainsCaseInsensitive | StringDoesNotContain | StringStartsWith
            | StringEndsWith | StringExactly | StringNotExactly => ConditionFamily::String,
            BooleanIsTrue | BooleanIsFalse => ConditionFamily::Boolean,
            DatetimeGreater | DatetimeGreaterThanOrEqual | DatetimeLess
            | DatetimeLessThanOrEqual | DatetimeExactly | DatetimeNotExactly => {
                ConditionFamily::Datetime
            }
            Empty | NotEmpty => ConditionFamily::Any,
        }
    }

    /// Whether the condition can be checked against a column of `dtype`.
    pub fn applies_to(self, dtype: &DataType) -> bool {
        match self.family() {
            ConditionFamily::Number => dtype.is_primitive_numeric(),
            ConditionFamily::String => matches!(dtype, DataType::String),
            ConditionFamily::Boolean => matches!(dtype, DataType::Boolean),
            ConditionFamily::Datetime => matches!(dtype, DataType::Datetime(..) | DataType::Date),
            ConditionFamily::Any => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        use Condition::*;
        match self {
            Greater => "greater",
            GreaterThanOrEqual => "greater_than_or_equal",
            Less => "less",
            LessThanOrEqual => "less_than_or_equal",
            NumberExactly => "number_exactly",
            NumberNotExactly => "number_not_exactly",
            Contains => "contains",
            StringContainsCaseInsensitive => "string_contains_case_insensitive",
            StringDoesNotContain => "string_does_not_contain",
            StringStartsWith => "string_starts_with",
            StringEndsWith => "string_ends_with",
            StringExactly => "string_exactly",
            StringNotExactly => "string_not_exactly",
            BooleanIsTrue => "boolean_is_true",
            BooleanIsFalse => "boolean_is_false",
            Empty => "empty",
            NotEmpty => "not_empty",
            DatetimeGreater => "datetime_greater",
            DatetimeGreaterThanOrEqual => "datetime_greater_than_or_equal",
            DatetimeLess => "datetime_less",
            DatetimeLessThanOrEqual => "datetime_less_than_or_equal",
            DatetimeExactly => "datetime_exactly",
            DatetimeNotExactly => "datetime_not_exactly",
        }
    }
}

/// One condition with its comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub condition: Condition,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(condition: Condition, value: impl Into<Value>) -> Self {
        Self {
            condition,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    fn pandas(self) -> &'static str {
        match self {
            Self::And => " & ",
            Self::Or => " | ",
        }
    }

    fn combine(self, lhs: Expr, rhs: Expr) -> Expr {
        match self {
            Self::And => lhs.and(rhs),
            Self::Or => lhs.or(rhs),
        }
    }
}

/// A top-level entry of a filter step: a single filter or a one-level group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterOrGroup {
    Group {
        filters: Vec<Filter>,
        operator: Operator,
    },
    Filter(Filter),
}

/// Polars predicate for a whole filter list, or `None` when there is nothing to filter on.
pub fn predicate(
    header: &str,
    dtype: &DataType,
    operator: Operator,
    filters: &[FilterOrGroup],
) -> Result<Option<Expr>> {
    let mut combined: Option<Expr> = None;
    for entry in filters {
        let expr = match entry {
            FilterOrGroup::Filter(filter) => Some(filter_expr(header, dtype, filter)?),
            FilterOrGroup::Group { filters, operator } => {
                let mut group: Option<Expr> = None;
                for filter in filters {
                    let expr = filter_expr(header, dtype, filter)?;
                    group = Some(match group {
                        Some(acc) => operator.combine(acc, expr),
                        None => expr,
                    });
                }
                group
            }
        };
        if let Some(expr) = expr {
            combined = Some(match combined {
                Some(acc) => operator.combine(acc, expr),
                None => expr,
            });
        }
    }
    Ok(combined)
}

/// Pandas mask for a whole filter list, over the series expression `target`.
pub fn mask_code(
    target: &str,
    dtype: &DataType,
    operator: Operator,
    filters: &[FilterOrGroup],
) -> Result<Option<String>> {
    let mut parts = Vec::new();
    for entry in filters {
        match entry {
            FilterOrGroup::Filter(filter) => parts.push(condition_code(target, dtype, filter)?),
            FilterOrGroup::Group { filters, operator } => {
                let inner = filters
                    .iter()
                    .map(|f| condition_code(target, dtype, f).map(|c| format!("({c})")))
                    .collect::<Result<Vec<_>>>()?;
                if !inner.is_empty() {
                    parts.push(inner.join(operator.pandas()));
                }
            }
        }
    }
    Ok(match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(
            parts
                .iter()
                .map(|p| format!("({p})"))
                .collect::<Vec<_>>()
                .join(operator.pandas()),
        ),
    })
}

/// Predicate for one condition on column `header`.
pub fn filter_expr(header: &str, dtype: &DataType, filter: &Filter) -> Result<Expr> {
    use Condition::*;
    check_applies(header, dtype, filter.condition)?;
    let c = col(header);
    let expr = match filter.condition {
        Greater => c.gt(lit(number_value(filter)?)),
        GreaterThanOrEqual => c.gt_eq(lit(number_value(filter)?)),
        Less => c.lt(lit(number_value(filter)?)),
        LessThanOrEqual => c.lt_eq(lit(number_value(filter)?)),
        NumberExactly => c.eq(lit(number_value(filter)?)),
        NumberNotExactly => c.neq_missing(lit(number_value(filter)?)),
        Contains => c
            .str()
            .contains_literal(lit(string_value(filter)))
            .fill_null(lit(false)),
        StringContainsCaseInsensitive => c
            .str()
            .to_lowercase()
            .str()
            .contains_literal(lit(string_value(filter).to_lowercase()))
            .fill_null(lit(false)),
        StringDoesNotContain => c
            .str()
            .to_lowercase()
            .str()
            .contains_literal(lit(string_value(filter).to_lowercase()))
            .fill_null(lit(false))
            .not(),
        StringStartsWith => c
            .str()
            .starts_with(lit(string_value(filter)))
            .fill_null(lit(false)),
        StringEndsWith => c
            .str()
            .ends_with(lit(string_value(filter)))
            .fill_null(lit(false)),
        StringExactly => c.eq(lit(string_value(filter))).fill_null(lit(false)),
        StringNotExactly => c.neq_missing(lit(string_value(filter))),
        BooleanIsTrue => c.eq(lit(true)).fill_null(lit(false)),
        BooleanIsFalse => c.eq(lit(false)).fill_null(lit(false)),
        Empty => match dtype {
            DataType::String => c.clone().is_null().or(c.eq(lit(""))),
            _ => c.is_null(),
        },
        NotEmpty => match dtype {
            DataType::String => c.clone().is_not_null().and(c.neq(lit("")).fill_null(lit(false))),
            _ => c.is_not_null(),
        },
        DatetimeGreater => as_datetime(c).gt(lit(datetime_value(filter)?)),
        DatetimeGreaterThanOrEqual => as_datetime(c).gt_eq(lit(datetime_value(filter)?)),
        DatetimeLess => as_datetime(c).lt(lit(datetime_value(filter)?)),
        DatetimeLessThanOrEqual => as_datetime(c).lt_eq(lit(datetime_value(filter)?)),
        DatetimeExactly => as_datetime(c).eq(lit(datetime_value(filter)?)),
        DatetimeNotExactly => as_datetime(c).neq_missing(lit(datetime_value(filter)?)),
    };
    Ok(expr)
}

/// Pandas boolean expression for one condition over the series `target`.
pub fn condition_code(target: &str, dtype: &DataType, filter: &Filter) -> Result<String> {
    use Condition::*;
    let code = match filter.condition {
        Greater => format!("{target} > {}", number_code(filter)?),
        GreaterThanOrEqual => format!("{target} >= {}", number_code(filter)?),
        Less => format!("{target} < {}", number_code(filter)?),
        LessThanOrEqual => format!("{target} <= {}", number_code(filter)?),
        NumberExactly => format!("{target} == {}", number_code(filter)?),
        NumberNotExactly => format!("{target} != {}", number_code(filter)?),
        Contains => format!(
            "{target}.str.contains({}, na=False, regex=False)",
            py_str(&string_value(filter))
        ),
        StringContainsCaseInsensitive => format!(
            "{target}.str.contains({}, case=False, na=False, regex=False)",
            py_str(&string_value(filter))
        ),
        StringDoesNotContain => format!(
            "~{target}.str.contains({}, case=False, na=False, regex=False)",
            py_str(&string_value(filter))
        ),
        StringStartsWith => format!(
            "{target}.str.startswith({}, na=False)",
            py_str(&string_value(filter))
        ),
        StringEndsWith => format!(
            "{target}.str.endswith({}, na=False)",
            py_str(&string_value(filter))
        ),
        StringExactly => format!("{target} == {}", py_str(&string_value(filter))),
        StringNotExactly => format!("{target} != {}", py_str(&string_value(filter))),
        BooleanIsTrue => format!("{target} == True"),
        BooleanIsFalse => format!("{target} == False"),
        Empty => match dtype {
            DataType::String => format!("({target}.isna()) | ({target} == '')"),
            _ => format!("{target}.isna()"),
        },
        NotEmpty => match dtype {
            DataType::String => format!("({target}.notnull()) & ({target} != '')"),
            _ => format!("{target}.notnull()"),
        },
        DatetimeGreater => datetime_code(target, ">", filter)?,
        DatetimeGreaterThanOrEqual => datetime_code(target, ">=", filter)?,
        DatetimeLess => datetime_code(target, "<", filter)?,
        DatetimeLessThanOrEqual => datetime_code(target, "<=", filter)?,
        DatetimeExactly => datetime_code(target, "==", filter)?,
        DatetimeNotExactly => datetime_code(target, "!=", filter)?,
    };
    Ok(code)
}

fn check_applies(header: &str, dtype: &DataType, condition: Condition) -> Result<()> {
    if condition.applies_to(dtype) {
        return Ok(());
    }
    Err(SheetError::execution(
        ExecutionErrorKind::TypeMismatch,
        format!(
            "condition {} cannot be applied to column '{header}' of type {dtype}",
            condition.as_str()
        ),
    ))
}

fn as_datetime(expr: Expr) -> Expr {
    expr.cast(DataType::Datetime(TimeUnit::Microseconds, None))
}

/// Numeric value of a filter; numeric strings are accepted.
pub fn number_value(filter: &Filter) -> Result<f64> {
    let parsed = match &filter.value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        SheetError::invalid_params(format!(
            "{} needs a number, got {}",
            filter.condition.as_str(),
            filter.value
        ))
    })
}

fn number_code(filter: &Filter) -> Result<String> {
    match &filter.value {
        Value::Number(n) => Ok(n.to_string()),
        _ => number_value(filter).map(py_number),
    }
}

/// String value of a filter; numbers and booleans are rendered as text.
pub fn string_value(filter: &Filter) -> String {
    match &filter.value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Datetime value of a filter, accepting ISO and US month-first dates.
pub fn datetime_value(filter: &Filter) -> Result<NaiveDateTime> {
    let text = string_value(filter);
    parse_datetime(text.trim()).ok_or_else(|| {
        SheetError::invalid_params(format!(
            "{} needs a date, got '{text}'",
            filter.condition.as_str()
        ))
    })
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn datetime_code(target: &str, op: &str, filter: &Filter) -> Result<String> {
    datetime_value(filter)?;
    Ok(format!(
        "{target} {op} pd.to_datetime({})",
        py_str(&string_value(filter))
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(df: &DataFrame, header: &str, filters: &[FilterOrGroup], op: Operator) -> DataFrame {
        let dtype = df.column(header).expect("column").dtype().clone();
        let pred = predicate(header, &dtype, op, filters)
            .expect("build predicate")
            .expect("non-empty predicate");
        df.clone().lazy().filter(pred).collect().expect("filter")
    }

    #[test]
    fn test_greater_filter() {
        let df = df!("A" => [1i64, 2, 3, 4]).expect("df");
        let out = apply(
            &df,
            "A",
            &[FilterOrGroup::Filter(Filter::new(Condition::Greater, 2))],
            Operator::And,
        );
        assert_eq!(out.height(), 2);
        let code = mask_code(
            "df['A']",
            &DataType::Int64,
            Operator::And,
            &[FilterOrGroup::Filter(Filter::new(Condition::Greater, 2))],
        )
        .expect("code");
        assert_eq!(code.as_deref(), Some("df['A'] > 2"));
    }

    #[test]
    fn test_not_exactly_keeps_nulls() {
        let df = df!("A" => [Some(1i64), None, Some(3)]).expect("df");
        let out = apply(
            &df,
            "A",
            &[FilterOrGroup::Filter(Filter::new(Condition::NumberNotExactly, 3))],
            Operator::And,
        );
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn test_group_or() {
        let df = df!("B" => ["abc", "dEf", "HiJ", ""]).expect("df");
        let filters = [FilterOrGroup::Group {
            filters: vec![
                Filter::new(Condition::StringStartsWith, "a"),
                Filter::new(Condition::StringContainsCaseInsensitive, "e"),
            ],
            operator: Operator::Or,
        }];
        let out = apply(&df, "B", &filters, Operator::And);
        assert_eq!(out.height(), 2);

        let code = mask_code("df['B']", &DataType::String, Operator::And, &filters)
            .expect("code")
            .expect("mask");
        assert_eq!(
            code,
            "(df['B'].str.startswith('a', na=False)) | (df['B'].str.contains('e', case=False, na=False, regex=False))"
        );
    }

    #[test]
    fn test_empty_on_strings() {
        let df = df!("B" => [Some("x"), None, Some("")]).expect("df");
        let out = apply(
            &df,
            "B",
            &[FilterOrGroup::Filter(Filter::new(Condition::Empty, ""))],
            Operator::And,
        );
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn test_wrong_type_is_type_mismatch() {
        let err = filter_expr(
            "B",
            &DataType::String,
            &Filter::new(Condition::DatetimeGreater, "1/1/2015"),
        )
        .unwrap_err();
        assert_eq!(err.error_kind(), "type_mismatch");
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("1/1/2015").is_some());
        assert!(parse_datetime("2015-01-01").is_some());
        assert!(parse_datetime("2015-01-01 10:00:00").is_some());
        assert!(parse_datetime("tomorrow").is_none());
    }

    #[test]
    fn test_filter_json_shapes() {
        let json = r#"[{"condition": "greater", "value": 2},
                       {"filters": [{"condition": "empty", "value": ""}], "operator": "Or"}]"#;
        let parsed: Vec<FilterOrGroup> = serde_json::from_str(json).expect("parse filters");
        assert!(matches!(parsed[0], FilterOrGroup::Filter(_)));
        assert!(matches!(parsed[1], FilterOrGroup::Group { operator: Operator::Or, .. }));
    }
}
