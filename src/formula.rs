//! Spreadsheet formula language.
//!
//! A formula is `=` followed by an expression over literals, column headers
//! and a handful of functions. Parsing is pure: it needs only the formula text
//! and the headers visible in the sheet. A parsed formula becomes a polars
//! [`Expr`] for execution and a pandas expression for the generated script.
//!
//! Headers are written bare when they are plain identifiers (`Sales`) and in
//! backticks otherwise (`` `Unit Price` ``). Missing closing parentheses at the
//! end of the formula are added.

use crate::code_chunks::python::{py_number, py_str};
use crate::column_headers::ColumnHeader;
use crate::error::{ExecutionErrorKind, Result, SheetError};
use polars::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Quoted(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

fn formula_error(msg: impl Into<String>) -> SheetError {
    SheetError::execution(ExecutionErrorKind::FormulaError, msg)
}

fn tokenize(text: &str) -> Result<Vec<Spanned>> {
    const OPS: [&str; 12] = ["<=", ">=", "<>", "+", "-", "*", "/", "^", "&", "=", "<", ">"];

    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < text.len() {
        let c = text[i..].chars().next().unwrap_or(' ');
        let start = i;
        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }
        let token = match c {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '"' | '\'' | '`' => {
                let Some(len) = text[i + 1..].find(c) else {
                    return Err(formula_error(format!("unterminated {c} starting at {i}")));
                };
                let inner = text[i + 1..i + 1 + len].to_owned();
                i += len + 2;
                if c == '`' {
                    Token::Quoted(inner)
                } else {
                    Token::Str(inner)
                }
            }
            c if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) => {
                let len = text[i..]
                    .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                    .unwrap_or(text.len() - i);
                let raw = &text[i..i + len];
                i += len;
                Token::Number(
                    raw.parse()
                        .map_err(|_| formula_error(format!("'{raw}' is not a number")))?,
                )
            }
            c if c.is_alphanumeric() || c == '_' => {
                let len = text[i..]
                    .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                    .unwrap_or(text.len() - i);
                let ident = text[i..i + len].to_owned();
                i += len;
                Token::Ident(ident)
            }
            _ => {
                let Some(op) = OPS.iter().find(|op| text[i..].starts_with(**op)) else {
                    return Err(formula_error(format!("unexpected character '{c}'")));
                };
                i += op.len();
                Token::Op(op)
            }
        };
        tokens.push(Spanned {
            token,
            start,
            end: i,
        });
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sum,
    Abs,
    Round,
    Upper,
    Lower,
    Len,
    Concat,
    If,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "SUM" => Self::Sum,
            "ABS" => Self::Abs,
            "ROUND" => Self::Round,
            "UPPER" => Self::Upper,
            "LOWER" => Self::Lower,
            "LEN" => Self::Len,
            "CONCAT" => Self::Concat,
            "IF" => Self::If,
            _ => return None,
        })
    }

    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Sum | Self::Concat => (1, None),
            Self::Abs | Self::Upper | Self::Lower | Self::Len => (1, Some(1)),
            Self::Round => (1, Some(2)),
            Self::If => (3, Some(3)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Number(f64),
    Str(String),
    Bool(bool),
    Column(ColumnHeader),
    Neg(Box<Ast>),
    Binary(&'static str, Box<Ast>, Box<Ast>),
    Call(Func, Vec<Ast>),
}

impl Ast {
    fn is_scalar(&self) -> bool {
        match self {
            Self::Number(_) | Self::Str(_) | Self::Bool(_) => true,
            Self::Column(_) => false,
            Self::Neg(inner) => inner.is_scalar(),
            Self::Binary(_, lhs, rhs) => lhs.is_scalar() && rhs.is_scalar(),
            Self::Call(_, args) => args.iter().all(Self::is_scalar),
        }
    }

    fn collect_columns(&self, out: &mut Vec<ColumnHeader>) {
        match self {
            Self::Column(h) => {
                if !out.contains(h) {
                    out.push(h.clone());
                }
            }
            Self::Neg(inner) => inner.collect_columns(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_columns(out)),
            Self::Number(_) | Self::Str(_) | Self::Bool(_) => {}
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    headers: &'a [ColumnHeader],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek()
            && ops.contains(op)
        {
            let op = *op;
            self.pos += 1;
            return Some(op);
        }
        None
    }

    /// A `)` or the end of input; the latter closes the paren implicitly.
    fn close_paren(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::RParen) => {
                self.pos += 1;
                Ok(())
            }
            None => Ok(()),
            Some(other) => Err(formula_error(format!("expected ')', found {other:?}"))),
        }
    }

    fn comparison(&mut self) -> Result<Ast> {
        let mut lhs = self.concat()?;
        while let Some(op) = self.eat_op(&["=", "<>", "<", ">", "<=", ">="]) {
            let rhs = self.concat()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn concat(&mut self) -> Result<Ast> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.eat_op(&["&"]) {
            let rhs = self.additive()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Ast> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.multiplicative()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Ast> {
        let mut lhs = self.power()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.power()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Ast> {
        let base = self.unary()?;
        if let Some(op) = self.eat_op(&["^"]) {
            let exponent = self.power()?;
            return Ok(Ast::Binary(op, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Ast> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(Ast::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op(&["+"]).is_some() {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Ast::Number(n)),
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::Quoted(h)) => self.column(h),
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                self.close_paren()?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    return self.call(&name);
                }
                if self.headers.contains(&name) {
                    return Ok(Ast::Column(name));
                }
                match name.to_ascii_uppercase().as_str() {
                    "TRUE" => Ok(Ast::Bool(true)),
                    "FALSE" => Ok(Ast::Bool(false)),
                    _ => Err(SheetError::execution(
                        ExecutionErrorKind::MissingColumn,
                        format!("formula references unknown column '{name}'"),
                    )),
                }
            }
            Some(other) => Err(formula_error(format!("unexpected {other:?}"))),
            None => Err(formula_error("formula ended unexpectedly")),
        }
    }

    fn column(&self, header: String) -> Result<Ast> {
        if self.headers.contains(&header) {
            Ok(Ast::Column(header))
        } else {
            Err(SheetError::execution(
                ExecutionErrorKind::MissingColumn,
                format!("formula references unknown column '{header}'"),
            ))
        }
    }

    fn call(&mut self, name: &str) -> Result<Ast> {
        let func =
            Func::lookup(name).ok_or_else(|| formula_error(format!("unknown function {name}")))?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen) | None) {
            loop {
                args.push(self.comparison()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.close_paren()?;

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(formula_error(format!(
                "{} takes {} argument(s), got {}",
                name.to_ascii_uppercase(),
                match max {
                    Some(max) if max == min => min.to_string(),
                    Some(max) => format!("{min} to {max}"),
                    None => format!("at least {min}"),
                },
                args.len()
            )));
        }
        if func == Func::Round
            && let Some(digits) = args.get(1)
            && !matches!(digits, Ast::Number(n) if n.fract() == 0.0 && *n >= 0.0)
        {
            return Err(formula_error("ROUND digits must be a whole number"));
        }
        Ok(Ast::Call(func, args))
    }
}

/// A formula checked against the headers of one sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    ast: Ast,
    dependencies: Vec<ColumnHeader>,
}

/// Parse `text` against the headers visible in the sheet.
pub fn parse(text: &str, headers: &[ColumnHeader]) -> Result<ParsedFormula> {
    let body = text.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    if body.trim().is_empty() {
        return Ok(ParsedFormula {
            ast: Ast::Number(0.0),
            dependencies: Vec::new(),
        });
    }
    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        headers,
    };
    let ast = parser.comparison()?;
    if let Some(extra) = parser.peek() {
        return Err(formula_error(format!("unexpected {extra:?} after expression")));
    }
    let mut dependencies = Vec::new();
    ast.collect_columns(&mut dependencies);
    Ok(ParsedFormula { ast, dependencies })
}

impl ParsedFormula {
    /// Headers read by the formula, in first-use order.
    pub fn dependencies(&self) -> &[ColumnHeader] {
        &self.dependencies
    }

    pub fn references(&self, header: &str) -> bool {
        self.dependencies.iter().any(|h| h == header)
    }

    /// Polars expression computing the formula's column.
    pub fn to_expr(&self) -> Expr {
        expr_of(&self.ast)
    }

    /// Pandas expression computing the formula's column from `df_name`.
    pub fn to_pandas(&self, df_name: &str) -> String {
        pandas_of(&self.ast, df_name, true)
    }
}

fn expr_of(ast: &Ast) -> Expr {
    match ast {
        Ast::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => lit(*n as i64),
        Ast::Number(n) => lit(*n),
        Ast::Str(s) => lit(s.clone()),
        Ast::Bool(b) => lit(*b),
        Ast::Column(h) => col(h.as_str()),
        Ast::Neg(inner) => lit(0i64) - expr_of(inner),
        Ast::Binary(op, lhs, rhs) => {
            let (l, r) = (expr_of(lhs), expr_of(rhs));
            match *op {
                "+" => l + r,
                "-" => l - r,
                "*" => l * r,
                "/" => l.cast(DataType::Float64) / r.cast(DataType::Float64),
                "^" => l.cast(DataType::Float64).pow(r),
                "&" => concat_str([l.cast(DataType::String), r.cast(DataType::String)], "", false),
                "=" => l.eq(r),
                "<>" => l.neq(r),
                "<" => l.lt(r),
                ">" => l.gt(r),
                "<=" => l.lt_eq(r),
                _ => l.gt_eq(r),
            }
        }
        Ast::Call(func, args) => call_expr(*func, args),
    }
}

fn call_expr(func: Func, args: &[Ast]) -> Expr {
    let mut exprs = args.iter().map(expr_of);
    let first = exprs.next().unwrap_or_else(|| lit(NULL));
    match func {
        Func::Sum => exprs.fold(first.fill_null(lit(0i64)), |acc, e| {
            acc + e.fill_null(lit(0i64))
        }),
        Func::Abs => first.abs(),
        Func::Round => {
            let digits = match args.get(1) {
                Some(Ast::Number(n)) => *n as u32,
                _ => 0,
            };
            first.cast(DataType::Float64).round(digits)
        }
        Func::Upper => first.cast(DataType::String).str().to_uppercase(),
        Func::Lower => first.cast(DataType::String).str().to_lowercase(),
        Func::Len => first
            .cast(DataType::String)
            .str()
            .len_chars()
            .cast(DataType::Int64),
        Func::Concat => {
            let mut all = vec![first.cast(DataType::String)];
            all.extend(exprs.map(|e| e.cast(DataType::String)));
            concat_str(all, "", false)
        }
        Func::If => {
            let then = exprs.next().unwrap_or_else(|| lit(NULL));
            let otherwise = exprs.next().unwrap_or_else(|| lit(NULL));
            when(first).then(then).otherwise(otherwise)
        }
    }
}

fn pandas_of(ast: &Ast, df: &str, top: bool) -> String {
    let wrap = |s: String| if top { s } else { format!("({s})") };
    match ast {
        Ast::Number(n) => py_number(*n),
        Ast::Str(s) => py_str(s),
        Ast::Bool(true) => "True".to_owned(),
        Ast::Bool(false) => "False".to_owned(),
        Ast::Column(h) => format!("{df}[{}]", py_str(h)),
        Ast::Neg(inner) => format!("-{}", pandas_of(inner, df, false)),
        Ast::Binary("&", lhs, rhs) => wrap(format!(
            "{} + {}",
            as_str_code(lhs, df),
            as_str_code(rhs, df)
        )),
        Ast::Binary(op, lhs, rhs) => {
            let py_op = match *op {
                "^" => "**",
                "=" => "==",
                "<>" => "!=",
                other => other,
            };
            wrap(format!(
                "{} {py_op} {}",
                pandas_of(lhs, df, false),
                pandas_of(rhs, df, false)
            ))
        }
        Ast::Call(func, args) => call_pandas(*func, args, df, ast.is_scalar()),
    }
}

fn as_str_code(ast: &Ast, df: &str) -> String {
    match ast {
        Ast::Str(s) => py_str(s),
        Ast::Number(n) => py_str(&py_number(*n)),
        _ if ast.is_scalar() => format!("str({})", pandas_of(ast, df, true)),
        Ast::Column(_) => format!("{}.astype(str)", pandas_of(ast, df, true)),
        _ => format!("{}.astype(str)", pandas_of(ast, df, false)),
    }
}

fn call_pandas(func: Func, args: &[Ast], df: &str, scalar: bool) -> String {
    let arg = |i: usize, top: bool| {
        args.get(i)
            .map_or_else(|| "None".to_owned(), |a| pandas_of(a, df, top))
    };
    match func {
        Func::Sum if scalar => format!(
            "({})",
            args.iter()
                .map(|a| pandas_of(a, df, false))
                .collect::<Vec<_>>()
                .join(" + ")
        ),
        Func::Sum => format!(
            "({})",
            args.iter()
                .map(|a| if a.is_scalar() {
                    pandas_of(a, df, false)
                } else {
                    format!("{}.fillna(0)", pandas_of(a, df, false))
                })
                .collect::<Vec<_>>()
                .join(" + ")
        ),
        Func::Abs if scalar => format!("abs({})", arg(0, true)),
        Func::Abs => format!("{}.abs()", arg(0, false)),
        Func::Round => {
            let digits = match args.get(1) {
                Some(Ast::Number(n)) => *n as u32,
                _ => 0,
            };
            if scalar {
                format!("round(float({}), {digits})", arg(0, true))
            } else {
                format!("{}.astype(float).round({digits})", arg(0, false))
            }
        }
        Func::Upper if scalar => format!("str({}).upper()", arg(0, true)),
        Func::Upper => format!("{}.astype(str).str.upper()", arg(0, false)),
        Func::Lower if scalar => format!("str({}).lower()", arg(0, true)),
        Func::Lower => format!("{}.astype(str).str.lower()", arg(0, false)),
        Func::Len if scalar => format!("len(str({}))", arg(0, true)),
        Func::Len => format!("{}.astype(str).str.len()", arg(0, false)),
        Func::Concat => format!(
            "({})",
            args.iter()
                .map(|a| as_str_code(a, df))
                .collect::<Vec<_>>()
                .join(" + ")
        ),
        Func::If => match args {
            [cond, then, otherwise] if cond.is_scalar() => format!(
                "({} if {} else {})",
                pandas_of(then, df, false),
                pandas_of(cond, df, false),
                pandas_of(otherwise, df, false)
            ),
            [cond, then, otherwise] => format!(
                "pd.Series({}, index={df}.index).where({}, {})",
                pandas_of(then, df, true),
                pandas_of(cond, df, true),
                pandas_of(otherwise, df, true)
            ),
            _ => "None".to_owned(),
        },
    }
}

/// How a header is written inside a formula.
pub fn header_reference(header: &str) -> String {
    let bare = !header.is_empty()
        && header.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !header.starts_with(|c: char| c.is_ascii_digit())
        && Func::lookup(header).is_none()
        && !header.eq_ignore_ascii_case("true")
        && !header.eq_ignore_ascii_case("false");
    if bare {
        header.to_owned()
    } else {
        format!("`{header}`")
    }
}

/// Rewrite every reference to `old` in `text` so it points at `new`.
///
/// Text that does not tokenize is returned unchanged.
pub fn rename_references(text: &str, old: &str, new: &str) -> String {
    let (prefix, body) = match text.find('=') {
        Some(idx) if text[..idx].trim().is_empty() => text.split_at(idx + 1),
        _ => ("", text),
    };
    let Ok(tokens) = tokenize(body) else {
        return text.to_owned();
    };

    let mut out = String::with_capacity(text.len());
    out.push_str(prefix);
    let mut last = 0;
    for (i, spanned) in tokens.iter().enumerate() {
        let is_call = matches!(tokens.get(i + 1), Some(Spanned { token: Token::LParen, .. }));
        let matches_old = match &spanned.token {
            Token::Ident(name) => name == old && !is_call,
            Token::Quoted(name) => name == old,
            _ => false,
        };
        if matches_old {
            out.push_str(&body[last..spanned.start]);
            out.push_str(&header_reference(new));
            last = spanned.end;
        }
    }
    out.push_str(&body[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<ColumnHeader> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn eval(formula: &str, df: &DataFrame) -> Series {
        let hs = headers(
            &df.get_column_names()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        );
        let parsed = parse(formula, &hs).expect("parse formula");
        let out = df
            .clone()
            .lazy()
            .with_column(parsed.to_expr().alias("out"))
            .collect()
            .expect("evaluate formula");
        out.column("out")
            .expect("out column")
            .as_materialized_series()
            .clone()
    }

    #[test]
    fn test_constant_formula() {
        let parsed = parse("=10", &headers(&["A"])).expect("parse");
        assert_eq!(parsed.to_pandas("df1"), "10");
        assert!(parsed.dependencies().is_empty());
    }

    #[test]
    fn test_column_arithmetic() {
        let df = df!("A" => [1i64, 2, 3]).expect("df");
        let out = eval("=A * 2 + 1", &df);
        let values: Vec<Option<i64>> = out.i64().expect("i64").into_iter().collect();
        assert_eq!(values, vec![Some(3), Some(5), Some(7)]);

        let parsed = parse("=A * 2 + 1", &headers(&["A"])).expect("parse");
        assert_eq!(parsed.to_pandas("df1"), "(df1['A'] * 2) + 1");
    }

    #[test]
    fn test_quoted_headers_and_functions() {
        let df = df!("Unit Price" => [1.25f64, -2.5], "name" => ["a", "b"]).expect("df");
        let out = eval("=ABS(`Unit Price`)", &df);
        let values: Vec<Option<f64>> = out.f64().expect("f64").into_iter().collect();
        assert_eq!(values, vec![Some(1.25), Some(2.5)]);

        let out = eval("=UPPER(name) & \"!\"", &df);
        let values: Vec<Option<&str>> = out.str().expect("str").into_iter().collect();
        assert_eq!(values, vec![Some("A!"), Some("B!")]);

        let parsed = parse("=ABS(`Unit Price`)", &headers(&["Unit Price"])).expect("parse");
        assert_eq!(parsed.to_pandas("df"), "df['Unit Price'].abs()");
    }

    #[test]
    fn test_missing_parens_are_closed() {
        let df = df!("A" => [1i64, 2]).expect("df");
        let out = eval("=SUM(A, 1", &df);
        let values: Vec<Option<i64>> = out.i64().expect("i64").into_iter().collect();
        assert_eq!(values, vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_unknown_column_is_missing_column() {
        let err = parse("=B + 1", &headers(&["A"])).unwrap_err();
        assert_eq!(err.error_kind(), "missing_column");

        let err = parse("=NOPE(A)", &headers(&["A"])).unwrap_err();
        assert_eq!(err.error_kind(), "formula_error");
    }

    #[test]
    fn test_if_formula() {
        let df = df!("A" => [1i64, 5]).expect("df");
        let out = eval("=IF(A > 2, 1, 0)", &df);
        let values: Vec<Option<i32>> = out
            .cast(&DataType::Int32)
            .expect("cast")
            .i32()
            .expect("i32")
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_rename_references() {
        assert_eq!(rename_references("=A + SUM(A, B)", "A", "Total"), "=Total + SUM(Total, B)");
        assert_eq!(rename_references("=A * 2", "A", "new name"), "=`new name` * 2");
        assert_eq!(rename_references("=SUM(B)", "SUM", "X"), "=SUM(B)");
    }
}
