//! Python literal rendering for generated code.

use serde_json::Value;

/// Single-quoted Python string literal.
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Raw string literal used for file paths, falling back to an escaped string
/// when the path cannot be written raw.
pub fn py_path(path: &str) -> String {
    if path.contains('\'') || path.ends_with('\\') {
        py_str(path)
    } else {
        format!("r'{path}'")
    }
}

/// Number literal; integral values print without a fraction.
pub fn py_number(n: f64) -> String {
    if n.is_nan() {
        "float('nan')".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "float('inf')" } else { "float('-inf')" }.to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// `['a', 'b']`
pub fn py_str_list<S: AsRef<str>>(items: &[S]) -> String {
    let inner: Vec<String> = items.iter().map(|s| py_str(s.as_ref())).collect();
    format!("[{}]", inner.join(", "))
}

/// Python rendering of a JSON value, as `repr` would print it.
pub fn py_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => py_str(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(py_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", py_str(k), py_value(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_py_str_escapes() {
        assert_eq!(py_str("it's"), r"'it\'s'");
        assert_eq!(py_str(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_py_value() {
        assert_eq!(
            py_value(&json!({"condition": "greater", "value": 2})),
            "{'condition': 'greater', 'value': 2}"
        );
        assert_eq!(py_value(&json!([true, null, 1.5])), "[True, None, 1.5]");
    }

    #[test]
    fn test_py_number() {
        assert_eq!(py_number(2.0), "2");
        assert_eq!(py_number(2.5), "2.5");
    }
}
