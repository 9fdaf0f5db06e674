//! Dotted-path resolution against the flat state map.
//!
//! Keys may themselves contain dots (`"Leaf#7.orders"` is one opaque key), so a
//! lookup prefers the whole expression, then the longest prefix present in the
//! map, and only walks ordinary properties past that prefix.

use indexmap::IndexMap;
use serde_json::Value;

/// Flat, insertion-ordered state: full dotted key → JSON value.
pub type StateMap = IndexMap<String, Value>;

const FORBIDDEN_SEGMENTS: &[&str] = &["__proto__", "constructor", "prototype"];

/// True if any dotted segment of `expr` is a prototype-pollution vector.
pub fn is_forbidden(expr: &str) -> bool {
    expr.split(['.', '[', ']'])
        .any(|segment| FORBIDDEN_SEGMENTS.contains(&segment.trim()))
}

fn empty() -> Value {
    Value::String(String::new())
}

/// Resolve `expr` to a raw value. Misses yield an empty string, never an error.
pub fn resolve(expr: &str, state: &StateMap) -> Value {
    let expr = expr.trim();
    if expr.is_empty() {
        return empty();
    }
    if is_forbidden(expr) {
        log::warn!("Refusing to resolve forbidden path {expr:?}");
        return empty();
    }
    if let Some(value) = state.get(expr) {
        return value.clone();
    }

    let parts: Vec<&str> = expr.split('.').collect();
    for split in (1..parts.len()).rev() {
        let prefix = parts[..split].join(".");
        if let Some(root) = state.get(&prefix) {
            return navigate(root, &parts[split..]);
        }
    }
    log::debug!("Unresolved expression {expr:?}");
    empty()
}

/// Resolve and render for interpolation into markup.
pub fn resolve_escaped(expr: &str, state: &StateMap) -> String {
    escape_html(&display(&resolve(expr, state)))
}

/// Walk `segments` below `root`. A trailing `size`/`length` counts instead.
pub fn navigate(root: &Value, segments: &[&str]) -> Value {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        if current.is_null() {
            return empty();
        }
        let last = i + 1 == segments.len();
        if last && matches!(*segment, "size" | "length") {
            return size_of(current);
        }
        current = match current {
            Value::Object(map) => match map.get(*segment) {
                Some(next) => next,
                None => return empty(),
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => next,
                None => return empty(),
            },
            _ => return empty(),
        };
    }
    current.clone()
}

/// Length of arrays and strings, a numeric `length`/`size` field of objects,
/// otherwise the string `"0"`.
pub fn size_of(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::from(items.len()),
        Value::String(s) => Value::from(s.chars().count()),
        Value::Object(map) => map
            .get("length")
            .filter(|v| v.is_number())
            .or_else(|| map.get("size").filter(|v| v.is_number()))
            .cloned()
            .unwrap_or_else(|| Value::String("0".to_string())),
        _ => Value::String("0".to_string()),
    }
}

/// String form used for text nodes and control values.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

/// Script-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn root_segment(expr: &str) -> &str {
    expr.split('.').next().unwrap_or(expr)
}

pub fn final_segment(expr: &str) -> &str {
    expr.rsplit('.').next().unwrap_or(expr)
}

/// First key equal to `name` or ending in `.name`.
pub fn find_key_by_suffix<'a>(state: &'a StateMap, name: &str) -> Option<&'a String> {
    if let Some((key, _)) = state.get_key_value(name) {
        return Some(key);
    }
    let suffix = format!(".{name}");
    state.keys().find(|key| key.ends_with(&suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state(pairs: &[(&str, Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn whole_key_wins_over_splitting() {
        let s = state(&[("Leaf#3.user.name", json!("Ana"))]);
        assert_eq!(resolve("Leaf#3.user.name", &s), json!("Ana"));
        assert_eq!(resolve("Leaf#3.user", &s), json!(""));
        assert_eq!(resolve("user.name", &s), json!(""));
    }

    #[test]
    fn longest_prefix_then_navigation() {
        let s = state(&[
            ("Leaf#3.user", json!({"name": "Ana", "tags": ["a", "b"]})),
            ("Leaf#3", json!({"user": {"name": "Wrong"}})),
        ]);
        assert_eq!(resolve("Leaf#3.user.name", &s), json!("Ana"));
        assert_eq!(resolve("Leaf#3.user.tags.1", &s), json!("b"));
        assert_eq!(resolve("Leaf#3.user.missing.deep", &s), json!(""));
    }

    #[test]
    fn size_and_length_accessors() {
        let s = state(&[
            ("orders", json!([1, 2, 3])),
            ("name", json!("héllo")),
            ("page", json!({"size": 20})),
            ("flag", json!(true)),
        ]);
        assert_eq!(resolve("orders.size", &s), json!(3));
        assert_eq!(resolve("orders.length", &s), json!(3));
        assert_eq!(resolve("name.length", &s), json!(5));
        assert_eq!(resolve("page.size", &s), json!(20));
        assert_eq!(resolve("flag.size", &s), json!("0"));
    }

    #[test]
    fn forbidden_segments_resolve_empty() {
        let s = state(&[("__proto__", json!({"x": 1})), ("a", json!({"constructor": 1}))]);
        assert_eq!(resolve("__proto__.x", &s), json!(""));
        assert_eq!(resolve("a.constructor", &s), json!(""));
    }

    #[test]
    fn display_follows_script_conversions() {
        assert_eq!(display(&json!(null)), "");
        assert_eq!(display(&json!(3.0)), "3");
        assert_eq!(display(&json!(2.5)), "2.5");
        assert_eq!(display(&json!(["a", 1, null])), "a,1,");
        assert_eq!(display(&json!(false)), "false");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(null)));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn escaping_covers_quotes_and_slash() {
        assert_eq!(
            escape_html(r#"<a href="x">'/'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&#x2F;&#x27;&lt;&#x2F;a&gt;"
        );
        let s = state(&[("html", json!("<b>"))]);
        assert_eq!(resolve_escaped("html", &s), "&lt;b&gt;");
    }

    #[test]
    fn suffix_lookup_prefers_exact_key() {
        let s = state(&[("Comp#1.count", json!(1)), ("count", json!(2))]);
        assert_eq!(find_key_by_suffix(&s, "count").map(String::as_str), Some("count"));
        let s = state(&[("Comp#1.count", json!(1))]);
        assert_eq!(
            find_key_by_suffix(&s, "count").map(String::as_str),
            Some("Comp#1.count")
        );
    }
}
