//! Building call arguments from raw directive expressions.
//!
//! Resolution order for one expression, first hit wins:
//! 1. an item scope on the origin element or one of its ancestors
//! 2. form controls whose `name` nests below the expression (`user.name`,
//!    `tags[0]`), assembled into an object or array
//! 3. a single control named exactly like the expression
//! 4. a deep copy of the state value (exact key or final-segment match)
//! 5. a literal: `true`, `false`, `null`, numbers, quoted strings, JSON
//! 6. the expression text itself
//!
//! Nothing is ever evaluated as code.

use crate::bindings::{control_value, ControlKind};
use crate::path::find_key_by_suffix;
use crate::runtime::Runtime;
use jrx_dom::{Document, NodeId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static NUMERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeral pattern is valid"));

/// Closed-form literal parser. `None` when `expr` is not a literal.
pub fn parse_literal(expr: &str) -> Option<Value> {
    let expr = expr.trim();
    match expr {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if NUMERAL.is_match(expr) {
        if let Ok(i) = expr.parse::<i64>() {
            return Some(Value::from(i));
        }
        return expr
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number);
    }
    if expr.len() >= 2 {
        let first = expr.chars().next()?;
        if (first == '\'' || first == '"') && expr.ends_with(first) {
            return Some(Value::String(unquote(&expr[1..expr.len() - 1], first)));
        }
    }
    if expr.starts_with('{') || expr.starts_with('[') {
        if let Ok(value) = serde_json::from_str(expr) {
            return Some(value);
        }
        return serde_json::from_str(&expr.replace('\'', "\"")).ok();
    }
    None
}

fn unquote(body: &str, quote: char) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) if other == quote || other == '\\' => out.push(other),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Largest gap an index may open past the end of an array.
const MAX_INDEX_GAP: usize = 1024;

/// Assign `value` at a dotted/bracketed `path` below `target`, creating
/// objects, or arrays where the next segment is numeric. Indices further than
/// [`MAX_INDEX_GAP`] past the end are ignored.
pub fn set_nested_property(target: &mut Value, path: &str, value: Value) {
    let normalized = path.replace('[', ".").replace(']', "");
    let parts: Vec<&str> = normalized.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return;
    }
    let mut current = target;
    for (i, part) in parts.iter().enumerate() {
        let last = i + 1 == parts.len();
        let next_is_index = parts
            .get(i + 1)
            .is_some_and(|p| p.chars().all(|c| c.is_ascii_digit()));
        let fresh = || {
            if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        };
        if !current.is_object() && !current.is_array() {
            *current = Value::Object(Map::new());
        }
        let slot: &mut Value = match current {
            Value::Array(items) => match part.parse::<usize>() {
                Ok(index) if index <= items.len().saturating_add(MAX_INDEX_GAP) => {
                    if items.len() <= index {
                        items.resize(index + 1, Value::Null);
                    }
                    &mut items[index]
                }
                Ok(index) => {
                    log::warn!("Ignoring out-of-range index {index} in control name {path}");
                    return;
                }
                Err(_) => return,
            },
            Value::Object(map) => map.entry(part.to_string()).or_insert(Value::Null),
            _ => return,
        };
        if last {
            *slot = value;
            return;
        }
        if slot.is_null() || (!slot.is_object() && !slot.is_array()) {
            *slot = fresh();
        }
        current = slot;
    }
}

/// Controls under `root` whose name nests below `expr`, with the path of the
/// name starting at `expr`.
fn nested_controls(doc: &Document, root: NodeId, expr: &str) -> Vec<(NodeId, String)> {
    let dotted = format!(".{expr}");
    let mut out = Vec::new();
    for node in doc.descendants(root) {
        if ControlKind::of(doc, node).is_none() {
            continue;
        }
        let Some(name) = doc.attr(node, "name") else {
            continue;
        };
        let nested = name.starts_with(&format!("{expr}."))
            || name.starts_with(&format!("{expr}["))
            || name.contains(&format!(".{expr}."))
            || name.ends_with(&dotted);
        if !nested || name == expr {
            continue;
        }
        let from = if name.starts_with(expr) {
            0
        } else {
            match name.find(&dotted) {
                Some(at) => at + 1,
                None => continue,
            }
        };
        out.push((node, name[from..].to_string()));
    }
    out
}

impl Runtime {
    /// Resolve one argument expression for a call issued from `origin`.
    pub fn build_value(&self, expr: &str, origin: NodeId) -> Value {
        let expr = expr.trim();

        for node in self.doc.ancestors_inclusive(origin) {
            if let Some(value) = self.scopes.get(&node).and_then(|scope| scope.lookup(expr)) {
                return value;
            }
        }

        let controls = nested_controls(&self.doc, self.root, expr);
        if !controls.is_empty() {
            let mut wrapper = Value::Object(Map::new());
            for (node, path) in controls {
                set_nested_property(&mut wrapper, &path, control_value(&self.doc, node));
            }
            if let Some(value) = wrapper.get(expr) {
                return value.clone();
            }
        }

        if let Some(value) = self.named_control_value(expr) {
            return value;
        }

        if let Some(key) = find_key_by_suffix(self.store.values(), expr) {
            if let Some(value) = self.store.get(key) {
                return value.clone();
            }
        }

        parse_literal(expr).unwrap_or_else(|| Value::String(expr.to_string()))
    }

    /// Value of the control named `name`. Radio groups yield the checked
    /// radio's value, or null when none is checked.
    fn named_control_value(&self, name: &str) -> Option<Value> {
        let controls: Vec<NodeId> = self
            .doc
            .select(self.root, |el| el.attr("name") == Some(name))
            .into_iter()
            .filter(|node| ControlKind::of(&self.doc, *node).is_some())
            .collect();
        let first = *controls.first()?;
        if controls.len() > 1 && ControlKind::of(&self.doc, first) == Some(ControlKind::Radio) {
            return Some(
                controls
                    .iter()
                    .find(|radio| self.doc.checked(**radio))
                    .map(|radio| Value::String(self.doc.value(*radio)))
                    .unwrap_or(Value::Null),
            );
        }
        Some(control_value(&self.doc, first))
    }

    /// Resolve every argument expression, in order.
    pub fn build_args(&self, exprs: &[String], origin: NodeId) -> Vec<Value> {
        exprs
            .iter()
            .map(|expr| self.build_value(expr, origin))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn literals() {
        assert_eq!(parse_literal("true"), Some(json!(true)));
        assert_eq!(parse_literal("null"), Some(json!(null)));
        assert_eq!(parse_literal("-12"), Some(json!(-12)));
        assert_eq!(parse_literal("3.5"), Some(json!(3.5)));
        assert_eq!(parse_literal("'it\\'s'"), Some(json!("it's")));
        assert_eq!(parse_literal("\"x\""), Some(json!("x")));
        assert_eq!(parse_literal("{'a': [1, 2]}"), Some(json!({"a": [1, 2]})));
        assert_eq!(parse_literal("[1,"), None);
        assert_eq!(parse_literal("alert(1)"), None);
        assert_eq!(parse_literal("'"), None);
    }

    #[test]
    fn nested_property_paths() {
        let mut target = json!({});
        set_nested_property(&mut target, "user.name", json!("Ana"));
        set_nested_property(&mut target, "user.tags[1]", json!("b"));
        set_nested_property(&mut target, "user.tags[0]", json!("a"));
        assert_eq!(target, json!({"user": {"name": "Ana", "tags": ["a", "b"]}}));
    }

    #[test]
    fn huge_indices_are_ignored() {
        let mut target = json!({});
        set_nested_property(&mut target, "user.tags[18446744073709551615]", json!("x"));
        set_nested_property(&mut target, "user.ids[99999999999]", json!(1));
        assert_eq!(target, json!({"user": {"tags": [], "ids": []}}));

        set_nested_property(&mut target, "user.ids[2]", json!(3));
        assert_eq!(target["user"]["ids"], json!([null, null, 3]));
    }

    #[test]
    fn nested_controls_match_prefixes() {
        let doc = jrx_dom::parse_document(
            r#"<input name="user.name"><input name="user[age]"><input name="form.user.mail"><input name="username">"#,
        );
        let found: Vec<String> = nested_controls(&doc, doc.root(), "user")
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        assert_eq!(found, vec!["user.name", "user[age]", "user.mail"]);
    }
}
