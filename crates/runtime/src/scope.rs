use crate::path::{navigate, resolve, StateMap};
use serde_json::Value;

/// Item context of one rendered list entry.
///
/// Rendered nodes point at their scope through a side table keyed by node id;
/// the list registry owns the nodes, the scope owns only a copy of the item.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub alias: String,
    pub item: Value,
    pub index: usize,
}

impl Scope {
    pub fn new(alias: impl Into<String>, item: Value, index: usize) -> Self {
        Self {
            alias: alias.into(),
            item,
            index,
        }
    }

    /// Resolve `expr` against this item: the alias (or `this`) itself, or a
    /// path below it. `None` when `expr` does not start with the alias.
    pub fn lookup(&self, expr: &str) -> Option<Value> {
        let expr = expr.trim();
        if expr == self.alias || expr == "this" {
            return Some(self.item.clone());
        }
        let rest = expr
            .strip_prefix(self.alias.as_str())
            .and_then(|r| r.strip_prefix('.'))
            .or_else(|| expr.strip_prefix("this."))?;
        let segments: Vec<&str> = rest.split('.').collect();
        Some(navigate(&self.item, &segments))
    }
}

/// Resolve through a chain of item scopes (innermost last), then global state.
pub fn resolve_scoped(expr: &str, scopes: &[Scope], state: &StateMap) -> Value {
    scopes
        .iter()
        .rev()
        .find_map(|scope| scope.lookup(expr))
        .unwrap_or_else(|| resolve(expr, state))
}
