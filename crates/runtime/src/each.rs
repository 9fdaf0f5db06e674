//! Keyed list reconciliation for `<template data-each="listExpr:alias">`.
//!
//! Every block owns a range of the live DOM delimited by two sentinel
//! comments placed right after its template:
//!
//! ```text
//! <template data-each="items:item">…</template>
//! <!--each-start-->
//!   …nodes of entry "id:1"…
//!   …nodes of entry "id:2"…
//! <!--each-end-->
//! ```
//!
//! Entries are keyed by item identity. An entry whose item is unchanged keeps
//! its nodes; a changed item is regenerated; stale keys are removed.

use crate::bindings::{placeholders, render_template};
use crate::conditional::{parse_condition, template_condition};
use crate::path::{display, escape_html, resolve, truthy};
use crate::runtime::Runtime;
use crate::scope::{resolve_scoped, Scope};
use indexmap::IndexMap;
use jrx_dom::{inner_html, parse_fragment_in_context, NodeId};
use serde_json::Value;
use std::collections::HashMap;

pub const START_MARKER: &str = "each-start";
pub const END_MARKER: &str = "each-end";

#[derive(Debug, Clone, PartialEq)]
pub struct EachEntry {
    pub item: Value,
    /// Position the nodes were rendered at
    pub index: usize,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct EachBlock {
    pub start: NodeId,
    pub end: NodeId,
    pub entries: IndexMap<String, EachEntry>,
}

/// Split `listExpr:alias`; the alias defaults to `this`.
pub fn parse_each(attr: &str) -> (String, String) {
    match attr.split_once(':') {
        Some((list, alias)) if !alias.trim().is_empty() => {
            (list.trim().to_string(), alias.trim().to_string())
        }
        Some((list, _)) => (list.trim().to_string(), "this".to_string()),
        None => (attr.trim().to_string(), "this".to_string()),
    }
}

/// Identity of an item: its non-null `id`, the string form of a primitive, or
/// its position.
pub fn identity_key(item: &Value, index: usize) -> String {
    match item {
        Value::Object(map) => match map.get("id") {
            Some(id) if !id.is_null() => format!("id:{id}"),
            _ => format!("@{index}"),
        },
        Value::Array(_) | Value::Null => format!("@{index}"),
        primitive => format!("v:{}", display(primitive)),
    }
}

/// Make `key` unique within one pass by suffixing repeated occurrences.
fn unique_key(key: String, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(key.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        key
    } else {
        format!("{key}#{count}")
    }
}

/// Split `html` into runs outside and inside nested `<template>` elements.
/// The flag is true for nested template regions.
fn template_regions(html: &str) -> Vec<(&str, bool)> {
    const OPEN: &[u8] = b"<template";
    const CLOSE: &[u8] = b"</template>";
    let bytes = html.as_bytes();
    let mut regions = Vec::new();
    let mut depth = 0usize;
    let mut segment_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.len() > OPEN.len()
            && rest[..OPEN.len()].eq_ignore_ascii_case(OPEN)
            && matches!(rest[OPEN.len()], b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/')
        {
            if depth == 0 && segment_start < i {
                regions.push((&html[segment_start..i], false));
                segment_start = i;
            }
            depth += 1;
            i += OPEN.len();
            continue;
        }
        if depth > 0 && rest.len() >= CLOSE.len() && rest[..CLOSE.len()].eq_ignore_ascii_case(CLOSE)
        {
            depth -= 1;
            i += CLOSE.len();
            if depth == 0 {
                regions.push((&html[segment_start..i], true));
                segment_start = i;
            }
            continue;
        }
        i += 1;
    }
    if segment_start < html.len() {
        regions.push((&html[segment_start..], depth > 0));
    }
    regions
}

/// Substitute item placeholders in `html` through the scope chain (innermost
/// last): `{{index}}`, `{{alias}}`, `{{this}}` and paths below them.
/// Nested template regions and placeholders no scope knows are left alone.
pub fn render_item_html(html: &str, scopes: &[Scope]) -> String {
    let mut out = String::with_capacity(html.len());
    for (segment, nested) in template_regions(html) {
        if nested {
            out.push_str(segment);
            continue;
        }
        out.push_str(&render_template(segment, |expr| {
            if expr == "index" {
                if let Some(scope) = scopes.last() {
                    return scope.index.to_string();
                }
            }
            match scopes.iter().rev().find_map(|scope| scope.lookup(expr)) {
                Some(value) => escape_html(&display(&value)),
                None => format!("{{{{{expr}}}}}"),
            }
        }));
    }
    out
}

/// True when item markup prints `{{index}}` outside nested templates.
fn prints_index(html: &str) -> bool {
    template_regions(html)
        .into_iter()
        .any(|(segment, nested)| !nested && placeholders(segment).contains(&"index"))
}

/// Parse context for rendered item markup: rows and cells need a table
/// section, everything else parses as a child of the template's parent.
fn fragment_context(html: &str, parent_tag: Option<&str>) -> Option<String> {
    let head = html.trim_start();
    let starts_with = |prefix: &str| {
        head.len() >= prefix.len() && head[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    if starts_with("<tr") || starts_with("<td") || starts_with("<th") {
        return Some("tbody".to_string());
    }
    parent_tag.map(str::to_string)
}

fn is_block_template(el: &jrx_dom::Element) -> bool {
    el.is_template()
        && (el.has_attr("data-each") || el.has_attr("data-if") || el.has_attr("data-else"))
}

impl Runtime {
    /// Reconcile every list block under the app root against current state.
    /// Returns true if the DOM changed.
    pub fn update_each_blocks(&mut self) -> bool {
        self.release_detached_blocks();
        let templates = self
            .doc
            .select(self.root, |el| el.is_template() && el.has_attr("data-each"));
        let mut changed = false;
        for template in templates {
            if self.doc.is_connected(template) {
                changed |= self.reconcile_each(template);
            }
        }
        changed
    }

    fn reconcile_each(&mut self, template: NodeId) -> bool {
        let Some(attr) = self.doc.attr(template, "data-each") else {
            return false;
        };
        let (list_expr, alias) = parse_each(attr);
        let items = match resolve(&list_expr, self.store.values()) {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        let Some(parent) = self.doc.parent(template) else {
            return false;
        };
        let mutations_before = self.doc.mutation_count();

        let mut block = match self.each_blocks.remove(&template) {
            Some(block) => block,
            None => {
                let start = self.doc.create_comment(START_MARKER);
                let end = self.doc.create_comment(END_MARKER);
                let inserted = self
                    .doc
                    .insert_after(template, start)
                    .and_then(|()| self.doc.insert_after(start, end));
                if let Err(e) = inserted {
                    log::warn!("Cannot place list sentinels: {e}");
                    return false;
                }
                EachBlock {
                    start,
                    end,
                    entries: IndexMap::new(),
                }
            }
        };

        let html = inner_html(&self.doc, template);
        let context = fragment_context(&html, self.doc.tag(parent));
        let mut previous = std::mem::take(&mut block.entries);
        let mut next: IndexMap<String, EachEntry> = IndexMap::with_capacity(items.len());
        let mut seen = HashMap::new();
        let mut fresh = Vec::new();
        let positional = prints_index(&html);

        for (index, item) in items.into_iter().enumerate() {
            let key = unique_key(identity_key(&item, index), &mut seen);
            if let Some(mut entry) = previous.shift_remove(&key) {
                if entry.item == item && (entry.index == index || !positional) {
                    entry.index = index;
                    for node in &entry.nodes {
                        if let Some(scope) = self.scopes.get_mut(node) {
                            scope.index = index;
                        }
                    }
                    next.insert(key, entry);
                    continue;
                }
                log::debug!("List entry {key} changed or moved, regenerating");
                self.discard_nodes(&entry.nodes);
            }
            let scope = Scope::new(alias.as_str(), item.clone(), index);
            let fragment = self.render_fragment(&html, context.as_deref(), &[scope.clone()]);
            let nodes = self.doc.children(fragment).to_vec();
            for node in &nodes {
                if self.doc.is_element(*node) {
                    self.scopes.insert(*node, scope.clone());
                }
            }
            fresh.extend(nodes.iter().copied());
            next.insert(key, EachEntry { item, index, nodes });
        }

        for (_, stale) in previous {
            self.discard_nodes(&stale.nodes);
        }

        // Walk the managed range once, moving only nodes that are out of place.
        let Some(range_parent) = self.doc.parent(block.end) else {
            return false;
        };
        let mut cursor = self.doc.next_sibling(block.start).unwrap_or(block.end);
        for node in next.values().flat_map(|entry| entry.nodes.iter().copied()) {
            if node == cursor {
                cursor = self.doc.next_sibling(node).unwrap_or(block.end);
                continue;
            }
            if let Err(e) = self.doc.insert_before(range_parent, node, Some(cursor)) {
                log::warn!("Cannot place list entry: {e}");
            }
        }

        block.entries = next;
        self.each_blocks.insert(template, block);

        if !fresh.is_empty() {
            self.after_insert(&fresh);
        }
        if self.doc.has_tag(parent, "select") {
            self.reapply_select(parent);
        }
        self.doc.mutation_count() != mutations_before
    }

    /// Substitute, parse and expand nested blocks for one rendered entry.
    /// Returns a detached fragment.
    fn render_fragment(&mut self, html: &str, context: Option<&str>, scopes: &[Scope]) -> NodeId {
        let rendered = render_item_html(html, scopes);
        let fragment = parse_fragment_in_context(&mut self.doc, &rendered, context);
        self.expand_item_templates(fragment, scopes);
        fragment
    }

    /// Resolve nested list and conditional templates inside a rendered entry
    /// with the entry's scope chain, then drop the template markers.
    fn expand_item_templates(&mut self, root: NodeId, scopes: &[Scope]) {
        let templates = self.doc.select(root, is_block_template);
        for template in templates {
            let html = inner_html(&self.doc, template);
            let parent_tag = self
                .doc
                .parent(template)
                .and_then(|p| self.doc.tag(p))
                .map(str::to_string);
            let context = fragment_context(&html, parent_tag.as_deref());
            let Some(parent) = self.doc.parent(template) else {
                continue;
            };

            if let Some(attr) = self.doc.attr(template, "data-each") {
                let (list_expr, alias) = parse_each(attr);
                let items = match resolve_scoped(&list_expr, scopes, self.store.values()) {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                for (index, item) in items.into_iter().enumerate() {
                    let scope = Scope::new(alias.as_str(), item, index);
                    let mut chain = scopes.to_vec();
                    chain.push(scope.clone());
                    let fragment = self.render_fragment(&html, context.as_deref(), &chain);
                    for node in self.doc.children(fragment).to_vec() {
                        if self.doc.is_element(node) {
                            self.scopes.insert(node, scope.clone());
                        }
                    }
                    if let Err(e) = self.doc.insert_before(parent, fragment, Some(template)) {
                        log::warn!("Cannot expand nested list: {e}");
                    }
                }
            } else if let Some((cond, negate)) = template_condition(&self.doc, template) {
                let state = self.store.values();
                let show = parse_condition(&cond)
                    .eval(&mut |path| truthy(&resolve_scoped(path, scopes, state)))
                    != negate;
                if show {
                    let fragment = self.render_fragment(&html, context.as_deref(), scopes);
                    if let Err(e) = self.doc.insert_before(parent, fragment, Some(template)) {
                        log::warn!("Cannot expand nested conditional: {e}");
                    }
                }
            }
            self.doc.detach(template);
        }
    }

    /// Re-select the option matching state after a list rebuilt a select's options.
    fn reapply_select(&mut self, select: NodeId) {
        let Some(key) = self
            .doc
            .attr(select, "name")
            .or_else(|| self.doc.attr(select, "id"))
            .map(str::to_string)
        else {
            return;
        };
        if !self.store.contains(&key) {
            return;
        }
        match resolve(&key, self.store.values()) {
            Value::Array(values) => {
                let values: Vec<String> = values.iter().map(display).collect();
                self.doc.set_selected_values(select, &values);
            }
            value => {
                self.doc.set_value(select, &display(&value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn each_attribute_forms() {
        assert_eq!(parse_each("items:item"), ("items".into(), "item".into()));
        assert_eq!(parse_each(" Shop#1.items "), ("Shop#1.items".into(), "this".into()));
        assert_eq!(parse_each("items:"), ("items".into(), "this".into()));
    }

    #[test]
    fn identity_keys() {
        assert_eq!(identity_key(&json!({"id": 4, "n": 1}), 0), "id:4");
        assert_eq!(identity_key(&json!({"id": "a"}), 0), "id:\"a\"");
        assert_eq!(identity_key(&json!({"id": null}), 3), "@3");
        assert_eq!(identity_key(&json!("red"), 1), "v:red");
        assert_eq!(identity_key(&json!(7), 1), "v:7");
        assert_eq!(identity_key(&json!([1]), 2), "@2");
    }

    #[test]
    fn repeated_keys_get_suffixes() {
        let mut seen = HashMap::new();
        assert_eq!(unique_key("v:a".into(), &mut seen), "v:a");
        assert_eq!(unique_key("v:a".into(), &mut seen), "v:a#2");
        assert_eq!(unique_key("v:b".into(), &mut seen), "v:b");
    }

    #[test]
    fn item_placeholders_are_escaped() {
        let scope = Scope::new("p", json!({"name": "<b>", "tags": [1, 2]}), 3);
        let out = render_item_html(
            "<li data-i=\"{{index}}\">{{p.name}} {{p.tags.size}} {{total}}</li>",
            &[scope],
        );
        assert_eq!(out, "<li data-i=\"3\">&lt;b&gt; 2 {{total}}</li>");
    }

    #[test]
    fn nested_template_regions_are_left_for_the_inner_pass() {
        let outer = Scope::new("o", json!({"id": 1}), 0);
        let html = "<b>{{index}}</b><template data-each=\"o.lines:l\"><i>{{index}} {{l}}</i></template><u>{{o.id}}</u>";
        assert_eq!(
            render_item_html(html, &[outer]),
            "<b>0</b><template data-each=\"o.lines:l\"><i>{{index}} {{l}}</i></template><u>1</u>"
        );
    }

    #[test]
    fn positional_markup_is_detected_outside_nested_templates() {
        assert!(prints_index("<li data-i=\"{{index}}\">{{p.name}}</li>"));
        assert!(!prints_index("<li>{{p.name}}</li>"));
        assert!(!prints_index("<li><template data-each=\"p.x:y\">{{index}}</template></li>"));
    }

    #[test]
    fn row_markup_parses_in_table_context() {
        assert_eq!(fragment_context("  <tr><td>x", Some("div")).as_deref(), Some("tbody"));
        assert_eq!(fragment_context("<li>x</li>", Some("ul")).as_deref(), Some("ul"));
        assert_eq!(fragment_context("<span/>", None), None);
    }
}
