//! Binding index: which DOM locations depend on which state keys.

use crate::path::{final_segment, root_segment};
use jrx_dom::{Document, NodeId, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// `{{ expr }}` where expr is word characters, `#`, `.` or `-`.
pub static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([\w#.-]+)\s*\}\}").expect("placeholder pattern is valid"));

pub fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Expressions referenced by `text`, in order of appearance.
pub fn placeholders(text: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Replace every placeholder of `template` with `lookup(expr)`.
pub fn render_template(template: &str, mut lookup: impl FnMut(&str) -> String) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| lookup(&caps[1]))
        .into_owned()
}

/// Every key an expression is indexed under: the full expression, its root
/// segment, its final segment and each dotted prefix.
pub fn key_variants(expr: &str) -> Vec<String> {
    let mut keys = vec![expr.to_string()];
    let mut push = |key: &str| {
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    };
    push(root_segment(expr));
    push(final_segment(expr));
    let mut end = 0;
    while let Some(offset) = expr[end..].find('.') {
        end += offset;
        push(&expr[..end]);
        end += 1;
    }
    keys
}

/// How a bound form control serializes and receives values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Text,
    Number,
    Checkbox,
    Radio,
    Select,
    MultiSelect,
    TextArea,
}

impl ControlKind {
    pub fn of(doc: &Document, node: NodeId) -> Option<Self> {
        let tag = doc.tag(node)?;
        match tag {
            "textarea" => Some(Self::TextArea),
            "select" if doc.is_multiple(node) => Some(Self::MultiSelect),
            "select" => Some(Self::Select),
            "input" => Some(match doc.input_type(node).as_deref() {
                Some("checkbox") => Self::Checkbox,
                Some("radio") => Self::Radio,
                Some("number" | "range") => Self::Number,
                _ => Self::Text,
            }),
            _ => None,
        }
    }

    /// Discrete controls have no cursor, so they always accept server writes.
    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            Self::Checkbox | Self::Radio | Self::Select | Self::MultiSelect
        )
    }

    pub fn is_checkable(self) -> bool {
        matches!(self, Self::Checkbox | Self::Radio)
    }
}

/// One DOM location that depends on state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Text node re-rendered from its original template
    Text { node: NodeId, template: String },
    /// Attribute value re-rendered from its original template
    Attribute {
        node: NodeId,
        name: String,
        template: String,
    },
    /// Form control keyed by its `name`/`id`
    Control {
        node: NodeId,
        key: String,
        kind: ControlKind,
    },
}

impl Binding {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Text { node, .. } | Self::Attribute { node, .. } | Self::Control { node, .. } => {
                *node
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct BindingIndex {
    index: HashMap<String, Vec<Binding>>,
    /// Original, unrendered text of bound text nodes.
    text_templates: HashMap<NodeId, String>,
    /// Original, unrendered attribute values.
    attr_templates: HashMap<NodeId, Vec<(String, String)>>,
    /// Controls with an outbound listener attached, and the key they send.
    listeners: HashMap<NodeId, String>,
}

impl BindingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index for everything under `root`. Returns controls that got
    /// an outbound listener for the first time.
    pub fn reindex(&mut self, doc: &Document, root: NodeId) -> Vec<NodeId> {
        self.index.clear();
        let mut attached = Vec::new();

        for node in doc.descendants_inclusive(root) {
            match doc.kind(node) {
                NodeKind::Text(text) => {
                    if inside_raw_text(doc, node) {
                        continue;
                    }
                    let template = match self.text_templates.get(&node) {
                        Some(template) => template.clone(),
                        None if has_placeholder(text) => {
                            self.text_templates.insert(node, text.clone());
                            text.clone()
                        }
                        None => continue,
                    };
                    for key in template_keys(&template) {
                        self.push(
                            key,
                            Binding::Text {
                                node,
                                template: template.clone(),
                            },
                        );
                    }
                }
                NodeKind::Element(_) => {
                    self.index_attributes(doc, node);
                    if let Some(key) = self.index_control(doc, node) {
                        if !self.listeners.contains_key(&node) {
                            self.listeners.insert(node, key);
                            attached.push(node);
                        }
                    }
                }
                _ => {}
            }
        }
        log::debug!("Binding index rebuilt with {} keys", self.index.len());
        attached
    }

    fn index_attributes(&mut self, doc: &Document, node: NodeId) {
        for (name, value) in doc.attrs(node) {
            if name.starts_with('@') || name == "data-optimistic" {
                continue;
            }
            let stored = self.attr_templates.entry(node).or_default();
            let template = match stored.iter().find(|(n, _)| n == name) {
                Some((_, template)) => template.clone(),
                None if has_placeholder(value) => {
                    stored.push((name.clone(), value.clone()));
                    value.clone()
                }
                None => continue,
            };
            for key in template_keys(&template) {
                self.push(
                    key,
                    Binding::Attribute {
                        node,
                        name: name.clone(),
                        template: template.clone(),
                    },
                );
            }
        }
    }

    fn index_control(&mut self, doc: &Document, node: NodeId) -> Option<String> {
        let kind = ControlKind::of(doc, node)?;
        let key = doc
            .attr(node, "name")
            .filter(|n| !n.is_empty())
            .or_else(|| doc.attr(node, "id").filter(|n| !n.is_empty()))?
            .to_string();
        self.push(
            key.clone(),
            Binding::Control {
                node,
                key: key.clone(),
                kind,
            },
        );
        Some(key)
    }

    fn push(&mut self, key: String, binding: Binding) {
        let list = self.index.entry(key).or_default();
        if !list.contains(&binding) {
            list.push(binding);
        }
    }

    pub fn lookup(&self, key: &str) -> &[Binding] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.get(key).is_some_and(|list| !list.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Key a control's outbound listener sends under.
    pub fn listener_key(&self, node: NodeId) -> Option<&str> {
        self.listeners.get(&node).map(String::as_str)
    }

    pub fn text_template(&self, node: NodeId) -> Option<&str> {
        self.text_templates.get(&node).map(String::as_str)
    }

    /// All distinct bindings whose node lies under one of `roots`.
    pub fn bindings_under(&self, doc: &Document, roots: &[NodeId]) -> Vec<Binding> {
        let mut out: Vec<Binding> = Vec::new();
        for list in self.index.values() {
            for binding in list {
                let node = binding.node();
                if roots.iter().any(|root| doc.contains(*root, node)) && !out.contains(binding) {
                    out.push(binding.clone());
                }
            }
        }
        out
    }

    /// Nodes with a stored template or an outbound listener.
    pub fn tracked_nodes(&self) -> usize {
        self.text_templates.len() + self.attr_templates.len() + self.listeners.len()
    }

    /// Drop every entry whose node `keep` rejects.
    pub fn retain_nodes(&mut self, keep: impl Fn(NodeId) -> bool) {
        self.text_templates.retain(|node, _| keep(*node));
        self.attr_templates.retain(|node, _| keep(*node));
        self.listeners.retain(|node, _| keep(*node));
        for list in self.index.values_mut() {
            list.retain(|binding| keep(binding.node()));
        }
        self.index.retain(|_, list| !list.is_empty());
    }

    /// Forget everything, listeners and stored templates included.
    pub fn clear(&mut self) {
        self.index.clear();
        self.text_templates.clear();
        self.attr_templates.clear();
        self.listeners.clear();
    }
}

fn template_keys(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for expr in placeholders(template) {
        for key in key_variants(expr) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn inside_raw_text(doc: &Document, node: NodeId) -> bool {
    doc.parent(node)
        .and_then(|parent| doc.tag(parent))
        .is_some_and(|tag| matches!(tag, "script" | "style"))
}

/// Serialize a control's current value the way it is sent to the server.
pub fn control_value(doc: &Document, node: NodeId) -> Value {
    match ControlKind::of(doc, node) {
        Some(ControlKind::Checkbox | ControlKind::Radio) => Value::Bool(doc.checked(node)),
        Some(ControlKind::Number) => {
            let raw = doc.value(node);
            let raw = raw.trim();
            if raw.is_empty() {
                return Value::Null;
            }
            match raw.parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(_) => raw
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            }
        }
        Some(ControlKind::MultiSelect) => Value::Array(
            doc.selected_values(node)
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
        Some(_) => Value::String(doc.value(node)),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrx_dom::parse_document;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn key_variants_cover_prefixes() {
        assert_eq!(
            key_variants("Leaf#1.user.name"),
            vec!["Leaf#1.user.name", "Leaf#1", "name", "Leaf#1.user"]
        );
        assert_eq!(key_variants("count"), vec!["count"]);
    }

    #[test]
    fn text_nodes_are_indexed_under_every_variant() {
        let doc = parse_document("<p>Hi {{ user.name }}!</p>");
        let mut index = BindingIndex::new();
        index.reindex(&doc, doc.root());
        for key in ["user.name", "user", "name"] {
            assert_eq!(index.lookup(key).len(), 1, "missing {key}");
        }
        let node = index.lookup("name")[0].node();
        assert_eq!(index.text_template(node), Some("Hi {{ user.name }}!"));
    }

    #[test]
    fn controls_get_one_listener() {
        let doc = parse_document(r#"<input name="q"><select id="s"><option>a</option></select><input>"#);
        let mut index = BindingIndex::new();
        let first = index.reindex(&doc, doc.root());
        let second = index.reindex(&doc, doc.root());
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert!(matches!(
            index.lookup("s")[0],
            Binding::Control {
                kind: ControlKind::Select,
                ..
            }
        ));
    }

    #[test]
    fn attribute_templates_are_indexed() {
        let doc = parse_document(r#"<div style="color: {{heartColor}}" @click="like()"></div>"#);
        let mut index = BindingIndex::new();
        index.reindex(&doc, doc.root());
        assert!(matches!(
            &index.lookup("heartColor")[0],
            Binding::Attribute { name, .. } if name == "style"
        ));
    }

    #[test]
    fn control_values_are_typed() {
        let mut doc = parse_document(
            r#"<input type="checkbox" id="c" checked><input type="number" id="n" value="4.5"><input type="number" id="e" value=""><select id="m" multiple><option selected>a</option><option selected>b</option></select><input id="t" value="x">"#,
        );
        let id = |doc: &Document, s: &str| doc.get_element_by_id(s).unwrap();
        assert_eq!(control_value(&doc, id(&doc, "c")), json!(true));
        assert_eq!(control_value(&doc, id(&doc, "n")), json!(4.5));
        assert_eq!(control_value(&doc, id(&doc, "e")), json!(null));
        assert_eq!(control_value(&doc, id(&doc, "m")), json!(["a", "b"]));
        assert_eq!(control_value(&doc, id(&doc, "t")), json!("x"));
        let n = id(&doc, "n");
        doc.set_value(n, "7");
        assert_eq!(control_value(&doc, n), json!(7));
    }

    #[test]
    fn render_template_replaces_each_placeholder() {
        let out = render_template("{{a}} + {{ b.c }} = ?", |expr| format!("<{expr}>"));
        assert_eq!(out, "<a> + <b.c> = ?");
    }
}
