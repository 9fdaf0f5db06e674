//! Server-style component expansion for route partials.
//!
//! Capitalized tags name registered components. Expansion replaces
//! `<Card title="Hi">body</Card>` with the component template, substituting
//! `{{prop}}` placeholders (HTML-escaped) and `<slot/>` with the expanded body.
//! Placeholders that are not props are left for the binding index.

use crate::error::{Result, RuntimeError};
use crate::path::{display, escape_html};
use indexmap::IndexMap;
use jrx_dom::html::decode_entities;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub const MAX_COMPONENT_DEPTH: usize = 32;

static COMPONENT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([A-Z][A-Za-z0-9_-]*)(\s[^>]*?)?\s*(/)?>").expect("component tag pattern is valid")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s=/]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute pattern is valid")
});

static SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<slot\s*/>|<slot\s*>\s*</slot>|\{\{\s*([\w#.-]+)\s*\}\}")
        .expect("segment pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Placeholder { expr: String, raw: String },
    Slot,
}

fn parse_segments(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in SEGMENT.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text(template[last..whole.start()].to_string()));
        }
        segments.push(match caps.get(1) {
            Some(expr) => Segment::Placeholder {
                expr: expr.as_str().to_string(),
                raw: whole.as_str().to_string(),
            },
            None => Segment::Slot,
        });
        last = whole.end();
    }
    if last < template.len() {
        segments.push(Segment::Text(template[last..].to_string()));
    }
    segments
}

/// A registered component: its template and prop defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDef {
    template: String,
    defaults: IndexMap<String, Value>,
    segments: Vec<Segment>,
}

impl ComponentDef {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let segments = parse_segments(&template);
        Self {
            template,
            defaults: IndexMap::new(),
            segments,
        }
    }

    pub fn with_prop(mut self, name: impl Into<String>, default: Value) -> Self {
        self.defaults.insert(name.into(), default);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn render(&self, props: &IndexMap<String, Value>, slot: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + slot.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot => out.push_str(slot),
                Segment::Placeholder { expr, raw } => match props.get(expr) {
                    Some(value) => out.push_str(&escape_html(&display(value))),
                    None => out.push_str(raw),
                },
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    defs: HashMap<String, ComponentDef>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, def: ComponentDef) {
        let name = name.into();
        log::debug!("Registered component {name}");
        self.defs.insert(name, def);
    }

    pub fn get(&self, name: &str) -> Option<&ComponentDef> {
        self.defs.get(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Expand every registered component tag in `html`.
    pub fn expand(&self, html: &str) -> Result<String> {
        if self.defs.is_empty() {
            return Ok(html.to_string());
        }
        self.expand_within(html, &mut Vec::new())
    }

    fn expand_within(&self, html: &str, stack: &mut Vec<String>) -> Result<String> {
        if stack.len() > MAX_COMPONENT_DEPTH {
            return Err(RuntimeError::ComponentDepth(MAX_COMPONENT_DEPTH));
        }
        let mut out = String::with_capacity(html.len());
        let mut rest = html;

        while let Some(caps) = COMPONENT_TAG.captures(rest) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            let name = name.as_str();
            out.push_str(&rest[..whole.start()]);

            let Some(def) = self.defs.get(name) else {
                out.push_str(whole.as_str());
                rest = &rest[whole.end()..];
                continue;
            };
            if stack.iter().any(|n| n == name) {
                let mut cycle = stack.clone();
                cycle.push(name.to_string());
                return Err(RuntimeError::ComponentCycle(cycle));
            }

            let props = merge_props(
                &def.defaults,
                caps.get(2).map(|m| m.as_str()).unwrap_or(""),
            );
            let after_open = &rest[whole.end()..];
            let (slot, consumed) = if caps.get(3).is_some() {
                ("", 0)
            } else {
                match find_close(after_open, name) {
                    Some((body_end, close_end)) => (&after_open[..body_end], close_end),
                    None => (after_open, after_open.len()),
                }
            };

            let slot_html = self.expand_within(slot, stack)?;
            stack.push(name.to_string());
            let body = def.render(&props, &slot_html);
            let expanded = self.expand_within(&body, stack)?;
            stack.pop();

            out.push_str(&expanded);
            rest = &after_open[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Case-preserving attribute parse overlaid on the defaults. Bare attributes
/// become `true`.
fn merge_props(defaults: &IndexMap<String, Value>, attrs: &str) -> IndexMap<String, Value> {
    let mut props = defaults.clone();
    for caps in ATTRIBUTE.captures_iter(attrs) {
        let Some(name) = caps.get(1) else {
            continue;
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| Value::String(decode_entities(m.as_str())))
            .unwrap_or(Value::Bool(true));
        props.insert(name.as_str().to_string(), value);
    }
    props
}

/// Find `</name>` matching an already consumed `<name ...>`, honoring nested
/// tags of the same name. Returns (body end, end of closing tag).
fn find_close(html: &str, name: &str) -> Option<(usize, usize)> {
    let open = format!("<{name}");
    let mut depth = 1usize;
    let mut at = 0;
    loop {
        let (next_close, close_end) = next_close_tag(html, at, name)?;
        let next_open = html[at..].find(&open).map(|i| i + at).filter(|&i| {
            let boundary = html[i + open.len()..].chars().next();
            i < next_close && matches!(boundary, Some(c) if c.is_whitespace() || c == '>' || c == '/')
        });
        match next_open {
            Some(open_at) => {
                let self_closing = html[open_at..]
                    .find('>')
                    .is_some_and(|end| html[..open_at + end].ends_with('/'));
                if !self_closing {
                    depth += 1;
                }
                at = open_at + open.len();
            }
            None => {
                depth -= 1;
                if depth == 0 {
                    return Some((next_close, close_end));
                }
                at = close_end;
            }
        }
    }
}

/// Next `</name>` at or after `from`; whitespace may precede the `>`.
fn next_close_tag(html: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let prefix = format!("</{name}");
    let mut at = from;
    loop {
        let start = html[at..].find(&prefix)? + at;
        let after = start + prefix.len();
        let rest = &html[after..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('>') {
            return Some((start, after + (rest.len() - trimmed.len()) + 1));
        }
        at = after;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(
            "Card",
            ComponentDef::new(r#"<div class="card"><h2>{{title}}</h2><slot/><p>{{count}}</p></div>"#)
                .with_prop("title", json!("Untitled")),
        );
        registry.register("Badge", ComponentDef::new(r#"<span data-kind="{{kind}}">!</span>"#));
        registry
    }

    #[test]
    fn props_slots_and_defaults() {
        let html = registry()
            .expand(r#"<main><Card title="A &amp; B"><Badge kind="new"/></Card><Card/></main>"#)
            .unwrap();
        assert_eq!(
            html,
            concat!(
                r#"<main><div class="card"><h2>A &amp; B</h2><span data-kind="new">!</span><p>{{count}}</p></div>"#,
                r#"<div class="card"><h2>Untitled</h2><p>{{count}}</p></div></main>"#
            )
        );
    }

    #[test]
    fn nested_same_name_tags_close_correctly() {
        let mut registry = ComponentRegistry::new();
        registry.register("Box", ComponentDef::new("[<slot/>]"));
        assert_eq!(registry.expand("<Box>a<Box>b</Box>c</Box>").unwrap(), "[a[b]c]");
    }

    #[test]
    fn closing_tags_may_hold_whitespace() {
        let mut registry = ComponentRegistry::new();
        registry.register("Box", ComponentDef::new("[<slot/>]"));
        assert_eq!(
            registry.expand("<Box>a<Box>b</Box\n>c</Box >d").unwrap(),
            "[a[b]c]d"
        );
        assert_eq!(registry.expand("<Box>x</Boxed></Box>").unwrap(), "[x</Boxed>]");
    }

    #[test]
    fn unknown_components_pass_through() {
        assert_eq!(registry().expand("<Other x=1>y</Other>").unwrap(), "<Other x=1>y</Other>");
    }

    #[test]
    fn cycles_are_errors() {
        let mut registry = ComponentRegistry::new();
        registry.register("A", ComponentDef::new("<B/>"));
        registry.register("B", ComponentDef::new("<A/>"));
        match registry.expand("<A/>") {
            Err(RuntimeError::ComponentCycle(path)) => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
