//! `@click` / `@change` / `@input` / `@submit` directive hydration.
//!
//! A directive value names a server method and raw argument expressions:
//!
//! ```text
//! @click="Cart#2.remove(item.id, 'all')"  →  data-call-click="Cart#2.remove"
//!                                             data-param-click='["item.id","'all'"]'
//! ```
//!
//! Arguments stay unparsed until dispatch; see `args`.

use jrx_dom::{Document, NodeId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:([\w#-]+)\.)?([\w$]+)\s*(?:\((.*)\))?\s*$")
        .expect("directive pattern is valid")
});

/// Marker written once an element's directives were processed.
pub const HYDRATED_MARKER: &str = "data-jrx-hydrated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Click,
    Change,
    Input,
    Submit,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::Click, Self::Change, Self::Input, Self::Submit];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Change => "change",
            Self::Input => "input",
            Self::Submit => "submit",
        }
    }

    pub fn directive_attr(self) -> &'static str {
        match self {
            Self::Click => "@click",
            Self::Change => "@change",
            Self::Input => "@input",
            Self::Submit => "@submit",
        }
    }

    pub fn call_attr(self) -> &'static str {
        match self {
            Self::Click => "data-call-click",
            Self::Change => "data-call-change",
            Self::Input => "data-call-input",
            Self::Submit => "data-call-submit",
        }
    }

    pub fn param_attr(self) -> &'static str {
        match self {
            Self::Click => "data-param-click",
            Self::Change => "data-param-change",
            Self::Input => "data-param-input",
            Self::Submit => "data-param-submit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "click" => Ok(Self::Click),
            "change" => Ok(Self::Change),
            "input" => Ok(Self::Input),
            "submit" => Ok(Self::Submit),
            other => Err(format!("unknown event {other:?}")),
        }
    }
}

/// A parsed directive: qualified method name and raw argument expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDirective {
    pub qualified: String,
    pub args: Vec<String>,
}

/// Parse `component.method(args)`, `method(args)`, `component.method` or `method`.
pub fn parse_directive(value: &str) -> Option<CallDirective> {
    let caps = DIRECTIVE.captures(value)?;
    let method = caps.get(2)?.as_str();
    let qualified = match caps.get(1) {
        Some(component) => format!("{}.{method}", component.as_str()),
        None => method.to_string(),
    };
    let args = caps
        .get(3)
        .map(|raw| split_args(raw.as_str()))
        .unwrap_or_default();
    Some(CallDirective { qualified, args })
}

/// Split a raw argument list on top-level commas, respecting quotes and
/// bracket nesting. Empty arguments are dropped.
pub fn split_args(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in raw.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth <= 0 => {
                push_arg(&mut args, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_arg(&mut args, &current);
    args
}

fn push_arg(args: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        args.push(trimmed.to_string());
    }
}

/// Rewrite every `@event` attribute under `root` into call metadata.
/// Returns the number of directives hydrated.
pub fn hydrate_event_directives(doc: &mut Document, root: NodeId) -> usize {
    let candidates = doc.select(root, |el| {
        EventKind::ALL
            .iter()
            .any(|kind| el.has_attr(kind.directive_attr()))
    });
    let mut hydrated = 0;
    for element in candidates {
        for kind in EventKind::ALL {
            let Some(value) = doc.remove_attr(element, kind.directive_attr()) else {
                continue;
            };
            if value.trim().is_empty() || value.contains("{{") {
                log::warn!("Dropping unresolved {} directive {value:?}", kind.directive_attr());
                continue;
            }
            let Some(directive) = parse_directive(&value) else {
                log::warn!("Stripping malformed {} directive {value:?}", kind.directive_attr());
                continue;
            };
            let params = match serde_json::to_string(&directive.args) {
                Ok(params) => params,
                Err(e) => {
                    log::warn!("Cannot store directive arguments: {e}");
                    continue;
                }
            };
            let written = doc
                .set_attr(element, kind.call_attr(), &directive.qualified)
                .and_then(|()| doc.set_attr(element, kind.param_attr(), &params))
                .and_then(|()| mark_hydrated(doc, element, kind));
            match written {
                Ok(()) => hydrated += 1,
                Err(e) => log::warn!("Cannot hydrate directive: {e}"),
            }
        }
    }
    if hydrated > 0 {
        log::debug!("Hydrated {hydrated} event directives");
    }
    hydrated
}

fn mark_hydrated(doc: &mut Document, element: NodeId, kind: EventKind) -> jrx_dom::Result<()> {
    let current = doc.attr(element, HYDRATED_MARKER).unwrap_or_default();
    if current.split(' ').any(|k| k == kind.as_str()) {
        return Ok(());
    }
    let next = if current.is_empty() {
        kind.as_str().to_string()
    } else {
        format!("{current} {kind}")
    };
    doc.set_attr(element, HYDRATED_MARKER, &next)
}

/// The hydrated call `element` carries for `kind`, if any.
pub fn directive_for(doc: &Document, element: NodeId, kind: EventKind) -> Option<CallDirective> {
    let qualified = doc.attr(element, kind.call_attr())?;
    if qualified.is_empty() {
        return None;
    }
    let args = doc
        .attr(element, kind.param_attr())
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default();
    Some(CallDirective {
        qualified: qualified.to_string(),
        args,
    })
}

/// Events `element` has a hydrated call for.
pub fn hydrated_events(doc: &Document, element: NodeId) -> Vec<EventKind> {
    EventKind::ALL
        .into_iter()
        .filter(|kind| doc.has_attr(element, kind.call_attr()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrx_dom::parse_document;
    use pretty_assertions::assert_eq;

    #[test]
    fn all_four_grammars() {
        let d = parse_directive("Cart#2.remove(item.id, 'a,b')").unwrap();
        assert_eq!(d.qualified, "Cart#2.remove");
        assert_eq!(d.args, vec!["item.id", "'a,b'"]);
        assert_eq!(parse_directive("save(form)").unwrap().qualified, "save");
        assert_eq!(parse_directive("Leaf#1.like").unwrap().args, Vec::<String>::new());
        assert_eq!(parse_directive(" refresh ").unwrap().qualified, "refresh");
        assert!(parse_directive("a.b.c()").is_none());
    }

    #[test]
    fn split_respects_nesting_and_quotes() {
        assert_eq!(
            split_args(r#"{a: 1, b: [2, 3]}, "x,y", ,  z "#),
            vec!["{a: 1, b: [2, 3]}", r#""x,y""#, "z"]
        );
        assert_eq!(split_args(r#"'it\'s, fine', 2"#), vec![r#"'it\'s, fine'"#, "2"]);
    }

    #[test]
    fn hydration_rewrites_attributes_once() {
        let mut doc = parse_document(
            r#"<button id="b" @click="Leaf#1.add(1, 'x')">+</button><a id="u" @click="go({{id}})">x</a><i id="e" @change="">y</i>"#,
        );
        let root = doc.root();
        assert_eq!(hydrate_event_directives(&mut doc, root), 1);
        assert_eq!(hydrate_event_directives(&mut doc, root), 0);

        let b = doc.get_element_by_id("b").unwrap();
        assert!(!doc.has_attr(b, "@click"));
        assert_eq!(doc.attr(b, HYDRATED_MARKER), Some("click"));
        let call = directive_for(&doc, b, EventKind::Click).unwrap();
        assert_eq!(call.qualified, "Leaf#1.add");
        assert_eq!(call.args, vec!["1", "'x'"]);

        let u = doc.get_element_by_id("u").unwrap();
        assert!(!doc.has_attr(u, "@click"));
        assert!(directive_for(&doc, u, EventKind::Click).is_none());
        let e = doc.get_element_by_id("e").unwrap();
        assert!(hydrated_events(&doc, e).is_empty());
    }
}
