//! `data-if` / `data-else` conditions and the mount/unmount pass.
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := primary ( "&&" primary )*
//! primary := path | "(" or ")" | "!" primary
//! ```
//!
//! The tokenizer is tolerant: characters outside the grammar are skipped and a
//! missing operand evaluates to false. So does a condition nested deeper than
//! `MAX_NESTING` levels.

use crate::path::{resolve, truthy, StateMap};
use crate::runtime::Runtime;
use jrx_dom::NodeId;

const MAX_MOUNT_PASSES: usize = 16;

/// Deepest condition tree the parser builds.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Path(String),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Literal(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Ident(String),
}

fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '#' | '.' | '-'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => i += 1,
        }
    }
    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    too_deep: bool,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Enter one tree level; false once the cap is hit.
    fn descend(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            self.too_deep = true;
        }
        !self.too_deep
    }

    fn or(&mut self) -> Condition {
        let mut left = self.and();
        let mut chained = 0;
        while self.peek() == Some(&Token::Or) && self.descend() {
            chained += 1;
            self.pos += 1;
            let right = self.and();
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        left
    }

    fn and(&mut self) -> Condition {
        let mut left = self.primary();
        let mut chained = 0;
        while self.peek() == Some(&Token::And) && self.descend() {
            chained += 1;
            self.pos += 1;
            let right = self.primary();
            left = Condition::And(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        left
    }

    fn primary(&mut self) -> Condition {
        if self.too_deep {
            return Condition::Literal(false);
        }
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.pos += 1;
                if !self.descend() {
                    return Condition::Literal(false);
                }
                let inner = self.primary();
                self.depth -= 1;
                Condition::Not(Box::new(inner))
            }
            Some(Token::Open) => {
                self.pos += 1;
                if !self.descend() {
                    return Condition::Literal(false);
                }
                let inner = self.or();
                self.depth -= 1;
                if self.peek() == Some(&Token::Close) {
                    self.pos += 1;
                }
                inner
            }
            Some(Token::Ident(path)) => {
                self.pos += 1;
                Condition::Path(path)
            }
            _ => Condition::Literal(false),
        }
    }
}

pub fn parse_condition(src: &str) -> Condition {
    let mut parser = Parser {
        tokens: tokenize(src),
        pos: 0,
        depth: 0,
        too_deep: false,
    };
    let condition = parser.or();
    if parser.too_deep {
        log::warn!("Condition nested deeper than {MAX_NESTING} levels, treating it as false");
        return Condition::Literal(false);
    }
    condition
}

impl Condition {
    pub fn eval(&self, is_truthy: &mut dyn FnMut(&str) -> bool) -> bool {
        match self {
            Self::Path(path) => is_truthy(path),
            Self::Not(inner) => !inner.eval(is_truthy),
            Self::And(a, b) => a.eval(is_truthy) && b.eval(is_truthy),
            Self::Or(a, b) => a.eval(is_truthy) || b.eval(is_truthy),
            Self::Literal(value) => *value,
        }
    }
}

/// Evaluate `src` against global state.
pub fn evaluate(src: &str, state: &StateMap) -> bool {
    parse_condition(src).eval(&mut |path| truthy(&resolve(path, state)))
}

/// Condition a conditional template carries and whether it is negated.
pub(crate) fn template_condition(
    doc: &jrx_dom::Document,
    template: NodeId,
) -> Option<(String, bool)> {
    if let Some(cond) = doc.attr(template, "data-if") {
        return Some((cond.to_string(), false));
    }
    doc.attr(template, "data-else")
        .map(|cond| (cond.to_string(), true))
}

impl Runtime {
    /// Mount or unmount every conditional template under the app root.
    /// Repeats while freshly mounted content brings in new templates.
    /// Returns true if anything was mounted or unmounted.
    pub fn update_if_blocks(&mut self) -> bool {
        let mut changed = false;
        for _ in 0..MAX_MOUNT_PASSES {
            self.release_detached_blocks();
            let templates = self.doc.select(self.root, |el| {
                el.is_template() && (el.has_attr("data-if") || el.has_attr("data-else"))
            });
            let mut mounted_any = false;
            for template in templates {
                if !self.doc.is_connected(template) {
                    continue;
                }
                let Some((cond, negate)) = template_condition(&self.doc, template) else {
                    continue;
                };
                let show = evaluate(&cond, self.store.values()) != negate;
                let mounted = self.if_blocks.contains_key(&template);
                if show && !mounted {
                    self.mount_if(template);
                    mounted_any = true;
                    changed = true;
                } else if !show && mounted {
                    self.unmount_if(template);
                    changed = true;
                }
            }
            if !mounted_any {
                break;
            }
        }
        changed
    }

    fn mount_if(&mut self, template: NodeId) {
        let Some(content) = self.doc.template_content(template) else {
            return;
        };
        let fragment = self.doc.clone_deep(content);
        let nodes = self.doc.children(fragment).to_vec();
        if let Err(e) = self.doc.insert_after(template, fragment) {
            log::warn!("Cannot mount conditional block: {e}");
            return;
        }
        log::debug!("Mounted conditional block ({} nodes)", nodes.len());
        self.if_blocks.insert(template, nodes.clone());
        self.after_insert(&nodes);
    }

    fn unmount_if(&mut self, template: NodeId) {
        if let Some(nodes) = self.if_blocks.remove(&template) {
            log::debug!("Unmounted conditional block ({} nodes)", nodes.len());
            self.discard_nodes(&nodes);
        }
        self.release_detached_blocks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn state(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn precedence_and_over_or() {
        let cond = parse_condition("a || b && c");
        assert_eq!(
            cond,
            Condition::Or(
                Box::new(Condition::Path("a".into())),
                Box::new(Condition::And(
                    Box::new(Condition::Path("b".into())),
                    Box::new(Condition::Path("c".into()))
                ))
            )
        );
    }

    #[test]
    fn negation_and_grouping() {
        let s = state(&[("a", json!(true)), ("b", json!(0)), ("c", json!("x"))]);
        assert!(evaluate("a && !b", &s));
        assert!(!evaluate("!(a || b)", &s));
        assert!(evaluate("(b || c) && a", &s));
    }

    #[test]
    fn namespaced_paths_and_size() {
        let s = state(&[("Cart#2.items", json!([]))]);
        assert!(!evaluate("Cart#2.items.size", &s));
        assert!(evaluate("!Cart#2.items.length", &s));
    }

    #[test]
    fn tolerant_of_junk() {
        let s = state(&[("a", json!(true))]);
        assert!(!evaluate("a &&", &s));
        assert!(evaluate("  a  ;", &s));
        assert!(!evaluate("", &s));
        assert!(evaluate("(a", &s));
    }

    #[test]
    fn runaway_nesting_evaluates_false() {
        let s = state(&[("a", json!(true))]);
        for src in [
            "!".repeat(10_000) + "a",
            "(".repeat(10_000) + "a",
            vec!["a"; 10_000].join(" && "),
            vec!["a"; 10_000].join(" || "),
        ] {
            assert_eq!(parse_condition(&src), Condition::Literal(false));
            assert!(!evaluate(&src, &s));
        }
        assert!(evaluate(&format!("{}a{}", "(".repeat(20), ")".repeat(20)), &s));
        assert!(evaluate(&("!!".repeat(20) + "a"), &s));
    }
}
