//! Optimistic-update scripts.
//!
//! `data-optimistic` bodies are parsed by a closed statement language instead
//! of being evaluated as code:
//!
//! ```text
//! state.hasLiked = !state.hasLiked; state.likes += state.hasLiked ? 1 : -1
//! state["Cart#2.count"]++
//! ```
//!
//! Statements assign to `state.<path>` (`=`, `+=`, `-=`, `*=`, `/=`, `++`,
//! `--`) and are separated by `;` or newlines. Expressions cover literals,
//! state reads, `! - +` prefixes, arithmetic, comparisons, equality,
//! `&& ||`, the ternary operator and parentheses.

use crate::error::{Result, RuntimeError};
use crate::path::{display, truthy};
use serde_json::Value;

/// Deepest expression a script may nest.
const MAX_NESTING: usize = 64;

/// Read/write access to state used while a script runs.
pub trait ScriptState {
    fn read(&self, path: &str) -> Value;
    fn write(&mut self, path: &str, value: Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    statements: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    target: String,
    op: AssignOp,
    value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Read(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Plus(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Script {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let statements = parser.program()?;
        Ok(Self { statements })
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// State paths this script assigns, in order of first assignment.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for statement in &self.statements {
            if !out.contains(&statement.target.as_str()) {
                out.push(&statement.target);
            }
        }
        out
    }

    pub fn run(&self, state: &mut dyn ScriptState) {
        for statement in &self.statements {
            let value = eval(&statement.value, state);
            let next = match statement.op {
                AssignOp::Set => value,
                AssignOp::Add => binary(BinOp::Add, state.read(&statement.target), value),
                AssignOp::Sub => binary(BinOp::Sub, state.read(&statement.target), value),
                AssignOp::Mul => binary(BinOp::Mul, state.read(&statement.target), value),
                AssignOp::Div => binary(BinOp::Div, state.read(&statement.target), value),
            };
            state.write(&statement.target, next);
        }
    }
}

// ----------------------------------------------------------------------
// Lexer
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Sep,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    tok: Tok,
    pos: usize,
}

const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "=",
    "<", ">", "+", "-", "*", "/", "%", "!", "?", ":", "(", ")", "[", "]", ".",
];

fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut i = 0;
    let mut depth = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c == '\n' || c == ';' {
            if depth == 0 && tokens.last().map(|t: &Token| &t.tok) != Some(&Tok::Sep) {
                tokens.push(Token { tok: Tok::Sep, pos });
            }
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| RuntimeError::script(pos, format!("bad number {text:?}")))?;
            tokens.push(Token {
                tok: Tok::Num(number),
                pos,
            });
            continue;
        }
        if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == '\\' && i + 1 < chars.len() {
                    text.push(match chars[i + 1].1 {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                i += 1;
                if ch == c {
                    closed = true;
                    break;
                }
                text.push(ch);
            }
            if !closed {
                return Err(RuntimeError::script(pos, "unterminated string"));
            }
            tokens.push(Token {
                tok: Tok::Str(text),
                pos,
            });
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            tokens.push(Token {
                tok: Tok::Ident(text),
                pos,
            });
            continue;
        }
        let rest = &source[pos..];
        let Some(punct) = PUNCTS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(RuntimeError::script(pos, format!("unexpected character {c:?}")));
        };
        match *punct {
            "(" | "[" => depth += 1,
            ")" | "]" => depth = depth.saturating_sub(1),
            _ => {}
        }
        tokens.push(Token {
            tok: Tok::Punct(punct),
            pos,
        });
        i += punct.chars().count();
    }
    Ok(tokens)
}

// ----------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::script(self.offset(), message)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek() == Some(&Tok::Punct(punct_str(punct))) && !punct.is_empty() {
            self.pos += 1;
            return true;
        }
        false
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {punct:?}")))
        }
    }

    fn program(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.peek() == Some(&Tok::Sep) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(statements);
            }
            statements.push(self.statement()?);
            match self.peek() {
                None | Some(Tok::Sep) => {}
                Some(_) => return Err(self.error("expected end of statement")),
            }
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        if self.eat("++") || self.eat("--") {
            let op = match self.tokens[self.pos - 1].tok {
                Tok::Punct("++") => AssignOp::Add,
                _ => AssignOp::Sub,
            };
            let target = self.target()?;
            return Ok(Statement {
                target,
                op,
                value: Expr::Literal(Value::from(1)),
            });
        }
        let target = self.target()?;
        let (op, value) = match self.peek() {
            Some(Tok::Punct("++")) => (AssignOp::Add, None),
            Some(Tok::Punct("--")) => (AssignOp::Sub, None),
            Some(Tok::Punct("=")) => (AssignOp::Set, Some(())),
            Some(Tok::Punct("+=")) => (AssignOp::Add, Some(())),
            Some(Tok::Punct("-=")) => (AssignOp::Sub, Some(())),
            Some(Tok::Punct("*=")) => (AssignOp::Mul, Some(())),
            Some(Tok::Punct("/=")) => (AssignOp::Div, Some(())),
            _ => return Err(self.error("expected assignment")),
        };
        self.pos += 1;
        let value = match value {
            Some(()) => self.expr()?,
            None => Expr::Literal(Value::from(1)),
        };
        Ok(Statement { target, op, value })
    }

    /// `state.a.b` or `state["Comp#1.key"].sub`
    fn target(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Ident(name)) if name == "state" => self.pos += 1,
            _ => return Err(self.error("expected state.<key>")),
        }
        let mut segments: Vec<String> = Vec::new();
        loop {
            if self.eat(".") {
                match self.peek().cloned() {
                    Some(Tok::Ident(name)) => {
                        self.pos += 1;
                        segments.push(name);
                    }
                    _ => return Err(self.error("expected property name")),
                }
            } else if self.eat("[") {
                match self.peek().cloned() {
                    Some(Tok::Str(key)) => {
                        self.pos += 1;
                        segments.push(key);
                    }
                    Some(Tok::Num(n)) => {
                        self.pos += 1;
                        segments.push(display(&number(n)));
                    }
                    _ => return Err(self.error("expected quoted key")),
                }
                self.expect("]")?;
            } else {
                break;
            }
        }
        if segments.is_empty() {
            return Err(self.error("bare `state` is not assignable"));
        }
        Ok(segments.join("."))
    }

    fn expr(&mut self) -> Result<Expr> {
        self.descend()?;
        let condition = self.binary_level(0)?;
        let expr = if self.eat("?") {
            let then = self.expr()?;
            self.expect(":")?;
            let otherwise = self.expr()?;
            Expr::Ternary(Box::new(condition), Box::new(then), Box::new(otherwise))
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[("||", BinOp::Or)],
            &[("&&", BinOp::And)],
            &[
                ("===", BinOp::Eq),
                ("!==", BinOp::Ne),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary_level(level + 1)?;
        let mut chained = 0;
        'outer: loop {
            for (punct, op) in LEVELS[level] {
                if self.eat(punct) {
                    self.descend()?;
                    chained += 1;
                    let right = self.binary_level(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.depth -= chained;
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let wrap: fn(Box<Expr>) -> Expr = if self.eat("!") {
            Expr::Not
        } else if self.eat("-") {
            Expr::Neg
        } else if self.eat("+") {
            Expr::Plus
        } else {
            return self.primary();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(wrap(Box::new(operand)))
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(number(n)))
            }
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(s)))
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" | "false" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(name == "true")))
                }
                "null" | "undefined" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Null))
                }
                "state" => Ok(Expr::Read(self.target()?)),
                other => Err(self.error(format!("unknown identifier {other:?}"))),
            },
            Some(Tok::Punct("(")) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            _ => Err(self.error("expected expression")),
        }
    }
}

/// Map a punctuation string onto its static token text.
fn punct_str(punct: &str) -> &'static str {
    PUNCTS.iter().find(|p| **p == punct).copied().unwrap_or("")
}

// ----------------------------------------------------------------------
// Evaluation
// ----------------------------------------------------------------------

fn eval(expr: &Expr, state: &dyn ScriptState) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Read(path) => state.read(path),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, state))),
        Expr::Neg(inner) => number(-to_number(&eval(inner, state))),
        Expr::Plus(inner) => number(to_number(&eval(inner, state))),
        Expr::Ternary(cond, then, otherwise) => {
            if truthy(&eval(cond, state)) {
                eval(then, state)
            } else {
                eval(otherwise, state)
            }
        }
        Expr::Binary(BinOp::And, left, right) => {
            let l = eval(left, state);
            if truthy(&l) {
                eval(right, state)
            } else {
                l
            }
        }
        Expr::Binary(BinOp::Or, left, right) => {
            let l = eval(left, state);
            if truthy(&l) {
                l
            } else {
                eval(right, state)
            }
        }
        Expr::Binary(op, left, right) => binary(*op, eval(left, state), eval(right, state)),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Value {
    match op {
        BinOp::Add if left.is_string() || right.is_string() => {
            Value::String(format!("{}{}", display(&left), display(&right)))
        }
        BinOp::Add => number(to_number(&left) + to_number(&right)),
        BinOp::Sub => number(to_number(&left) - to_number(&right)),
        BinOp::Mul => number(to_number(&left) * to_number(&right)),
        BinOp::Div => number(to_number(&left) / to_number(&right)),
        BinOp::Rem => number(to_number(&left) % to_number(&right)),
        BinOp::Eq => Value::Bool(loose_eq(&left, &right)),
        BinOp::Ne => Value::Bool(!loose_eq(&left, &right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(&left).partial_cmp(&to_number(&right)),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinOp::And | BinOp::Or => Value::Null,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Whole numbers become integers; non-finite results become `null`.
fn number(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Map(HashMap<String, Value>);

    impl ScriptState for Map {
        fn read(&self, path: &str) -> Value {
            self.0.get(path).cloned().unwrap_or(Value::Null)
        }
        fn write(&mut self, path: &str, value: Value) {
            self.0.insert(path.to_string(), value);
        }
    }

    fn run(src: &str, initial: &[(&str, Value)]) -> Map {
        let mut state = Map::default();
        for (k, v) in initial {
            state.0.insert(k.to_string(), v.clone());
        }
        Script::parse(src).unwrap().run(&mut state);
        state
    }

    #[test]
    fn like_toggle_script() {
        let src = "state.hasLiked = !state.hasLiked; state.likes += state.hasLiked ? 1 : -1;\nstate.heartColor = state.hasLiked ? 'red' : 'gray'";
        let state = run(src, &[("hasLiked", json!(false)), ("likes", json!(10))]);
        assert_eq!(state.read("hasLiked"), json!(true));
        assert_eq!(state.read("likes"), json!(11));
        assert_eq!(state.read("heartColor"), json!("red"));
    }

    #[test]
    fn increments_and_bracket_keys() {
        let state = run(
            r#"state["Cart#2.count"]++; --state.stock; state.total *= 2"#,
            &[("Cart#2.count", json!(1)), ("stock", json!(5)), ("total", json!(2.5))],
        );
        assert_eq!(state.read("Cart#2.count"), json!(2));
        assert_eq!(state.read("stock"), json!(4));
        assert_eq!(state.read("total"), json!(5));
    }

    #[test]
    fn precedence_and_strings() {
        let state = run(
            "state.a = 1 + 2 * 3; state.b = 'n=' + state.a; state.c = state.a > 5 && state.a <= 7",
            &[],
        );
        assert_eq!(state.read("a"), json!(7));
        assert_eq!(state.read("b"), json!("n=7"));
        assert_eq!(state.read("c"), json!(true));
    }

    #[test]
    fn targets_are_listed_once() {
        let script = Script::parse("state.a = 1; state.b = 2; state.a += 1").unwrap();
        assert_eq!(script.targets(), vec!["a", "b"]);
    }

    #[test]
    fn arbitrary_code_is_rejected() {
        assert!(Script::parse("alert(1)").is_err());
        assert!(Script::parse("state.x = fetch('/steal')").is_err());
        assert!(Script::parse("state = 1").is_err());
        assert!(Script::parse("state.x = `tpl`").is_err());
    }

    #[test]
    fn runaway_nesting_is_a_parse_error() {
        for body in [
            "!".repeat(10_000) + "1",
            "(".repeat(10_000) + "1",
            vec!["1"; 10_000].join(" + "),
            "1 ? ".repeat(10_000) + "1",
        ] {
            let err = Script::parse(&format!("state.x = {body}")).unwrap_err();
            assert!(err.to_string().contains("nested too deeply"), "{err}");
        }
        let nested = format!("state.x = {}1{}", "(".repeat(20), ")".repeat(20));
        assert!(Script::parse(&nested).is_ok());
    }
}
