// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device identifier templates.
//!
//! The configured `deviceId` may reference record fields so that each record
//! lands under its own device path:
//!
//! ```text
//! root.ln.{{.device}}
//! hello, {{if age > 40}}{{name}}{{else}}{{mobile}}{{end}}
//! {{if eq .kind "gps"}}root.gps{{else if gt .speed 100}}root.fast{{else}}root.misc{{end}}
//! {{printf "%.3s" name}}
//! ```
//!
//! Actions:
//! - `{{name}}` / `{{.name}}`: field value
//! - `{{if COND}} ... {{else if COND}} ... {{else}} ... {{end}}`
//! - `{{printf "FORMAT" arg...}}` with `%s`, `%.Ns`, `%d`, `%f`, `%.Nf`,
//!   `%v` and `%%`
//! - `{{/* comment */}}`
//!
//! A condition is a bare operand (truthiness), an infix comparison
//! `a OP b` with `>`, `>=`, `<`, `<=`, `==`, `!=`, or a prefix comparison
//! `OP a b` with `gt`, `ge`, `lt`, `le`, `eq`, `ne`. Operands are field
//! references, numbers, `true`/`false` or double-quoted strings. Two numbers
//! compare numerically; anything else compares as text.

use crate::record::Record;
use crate::value::{UnsupportedKind, Value};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Distinct templates kept parsed by [`TemplateEngine`].
const CACHE_CAPACITY: usize = 64;

/// Template parse or evaluation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("syntax error in template '{template}': {reason}")]
    Syntax { template: String, reason: String },

    #[error("field '{0}' not found in record")]
    UnknownField(String),

    #[error("cannot format field '{field}': {reason}")]
    Format { field: String, reason: String },

    #[error("{0}")]
    Evaluation(String),
}

/// Renders a device identifier template against one record.
///
/// The pipeline may plug in its own evaluation service; [`TemplateEngine`]
/// is the built-in implementation.
pub trait TemplateEvaluator: Send + Sync {
    fn evaluate(&self, template: &str, record: &Record) -> Result<String, TemplateError>;

    /// Reject a template that can never render. Called once at configure
    /// time.
    fn check(&self, _template: &str) -> Result<(), TemplateError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            None => self == CompareOp::Ne,
            Some(o) => match self {
                CompareOp::Gt => o == Ordering::Greater,
                CompareOp::Ge => o != Ordering::Less,
                CompareOp::Lt => o == Ordering::Less,
                CompareOp::Le => o != Ordering::Greater,
                CompareOp::Eq => o == Ordering::Equal,
                CompareOp::Ne => o != Ordering::Equal,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Field(String),
    Literal(Value),
}

impl Operand {
    fn parse(token: &str, template: &str) -> Result<Self, TemplateError> {
        let token = token.trim();
        if token.starts_with('"') {
            return serde_json::from_str::<String>(token)
                .map(|s| Operand::Literal(Value::Text(s)))
                .map_err(|e| syntax(template, format!("bad string literal {}: {}", token, e)));
        }
        match token {
            "true" => return Ok(Operand::Literal(Value::Bool(true))),
            "false" => return Ok(Operand::Literal(Value::Bool(false))),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return Ok(Operand::Literal(Value::Int64(i)));
        }
        if token.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
            if let Ok(f) = token.parse::<f64>() {
                return Ok(Operand::Literal(Value::Float64(f)));
            }
        }

        let name = token.strip_prefix('.').unwrap_or(token);
        if is_field_name(name) {
            Ok(Operand::Field(name.to_string()))
        } else {
            Err(syntax(template, format!("unexpected operand '{}'", token)))
        }
    }

    fn resolve<'a>(&'a self, record: &'a Record) -> Result<&'a Value, TemplateError> {
        match self {
            Operand::Field(name) => record
                .get(name)
                .ok_or_else(|| TemplateError::UnknownField(name.clone())),
            Operand::Literal(v) => Ok(v),
        }
    }

    fn label(&self) -> String {
        match self {
            Operand::Field(name) => name.clone(),
            Operand::Literal(v) => v.to_string(),
        }
    }
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Truthy(Operand),
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Operand,
    },
}

impl Condition {
    fn parse(text: &str, template: &str) -> Result<Self, TemplateError> {
        let args = split_args(text, template)?;
        if args.len() == 3 {
            if let Some(op) = CompareOp::from_keyword(&args[0]) {
                return Ok(Condition::Compare {
                    lhs: Operand::parse(&args[1], template)?,
                    op,
                    rhs: Operand::parse(&args[2], template)?,
                });
            }
        }

        if let Some((at, symbol)) = find_infix_operator(text) {
            let op = CompareOp::from_symbol(symbol)
                .ok_or_else(|| syntax(template, format!("unknown operator '{}'", symbol)))?;
            let lhs = &text[..at];
            let rhs = &text[at + symbol.len()..];
            if lhs.trim().is_empty() || rhs.trim().is_empty() {
                return Err(syntax(template, format!("incomplete comparison '{}'", text)));
            }
            return Ok(Condition::Compare {
                lhs: Operand::parse(lhs, template)?,
                op,
                rhs: Operand::parse(rhs, template)?,
            });
        }

        match args.as_slice() {
            [single] => Ok(Condition::Truthy(Operand::parse(single, template)?)),
            [] => Err(syntax(template, "missing condition after 'if'")),
            _ => Err(syntax(template, format!("cannot parse condition '{}'", text))),
        }
    }

    fn eval(&self, record: &Record) -> Result<bool, TemplateError> {
        match self {
            Condition::Truthy(Operand::Field(name)) => Ok(record.get(name).is_some_and(truthy)),
            Condition::Truthy(Operand::Literal(v)) => Ok(truthy(v)),
            Condition::Compare { lhs, op, rhs } => {
                let l = lhs.resolve(record)?;
                let r = rhs.resolve(record)?;
                Ok(op.holds(compare(l, r)))
            }
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Int32(v) => *v != 0,
        Value::Int64(v) => *v != 0,
        Value::Float32(v) => *v != 0.0,
        Value::Float64(v) => *v != 0.0,
        Value::Text(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        Value::Unsupported(kind) => *kind != UnsupportedKind::Null,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            l.as_integral().zip(r.as_integral()).map(|(a, b)| a.cmp(&b))
        }
        _ if l.is_numeric() && r.is_numeric() => {
            l.as_f64().zip(r.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        _ => Some(l.to_string().cmp(&r.to_string())),
    }
}

/// Position and text of the first comparison operator outside quotes.
fn find_infix_operator(text: &str) -> Option<(usize, &str)> {
    let bytes = text.as_bytes();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_quote => i += 1,
            b'"' => in_quote = !in_quote,
            b'>' | b'<' | b'=' | b'!' if !in_quote => {
                let two = text.get(i..i + 2);
                if let Some(op @ (">=" | "<=" | "==" | "!=")) = two {
                    return Some((i, op));
                }
                if matches!(bytes[i], b'>' | b'<') {
                    return Some((i, &text[i..i + 1]));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split an action body into whitespace-separated arguments, keeping
/// double-quoted strings whole.
fn split_args(text: &str, template: &str) -> Result<Vec<String>, TemplateError> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut arg = String::new();
        if c == '"' {
            arg.push(c);
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                arg.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        arg.push(escaped);
                    }
                } else if c == '"' {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err(syntax(template, "unterminated string literal"));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                arg.push(c);
                chars.next();
            }
        }
        args.push(arg);
    }
    Ok(args)
}

#[derive(Debug, Clone, PartialEq)]
enum FormatPiece {
    Literal(String),
    Str { precision: Option<usize> },
    Int,
    Float { precision: Option<usize> },
    Any,
}

fn parse_format(format: &str, template: &str) -> Result<Vec<FormatPiece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = Some(digits.parse::<usize>().unwrap_or(0));
        }

        let piece = match (chars.next(), precision) {
            (Some('s'), p) => FormatPiece::Str { precision: p },
            (Some('f'), p) => FormatPiece::Float { precision: p },
            (Some('d'), None) => FormatPiece::Int,
            (Some('v'), None) => FormatPiece::Any,
            (Some(verb), _) => {
                return Err(syntax(
                    template,
                    format!("unsupported printf verb '%{}'", verb),
                ))
            }
            (None, _) => return Err(syntax(template, "printf format ends with '%'")),
        };
        if !literal.is_empty() {
            pieces.push(FormatPiece::Literal(std::mem::take(&mut literal)));
        }
        pieces.push(piece);
    }
    if !literal.is_empty() {
        pieces.push(FormatPiece::Literal(literal));
    }
    Ok(pieces)
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Operand),
    Printf {
        pieces: Vec<FormatPiece>,
        args: Vec<Operand>,
    },
    If {
        cond: Condition,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// An `if` block being parsed.
struct Frame {
    cond: Condition,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
    /// Opened by `else if`; closed by the same `end` as its parent.
    chained: bool,
}

impl Frame {
    fn into_node(self) -> Node {
        Node::If {
            cond: self.cond,
            then: self.then,
            otherwise: self.otherwise.unwrap_or_default(),
        }
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse `source`.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut root: Vec<Node> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();

        fn target<'a>(root: &'a mut Vec<Node>, stack: &'a mut [Frame]) -> &'a mut Vec<Node> {
            match stack.last_mut() {
                None => root,
                Some(frame) => match frame.otherwise.as_mut() {
                    Some(otherwise) => otherwise,
                    None => &mut frame.then,
                },
            }
        }

        let mut rest = source;
        while !rest.is_empty() {
            let Some(open) = rest.find("{{") else {
                target(&mut root, &mut stack).push(Node::Text(rest.to_string()));
                break;
            };
            if open > 0 {
                target(&mut root, &mut stack).push(Node::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or_else(|| syntax(source, "unclosed action '{{'"))?;
            let action = after_open[..close].trim();
            rest = &after_open[close + 2..];

            if action.starts_with("/*") && action.ends_with("*/") {
                continue;
            }
            let (keyword, body) = match action.split_once(char::is_whitespace) {
                Some((k, b)) => (k, b.trim()),
                None => (action, ""),
            };

            match keyword {
                "" => return Err(syntax(source, "empty action")),
                "if" => stack.push(Frame {
                    cond: Condition::parse(body, source)?,
                    then: Vec::new(),
                    otherwise: None,
                    chained: false,
                }),
                "else" => {
                    let frame = stack
                        .last_mut()
                        .ok_or_else(|| syntax(source, "'else' outside of 'if'"))?;
                    if frame.otherwise.is_some() {
                        return Err(syntax(source, "duplicate 'else'"));
                    }
                    frame.otherwise = Some(Vec::new());
                    let (word, cond) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
                    if word == "if" {
                        stack.push(Frame {
                            cond: Condition::parse(cond.trim(), source)?,
                            then: Vec::new(),
                            otherwise: None,
                            chained: true,
                        });
                    } else if !body.is_empty() {
                        return Err(syntax(source, format!("unexpected '{}' after 'else'", body)));
                    }
                }
                "end" => loop {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| syntax(source, "'end' without 'if'"))?;
                    let chained = frame.chained;
                    target(&mut root, &mut stack).push(frame.into_node());
                    if !chained {
                        break;
                    }
                },
                "printf" => {
                    let args = split_args(body, source)?;
                    let (format, args) = args
                        .split_first()
                        .ok_or_else(|| syntax(source, "printf needs a format string"))?;
                    if !format.starts_with('"') {
                        return Err(syntax(source, "printf format must be a quoted string"));
                    }
                    let format: String = serde_json::from_str(format)
                        .map_err(|e| syntax(source, format!("bad printf format: {}", e)))?;
                    let pieces = parse_format(&format, source)?;
                    let verbs = pieces
                        .iter()
                        .filter(|p| !matches!(p, FormatPiece::Literal(_)))
                        .count();
                    if verbs != args.len() {
                        return Err(syntax(
                            source,
                            format!(
                                "printf format has {} verbs but {} arguments",
                                verbs,
                                args.len()
                            ),
                        ));
                    }
                    let args = args
                        .iter()
                        .map(|a| Operand::parse(a, source))
                        .collect::<Result<Vec<_>, _>>()?;
                    target(&mut root, &mut stack).push(Node::Printf { pieces, args });
                }
                _ if body.is_empty() => {
                    let operand = Operand::parse(action, source)?;
                    target(&mut root, &mut stack).push(Node::Output(operand));
                }
                _ => return Err(syntax(source, format!("unknown action '{}'", action))),
            }
        }

        if !stack.is_empty() {
            return Err(syntax(source, "'if' without matching 'end'"));
        }
        Ok(Self {
            source: source.to_string(),
            nodes: root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the template has no actions.
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }

    /// Render against `record`.
    pub fn render(&self, record: &Record) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_nodes(&self.nodes, record, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(nodes: &[Node], record: &Record, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(operand) => {
                let value = printable(operand, record)?;
                out.push_str(&value.to_string());
            }
            Node::Printf { pieces, args } => {
                let mut args = args.iter();
                for piece in pieces {
                    if let FormatPiece::Literal(text) = piece {
                        out.push_str(text);
                        continue;
                    }
                    let Some(operand) = args.next() else {
                        break;
                    };
                    format_piece(piece, operand, record, out)?;
                }
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if cond.eval(record)? { then } else { otherwise };
                render_nodes(branch, record, out)?;
            }
        }
    }
    Ok(())
}

fn printable<'a>(operand: &'a Operand, record: &'a Record) -> Result<&'a Value, TemplateError> {
    let value = operand.resolve(record)?;
    if let Value::Unsupported(kind) = value {
        return Err(TemplateError::Format {
            field: operand.label(),
            reason: format!("{} value has no text form", kind),
        });
    }
    Ok(value)
}

fn format_piece(
    piece: &FormatPiece,
    operand: &Operand,
    record: &Record,
    out: &mut String,
) -> Result<(), TemplateError> {
    let value = printable(operand, record)?;
    let mismatch = |expected: &str| TemplateError::Format {
        field: operand.label(),
        reason: format!("expected {} value, got {}", expected, value.kind()),
    };
    match piece {
        FormatPiece::Literal(text) => out.push_str(text),
        FormatPiece::Str { precision } => {
            let text = value.to_string();
            match precision {
                Some(n) => out.extend(text.chars().take(*n)),
                None => out.push_str(&text),
            }
        }
        FormatPiece::Int => {
            let i = value.as_integral().ok_or_else(|| mismatch("integer"))?;
            out.push_str(&i.to_string());
        }
        FormatPiece::Float { precision } => {
            let f = value.as_f64().ok_or_else(|| mismatch("numeric"))?;
            out.push_str(&format!("{:.*}", precision.unwrap_or(6), f));
        }
        FormatPiece::Any => out.push_str(&value.to_string()),
    }
    Ok(())
}

fn syntax(template: &str, reason: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        template: template.to_string(),
        reason: reason.into(),
    }
}

/// Built-in evaluator with a small cache of parsed templates.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed form of `source`, from the cache when possible.
    pub fn compile(&self, source: &str) -> Result<Arc<Template>, TemplateError> {
        if let Some(template) = self.cache.lock().get(source) {
            return Ok(Arc::clone(template));
        }

        let template = Arc::new(Template::parse(source)?);
        let mut cache = self.cache.lock();
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(source.to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl TemplateEvaluator for TemplateEngine {
    fn evaluate(&self, template: &str, record: &Record) -> Result<String, TemplateError> {
        self.compile(template)?.render(record)
    }

    fn check(&self, template: &str) -> Result<(), TemplateError> {
        self.compile(template).map(|_| ())
    }
}
