//! Probe (`.prb`) files.
//!
//! A probe file is a sequence of Python-style assignments, the important one
//! being `channel_groups`:
//!
//! ```text
//! channel_groups = {
//!     0: {'channels': list(range(0, 16)), 'dead_channels': [3]},
//!     1: {'channels': [16, 17, 18, 19]},
//! }
//! ```
//!
//! Only literals are evaluated: numbers, strings, lists, tuples, dicts,
//! `None`/`True`/`False`, `range(..)`, `list(..)`, `tuple(..)` and `+`/`-`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::MAX_CHANNELS;
use crate::error::CoreError;

/// Longest list `range(..)` may produce; a probe never lists more channels.
const MAX_RANGE_LEN: usize = MAX_CHANNELS;

/// Evaluated literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// `[..]`.
    List(Vec<Value>),
    /// `(..)`.
    Tuple(Vec<Value>),
    /// `{k: v, ..}` in source order.
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// Look up a dict entry by string key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| matches!(k, Value::Str(s) if s == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    fn items(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) | Value::Tuple(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl Lexer<'_> {
    fn tokenize(src: &str) -> Result<Vec<(Tok, usize)>, CoreError> {
        let mut lx = Lexer {
            chars: src.chars().peekable(),
            line: 1,
        };
        let mut out = Vec::new();
        while let Some(&c) = lx.chars.peek() {
            match c {
                '\n' => {
                    lx.line += 1;
                    lx.chars.next();
                }
                c if c.is_whitespace() => {
                    lx.chars.next();
                }
                '#' => {
                    while lx.chars.peek().is_some_and(|&c| c != '\n') {
                        lx.chars.next();
                    }
                }
                '\'' | '"' => {
                    let tok = lx.string(c)?;
                    out.push((tok, lx.line));
                }
                c if c.is_ascii_digit() || c == '.' => {
                    let tok = lx.number()?;
                    out.push((tok, lx.line));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(&c) = lx.chars.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            ident.push(c);
                            lx.chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push((Tok::Ident(ident), lx.line));
                }
                '(' | ')' | '[' | ']' | '{' | '}' | ',' | ':' | '=' | '+' | '-' | ';' => {
                    lx.chars.next();
                    out.push((Tok::Punct(c), lx.line));
                }
                other => return Err(lx.error(format!("unexpected character '{other}'"))),
            }
        }
        Ok(out)
    }

    fn error(&self, message: String) -> CoreError {
        CoreError::Probe {
            line: self.line,
            message,
        }
    }

    fn string(&mut self, quote: char) -> Result<Tok, CoreError> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Tok::Str(s)),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => s.push(c),
            }
        }
        Err(self.error("unterminated string".into()))
    }

    fn number(&mut self) -> Result<Tok, CoreError> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            let exponent_sign = (c == '-' || c == '+') && text.ends_with(['e', 'E']);
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                if c != '_' {
                    text.push(c);
                }
                self.chars.next();
            } else {
                break;
            }
        }
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Tok::Int(v));
        }
        text.parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map_or(1, |(_, l)| *l)
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::Probe {
            line: self.line(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        tok
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), CoreError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn statements(&mut self) -> Result<Vec<(String, Value)>, CoreError> {
        let mut vars: Vec<(String, Value)> = Vec::new();
        while self.peek().is_some() {
            if self.eat(';') {
                continue;
            }
            let name = match self.next() {
                Some(Tok::Ident(name)) => name,
                _ => return Err(self.error("expected an assignment")),
            };
            self.expect('=')?;
            let value = self.expr()?;
            if let Some(slot) = vars.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value;
            } else {
                vars.push((name, value));
            }
        }
        Ok(vars)
    }

    fn expr(&mut self) -> Result<Value, CoreError> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat('+') {
                let rhs = self.unary()?;
                lhs = self.binary('+', lhs, rhs)?;
            } else if self.eat('-') {
                let rhs = self.unary()?;
                lhs = self.binary('-', lhs, rhs)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn binary(&self, op: char, lhs: Value, rhs: Value) -> Result<Value, CoreError> {
        match (op, lhs, rhs) {
            ('+', Value::Int(a), Value::Int(b)) => a
                .checked_add(b)
                .map(Value::Int)
                .ok_or_else(|| self.error("integer overflow")),
            ('-', Value::Int(a), Value::Int(b)) => a
                .checked_sub(b)
                .map(Value::Int)
                .ok_or_else(|| self.error("integer overflow")),
            ('+', Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            ('-', Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            ('+', Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            ('+', Value::Tuple(mut a), Value::Tuple(b)) => {
                a.extend(b);
                Ok(Value::Tuple(a))
            }
            (op, a, b) => Err(self.error(format!(
                "unsupported operands for '{op}': {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn unary(&mut self) -> Result<Value, CoreError> {
        if self.eat('-') {
            return match self.unary()? {
                Value::Int(v) => v
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| self.error("integer overflow")),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(self.error(format!("cannot negate {}", other.type_name()))),
            };
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Value, CoreError> {
        match self.next() {
            Some(Tok::Int(v)) => Ok(Value::Int(v)),
            Some(Tok::Float(v)) => Ok(Value::Float(v)),
            Some(Tok::Str(s)) => Ok(Value::Str(s)),
            Some(Tok::Punct('[')) => Ok(Value::List(self.sequence(']')?)),
            Some(Tok::Punct('(')) => {
                let items = self.sequence(')')?;
                // a parenthesised single expression without a trailing comma is not a tuple
                let trailing_comma =
                    matches!(self.toks.get(self.pos - 2), Some((Tok::Punct(','), _)));
                if items.len() == 1 && !trailing_comma {
                    Ok(items.into_iter().next().unwrap_or(Value::None))
                } else {
                    Ok(Value::Tuple(items))
                }
            }
            Some(Tok::Punct('{')) => self.dict(),
            Some(Tok::Ident(name)) => match name.as_str() {
                "None" => Ok(Value::None),
                "True" => Ok(Value::Bool(true)),
                "False" => Ok(Value::Bool(false)),
                "range" | "list" | "tuple" => {
                    self.expect('(')?;
                    let args = self.sequence(')')?;
                    self.call(&name, args)
                }
                other => Err(self.error(format!("unknown name '{other}'"))),
            },
            Some(Tok::Punct(c)) => Err(self.error(format!("unexpected '{c}'"))),
            None => Err(self.error("unexpected end of file")),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Value>, CoreError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.expr()?);
            if !self.eat(',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn dict(&mut self) -> Result<Value, CoreError> {
        let mut entries = Vec::new();
        loop {
            if self.eat('}') {
                return Ok(Value::Dict(entries));
            }
            let key = self.expr()?;
            self.expect(':')?;
            let value = self.expr()?;
            entries.push((key, value));
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(Value::Dict(entries));
            }
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CoreError> {
        match name {
            "range" => {
                let ints: Option<Vec<i64>> = args
                    .iter()
                    .map(|a| match a {
                        Value::Int(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                let (start, stop, step) = match ints.as_deref() {
                    Some([stop]) => (0, *stop, 1),
                    Some([start, stop]) => (*start, *stop, 1),
                    Some([start, stop, step]) if *step != 0 => (*start, *stop, *step),
                    _ => return Err(self.error("range() takes 1 to 3 integers, step non-zero")),
                };
                let mut out = Vec::new();
                let mut v = start;
                while (step > 0 && v < stop) || (step < 0 && v > stop) {
                    if out.len() == MAX_RANGE_LEN {
                        return Err(self.error(format!(
                            "range() longer than {MAX_RANGE_LEN} elements"
                        )));
                    }
                    out.push(Value::Int(v));
                    // Stepping past i64 is past `stop` as well.
                    let Some(next) = v.checked_add(step) else {
                        break;
                    };
                    v = next;
                }
                Ok(Value::List(out))
            }
            _ => match args.as_slice() {
                [] => Ok(if name == "list" {
                    Value::List(Vec::new())
                } else {
                    Value::Tuple(Vec::new())
                }),
                [arg] => {
                    let items = arg
                        .items()
                        .ok_or_else(|| self.error(format!("{name}() of {}", arg.type_name())))?
                        .to_vec();
                    Ok(if name == "list" {
                        Value::List(items)
                    } else {
                        Value::Tuple(items)
                    })
                }
                _ => Err(self.error(format!("{name}() takes at most one argument"))),
            },
        }
    }
}

/// Evaluated probe file: top-level assignments in source order.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeFile {
    /// `(name, value)` pairs; later assignments replace earlier ones.
    pub vars: Vec<(String, Value)>,
}

impl ProbeFile {
    /// Value assigned to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Flatten `channel_groups` into a [`ChannelLayout`].
    ///
    /// Groups are visited in ascending id order.
    ///
    /// # Errors
    /// Returns an error if `channel_groups` is missing or malformed.
    pub fn layout(&self) -> Result<ChannelLayout, CoreError> {
        let malformed = |message: String| CoreError::Probe { line: 0, message };
        let Some(Value::Dict(groups)) = self.get("channel_groups") else {
            return Err(malformed("no channel_groups dict".into()));
        };

        let mut ordered: Vec<(i64, &Value)> = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            let Value::Int(id) = key else {
                return Err(malformed(format!("group key of type {}", key.type_name())));
            };
            ordered.push((*id, group));
        }
        ordered.sort_by_key(|(id, _)| *id);

        let mut layout = ChannelLayout::default();
        for (id, group) in ordered {
            let channels = group
                .get("channels")
                .ok_or_else(|| malformed(format!("group {id} has no 'channels'")))?;
            layout.channels.extend(channel_indices(channels, id)?);
            if let Some(dead) = group.get("dead_channels") {
                layout.dead.extend(channel_indices(dead, id)?);
            }
        }
        Ok(layout)
    }
}

fn channel_indices(value: &Value, group: i64) -> Result<Vec<usize>, CoreError> {
    let malformed = |message: String| CoreError::Probe { line: 0, message };
    let items = value
        .items()
        .ok_or_else(|| malformed(format!("group {group}: channel list is a {}", value.type_name())))?;
    items
        .iter()
        .map(|v| match v {
            Value::Int(i) if *i >= 0 => Ok(*i as usize),
            other => Err(malformed(format!("group {group}: invalid channel {other:?}"))),
        })
        .collect()
}

/// Channels of a probe, flattened over its groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Channel indices in display order.
    pub channels: Vec<usize>,
    /// Dead (bad) channel indices.
    pub dead: Vec<usize>,
}

impl ChannelLayout {
    /// Keep the first `n` channels and the dead channels among them.
    #[must_use]
    pub fn truncated(mut self, n: usize) -> Self {
        self.channels.truncate(n);
        let kept = &self.channels;
        self.dead.retain(|c| kept.contains(c));
        self
    }
}

/// Evaluate probe file text.
///
/// # Errors
/// Returns `CoreError::Probe` with the offending line on syntax errors.
///
/// # Example
/// ```
/// use dm_core::probe::parse_probe;
/// let prb = parse_probe("channel_groups = {0: {'channels': range(4), 'dead_channels': [2]}}").unwrap();
/// let layout = prb.layout().unwrap();
/// assert_eq!(layout.channels, vec![0, 1, 2, 3]);
/// assert_eq!(layout.dead, vec![2]);
/// ```
pub fn parse_probe(src: &str) -> Result<ProbeFile, CoreError> {
    let toks = Lexer::tokenize(src)?;
    let vars = Parser { toks, pos: 0 }.statements()?;
    Ok(ProbeFile { vars })
}

/// Read and evaluate a probe file.
///
/// # Errors
/// Returns an error if the file cannot be read or evaluated.
pub fn load_probe(path: &Path) -> Result<ProbeFile> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read probe file {}", path.display()))?;
    parse_probe(&src).with_context(|| format!("in {}", path.display()))
}

/// First `.prb` file (in name order) next to `target`.
///
/// `target` may be a file (its directory is searched) or a directory.
#[must_use]
pub fn find_probe(target: &Path) -> Option<PathBuf> {
    let dir = search_dir(target)?;
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("prb")))
        .collect();
    found.sort();
    found.into_iter().next()
}

/// Directory searched for probes of `target`; a bare file name means the
/// current directory.
fn search_dir(target: &Path) -> Option<&Path> {
    if target.is_dir() {
        return Some(target);
    }
    match target.parent()? {
        p if p.as_os_str().is_empty() => Some(Path::new(".")),
        p => Some(p),
    }
}
