//! A narrow JSONPath implementation for schema-described document paths.
//!
//! Resource schemas describe identities, references and securable elements
//! with a small JSONPath subset:
//!
//! - `$` root, `.name` and `['name']` member access
//! - `[n]` array index and `[*]` / `.*` wildcard
//! - `[?(@.a.b == 'text' && @.c == 42)]` conjunctive equality filters
//!
//! Every match carries the concrete path it was found at, so callers can
//! write a new value back to exactly that location.

use std::fmt;

use serde_json::{Map, Number, Value};

use crate::error::{DmsError, Result};

/// One step of a compiled path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
    Filter(Vec<Condition>),
}

/// An equality test inside a filter expression, relative to the element.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: Vec<String>,
    pub value: FilterValue,
}

/// Filter literals. Numbers compare numerically, everything else as text.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(Number),
    String(String),
}

impl FilterValue {
    /// Build a literal from a document value, following the numeric/string policy.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => FilterValue::Number(n.clone()),
            Value::String(s) => FilterValue::String(s.clone()),
            other => FilterValue::String(other.to_string()),
        }
    }

    fn matches(&self, candidate: &Value) -> bool {
        match (self, candidate) {
            (FilterValue::Number(expected), Value::Number(actual)) => numbers_equal(expected, actual),
            (FilterValue::String(expected), Value::String(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::String(s) => {
                let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "'{escaped}'")
            }
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a.as_u64(), b.as_u64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
    }
}

/// A step of a concrete (wildcard-free) location inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// A concrete location inside a document, e.g. `$.classPeriods[1].classPeriodName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConcretePath(pub Vec<PathStep>);

impl ConcretePath {
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Index of the last array step, if the location is inside an array.
    pub fn last_index(&self) -> Option<usize> {
        self.0.iter().rev().find_map(|s| match s {
            PathStep::Index(i) => Some(*i),
            PathStep::Key(_) => None,
        })
    }
}

impl fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for step in &self.0 {
            match step {
                PathStep::Key(k) => write!(f, ".{k}")?,
                PathStep::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// A single result of evaluating a path against a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch<'a> {
    pub path: ConcretePath,
    pub value: &'a Value,
}

/// A compiled JSONPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compile a path string.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = Parser::new(raw).parse()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// True when the path addresses at most one location.
    pub fn is_concrete(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Field(_) | Segment::Index(_)))
    }

    /// Split at the first `[*]`: the array path before it and the member
    /// field names after it. Returns `None` for paths without a wildcard.
    pub fn split_at_wildcard(&self) -> Option<(JsonPath, Vec<String>)> {
        let pos = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Wildcard))?;

        let prefix_segments = self.segments[..pos].to_vec();
        let mut suffix = Vec::new();
        for segment in &self.segments[pos + 1..] {
            match segment {
                Segment::Field(name) => suffix.push(name.clone()),
                _ => return None,
            }
        }

        let prefix = JsonPath {
            raw: render_segments(&prefix_segments),
            segments: prefix_segments,
        };
        Some((prefix, suffix))
    }

    /// Evaluate against a document, returning every match with its location.
    pub fn select<'a>(&self, doc: &'a Value) -> Vec<PathMatch<'a>> {
        let mut out = Vec::new();
        let mut current = Vec::new();
        walk(&self.segments, doc, &mut current, &mut out);
        out
    }

    pub fn select_values<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        self.select(doc).into_iter().map(|m| m.value).collect()
    }

    pub fn select_first<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.select(doc).into_iter().next().map(|m| m.value)
    }

    /// Write `value` at the location this path names.
    ///
    /// The path must be concrete. Missing intermediate objects are created;
    /// array indices must already exist.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<()> {
        let steps = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Field(name) => Ok(PathStep::Key(name.clone())),
                Segment::Index(i) => Ok(PathStep::Index(*i)),
                _ => Err(DmsError::JsonPath {
                    path: self.raw.clone(),
                    reason: "cannot write through a wildcard or filter".into(),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        set_at(doc, &ConcretePath(steps), value).map_err(|reason| DmsError::JsonPath {
            path: self.raw.clone(),
            reason,
        })
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Write `value` at a concrete location.
pub fn set_at(doc: &mut Value, path: &ConcretePath, value: Value) -> std::result::Result<(), String> {
    let Some((last, parents)) = path.0.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for step in parents {
        current = match step {
            PathStep::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| format!("'{key}' parent is not an object"))?;
                obj.entry(key.clone()).or_insert(Value::Null)
            }
            PathStep::Index(i) => current
                .as_array_mut()
                .and_then(|arr| arr.get_mut(*i))
                .ok_or_else(|| format!("array index {i} does not exist"))?,
        };
    }

    match last {
        PathStep::Key(key) => {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let obj = current
                .as_object_mut()
                .ok_or_else(|| format!("'{key}' parent is not an object"))?;
            obj.insert(key.clone(), value);
        }
        PathStep::Index(i) => {
            let slot = current
                .as_array_mut()
                .and_then(|arr| arr.get_mut(*i))
                .ok_or_else(|| format!("array index {i} does not exist"))?;
            *slot = value;
        }
    }
    Ok(())
}

/// Render a filter expression selecting elements of `array_path` whose members
/// equal every given value, e.g. `$.a[?(@.b.c == 'x' && @.d == 1)]`.
pub fn filter_expression(array_path: &JsonPath, conditions: &[(Vec<String>, FilterValue)]) -> String {
    let predicate = conditions
        .iter()
        .map(|(fields, value)| format!("@.{} == {}", fields.join("."), value))
        .collect::<Vec<_>>()
        .join(" && ");
    format!("{}[?({})]", array_path.as_str(), predicate)
}

fn walk<'a>(
    segments: &[Segment],
    value: &'a Value,
    current: &mut Vec<PathStep>,
    out: &mut Vec<PathMatch<'a>>,
) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(PathMatch {
            path: ConcretePath(current.clone()),
            value,
        });
        return;
    };

    match segment {
        Segment::Field(name) => {
            if let Some(child) = value.get(name.as_str()) {
                current.push(PathStep::Key(name.clone()));
                walk(rest, child, current, out);
                current.pop();
            }
        }
        Segment::Index(i) => {
            if let Some(child) = value.as_array().and_then(|a| a.get(*i)) {
                current.push(PathStep::Index(*i));
                walk(rest, child, current, out);
                current.pop();
            }
        }
        Segment::Wildcard => match value {
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    current.push(PathStep::Index(i));
                    walk(rest, child, current, out);
                    current.pop();
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    current.push(PathStep::Key(key.clone()));
                    walk(rest, child, current, out);
                    current.pop();
                }
            }
            _ => {}
        },
        Segment::Filter(conditions) => {
            if let Some(items) = value.as_array() {
                for (i, child) in items.iter().enumerate() {
                    if conditions.iter().all(|c| condition_holds(c, child)) {
                        current.push(PathStep::Index(i));
                        walk(rest, child, current, out);
                        current.pop();
                    }
                }
            }
        }
    }
}

fn condition_holds(condition: &Condition, element: &Value) -> bool {
    let mut target = element;
    for field in &condition.path {
        match target.get(field.as_str()) {
            Some(next) => target = next,
            None => return false,
        }
    }
    condition.value.matches(target)
}

fn render_segments(segments: &[Segment]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            Segment::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
            Segment::Wildcard => out.push_str("[*]"),
            Segment::Filter(conditions) => {
                let predicate = conditions
                    .iter()
                    .map(|c| format!("@.{} == {}", c.path.join("."), c.value))
                    .collect::<Vec<_>>()
                    .join(" && ");
                out.push_str(&format!("[?({predicate})]"));
            }
        }
    }
    out
}

struct Parser<'s> {
    raw: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(raw: &'s str) -> Self {
        Self {
            raw,
            chars: raw.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> DmsError {
        DmsError::JsonPath {
            path: self.raw.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}', found end of path"))),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>> {
        self.expect('$')?;
        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        segments.push(Segment::Wildcard);
                    } else {
                        segments.push(Segment::Field(self.identifier()?));
                    }
                }
                '[' => {
                    self.pos += 1;
                    segments.push(self.bracket()?);
                }
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            }
        }
        Ok(segments)
    }

    fn identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '-') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a member name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn bracket(&mut self) -> Result<Segment> {
        self.skip_whitespace();
        let segment = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some('\'') | Some('"') => Segment::Field(self.quoted()?),
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| self.error(format!("invalid index: {e}")))?;
                Segment::Index(index)
            }
            Some('?') => {
                self.pos += 1;
                self.skip_whitespace();
                self.expect('(')?;
                let conditions = self.conditions()?;
                self.skip_whitespace();
                self.expect(')')?;
                Segment::Filter(conditions)
            }
            Some(c) => return Err(self.error(format!("unexpected character '{c}' in brackets"))),
            None => return Err(self.error("unterminated bracket")),
        };
        self.skip_whitespace();
        match self.bump() {
            Some(']') => Ok(segment),
            _ => Err(self.error("unterminated bracket")),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected a quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string literal")),
            }
        }
    }

    fn conditions(&mut self) -> Result<Vec<Condition>> {
        let mut conditions = vec![self.condition()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some('&') {
                self.pos += 1;
                self.expect('&')?;
                conditions.push(self.condition()?);
            } else {
                return Ok(conditions);
            }
        }
    }

    fn condition(&mut self) -> Result<Condition> {
        self.skip_whitespace();
        self.expect('@')?;
        let mut path = Vec::new();
        while self.peek() == Some('.') {
            self.pos += 1;
            path.push(self.identifier()?);
        }
        if path.is_empty() {
            return Err(self.error("filter condition must name a member of '@'"));
        }
        self.skip_whitespace();
        self.expect('=')?;
        self.expect('=')?;
        self.skip_whitespace();
        let value = self.literal()?;
        Ok(Condition { path, value })
    }

    fn literal(&mut self) -> Result<FilterValue> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(FilterValue::String(self.quoted()?)),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                let number = serde_json::from_str::<Number>(&text)
                    .map_err(|e| self.error(format!("invalid number literal '{text}': {e}")))?;
                Ok(FilterValue::Number(number))
            }
            _ => Err(self.error("expected a string or number literal")),
        }
    }
}
