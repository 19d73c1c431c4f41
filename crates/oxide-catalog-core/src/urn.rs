//! Hierarchical paths (URNs).
//!
//! A URN is a `/`-separated sequence of `Type[predicate]` segments, for
//! example `Server[@Name='local']/Database[@Name='app']/Table[@Name='t' and
//! @Schema='dbo']`. Text values are single-quoted with `'` escaped by
//! doubling, booleans are written `true()` / `false()`.
//!
//! Paths are never stored on objects; [`ObjectTree::urn`] recomputes them
//! from the key chain.
//!
//! [`ObjectTree::urn`]: crate::tree::ObjectTree::urn

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::collation::Collation;
use crate::error::{CatalogError, Result};
use crate::value::PropertyValue;

/// A literal in a URN predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// Quoted text.
    Text(String),
    /// Integer.
    Number(i64),
    /// `true()` or `false()`.
    Bool(bool),
}

/// A single `@Field=value` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Field name, without the `@`.
    pub field: String,
    /// Compared value.
    pub value: FilterValue,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Creates a text condition.
    #[must_use]
    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterValue::Text(value.into()))
    }

    /// Creates a boolean condition.
    #[must_use]
    pub fn boolean(field: impl Into<String>, value: bool) -> Self {
        Self::new(field, FilterValue::Bool(value))
    }

    /// Returns true if `value` satisfies this condition.
    #[must_use]
    pub fn matches(&self, value: Option<&PropertyValue>, collation: &Collation) -> bool {
        let Some(value) = value else {
            return false;
        };
        match &self.value {
            FilterValue::Text(expected) => match value {
                PropertyValue::Text(actual) => collation.equals(actual, expected),
                PropertyValue::Null => false,
                other => other.to_string() == *expected,
            },
            FilterValue::Number(expected) => value.as_i64() == Some(*expected),
            FilterValue::Bool(expected) => value.as_bool() == Some(*expected),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            FilterValue::Text(s) => write!(f, "@{}='{}'", self.field, escape(s)),
            FilterValue::Number(n) => write!(f, "@{}={n}", self.field),
            FilterValue::Bool(b) => write!(f, "@{}={b}()", self.field),
        }
    }
}

/// One `Type[predicate]` step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrnSegment {
    /// Object type name.
    pub type_name: String,
    /// Conditions joined with `and`; empty when the segment is unfiltered.
    pub predicate: Vec<Condition>,
}

impl UrnSegment {
    /// Creates an unfiltered segment.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            predicate: Vec::new(),
        }
    }

    /// Creates a filtered segment.
    #[must_use]
    pub fn filtered(type_name: impl Into<String>, predicate: Vec<Condition>) -> Self {
        Self {
            type_name: type_name.into(),
            predicate,
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with(mut self, condition: Condition) -> Self {
        self.predicate.push(condition);
        self
    }

    /// Returns true if the segment carries no predicate.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.predicate.is_empty()
    }

    /// Returns the condition on `field`, if any.
    #[must_use]
    pub fn condition(&self, field: &str) -> Option<&Condition> {
        self.predicate.iter().find(|c| c.field == field)
    }
}

impl fmt::Display for UrnSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        if !self.predicate.is_empty() {
            f.write_str("[")?;
            for (i, condition) in self.predicate.iter().enumerate() {
                if i > 0 {
                    f.write_str(" and ")?;
                }
                write!(f, "{condition}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// An absolute path from the root object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Urn {
    segments: Vec<UrnSegment>,
}

impl Urn {
    /// Creates a path from segments.
    #[must_use]
    pub const fn new(segments: Vec<UrnSegment>) -> Self {
        Self { segments }
    }

    /// Parses a path.
    pub fn parse(input: &str) -> Result<Self> {
        parse_segments(input)
            .map(Self::new)
            .map_err(|reason| CatalogError::InvalidUrn {
                urn: input.to_string(),
                reason,
            })
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[UrnSegment] {
        &self.segments
    }

    /// Returns the type of the last segment.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.type_name.as_str())
    }

    /// Returns the last segment.
    #[must_use]
    pub fn last(&self) -> Option<&UrnSegment> {
        self.segments.last()
    }

    /// Returns the path with one more segment.
    #[must_use]
    pub fn child(&self, segment: UrnSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Returns the path of the parent, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Appends a relative suffix.
    #[must_use]
    pub fn join(&self, suffix: &UrnSuffix) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments().iter().cloned());
        Self { segments }
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Urn {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A relative multi-level filter such as `Table/Column[@Nullable=false()]`,
/// resolved below an anchor object by the bulk initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrnSuffix {
    segments: Vec<UrnSegment>,
}

impl UrnSuffix {
    /// Creates a suffix from segments.
    #[must_use]
    pub const fn new(segments: Vec<UrnSegment>) -> Self {
        Self { segments }
    }

    /// Creates an unfiltered suffix from type names.
    #[must_use]
    pub fn from_types(types: &[&str]) -> Self {
        Self {
            segments: types.iter().map(|t| UrnSegment::new(*t)).collect(),
        }
    }

    /// Parses a relative filter.
    pub fn parse(input: &str) -> Result<Self> {
        let segments = parse_segments(input).map_err(|reason| CatalogError::InvalidUrn {
            urn: input.to_string(),
            reason,
        })?;
        Ok(Self { segments })
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[UrnSegment] {
        &self.segments
    }

    /// Returns true if the deepest segment has no predicate, meaning the
    /// result covers every member of the deepest collections.
    #[must_use]
    pub fn is_leaf_unfiltered(&self) -> bool {
        self.segments.last().is_some_and(UrnSegment::is_unfiltered)
    }
}

impl fmt::Display for UrnSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Urn::new(self.segments.clone()).fmt(f)
    }
}

/// Escapes a text literal by doubling single quotes.
#[must_use]
pub fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Reverses [`escape`].
#[must_use]
pub fn unescape(value: &str) -> String {
    value.replace("''", "'")
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> std::result::Result<(), String> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!(
                "expected '{expected}' at {}, found '{c}'",
                self.pos - c.len_utf8()
            )),
            None => Err(format!("expected '{expected}', found end of input")),
        }
    }

    fn ident(&mut self) -> std::result::Result<&'a str, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(format!("expected identifier at {start}"));
        }
        Ok(&self.input[start..self.pos])
    }

    fn quoted(&mut self) -> std::result::Result<String, String> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.bump();
                    out.push('\'');
                }
                Some('\'') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn number(&mut self) -> std::result::Result<i64, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| format!("invalid number at {start}"))
    }

    fn value(&mut self) -> std::result::Result<FilterValue, String> {
        match self.peek() {
            Some('\'') => self.quoted().map(FilterValue::Text),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number().map(FilterValue::Number),
            Some(_) => {
                let word = self.ident()?;
                self.expect('(')?;
                self.expect(')')?;
                match word {
                    "true" => Ok(FilterValue::Bool(true)),
                    "false" => Ok(FilterValue::Bool(false)),
                    other => Err(format!("unknown function '{other}()'")),
                }
            }
            None => Err("expected value, found end of input".to_string()),
        }
    }

    fn predicate(&mut self) -> std::result::Result<Vec<Condition>, String> {
        let mut conditions = Vec::new();
        loop {
            self.skip_ws();
            self.expect('@')?;
            let field = self.ident()?.to_string();
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.value()?;
            conditions.push(Condition { field, value });
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                return Ok(conditions);
            }
            let word = self.ident()?;
            if !word.eq_ignore_ascii_case("and") {
                return Err(format!("expected 'and', found '{word}'"));
            }
        }
    }
}

fn parse_segments(input: &str) -> std::result::Result<Vec<UrnSegment>, String> {
    let mut scanner = Scanner::new(input.trim());
    let mut segments = Vec::new();
    if scanner.at_end() {
        return Err("empty path".to_string());
    }
    loop {
        let type_name = scanner.ident()?.to_string();
        let predicate = if scanner.peek() == Some('[') {
            scanner.bump();
            scanner.predicate()?
        } else {
            Vec::new()
        };
        segments.push(UrnSegment {
            type_name,
            predicate,
        });
        match scanner.bump() {
            None => return Ok(segments),
            Some('/') => {}
            Some(c) => return Err(format!("unexpected '{c}' after segment")),
        }
    }
}
