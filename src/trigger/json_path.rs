//! JSON path expressions used to address fields in record payloads.
//!
//! The supported language is the common subset of JSON path:
//! - `$` — root element
//! - `.key` — object member access
//! - `['key']` / `["key"]` — quoted member access
//! - `[n]` — array element by index (negative counts from the end)
//! - `[*]` — every array element, or every member value of an object

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::JsonPathError;

/// A single step in a compiled path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Object member access.
    Member(String),
    /// Array element by index.
    Index(i64),
    /// All children.
    Wildcard,
}

/// A compiled JSON path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    steps: Vec<PathStep>,
}

impl JsonPath {
    /// Compiles a path string.
    ///
    /// # Errors
    ///
    /// Returns a [`JsonPathError`] describing the first syntax problem found.
    pub fn compile(path: &str) -> Result<Self, JsonPathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(JsonPathError::Empty);
        }

        let chars: Vec<char> = trimmed.chars().collect();
        if chars[0] != '$' {
            return Err(JsonPathError::MissingRoot);
        }

        let mut steps = Vec::new();
        let mut pos = 1;

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    let start = pos;
                    while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                        pos += 1;
                    }
                    if pos == start {
                        return Err(JsonPathError::EmptyMember { position: start });
                    }
                    let name: String = chars[start..pos].iter().collect();
                    if name == "*" {
                        steps.push(PathStep::Wildcard);
                    } else {
                        steps.push(PathStep::Member(name));
                    }
                }
                '[' => {
                    let open = pos;
                    pos += 1;
                    let start = pos;
                    let mut quote: Option<char> = None;
                    while pos < chars.len() {
                        let c = chars[pos];
                        match quote {
                            Some(q) if c == q => quote = None,
                            Some(_) => {}
                            None if c == '\'' || c == '"' => quote = Some(c),
                            None if c == ']' => break,
                            None => {}
                        }
                        pos += 1;
                    }
                    if pos >= chars.len() {
                        return Err(JsonPathError::UnclosedBracket { position: open });
                    }
                    let selector: String = chars[start..pos].iter().collect();
                    steps.push(parse_selector(selector.trim())?);
                    pos += 1;
                }
                c => {
                    return Err(JsonPathError::UnexpectedChar { found: c, position: pos });
                }
            }
        }

        Ok(Self {
            source: trimmed.to_string(),
            steps,
        })
    }

    /// The expression this path was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Compiled steps, root excluded.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Returns every value the path selects, in document order.
    #[must_use]
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];

        for step in &self.steps {
            let mut next = Vec::new();
            for value in current {
                match (step, value) {
                    (PathStep::Member(name), Value::Object(map)) => {
                        if let Some(v) = map.get(name) {
                            next.push(v);
                        }
                    }
                    (PathStep::Index(idx), Value::Array(items)) => {
                        if let Some(v) = resolve_index(*idx, items.len()).and_then(|i| items.get(i)) {
                            next.push(v);
                        }
                    }
                    (PathStep::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (PathStep::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    _ => {}
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }

        current
    }

    /// Returns the first value the path selects.
    #[must_use]
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.select(root).into_iter().next()
    }
}

impl FromStr for JsonPath {
    type Err = JsonPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_selector(selector: &str) -> Result<PathStep, JsonPathError> {
    if selector == "*" {
        return Ok(PathStep::Wildcard);
    }

    let quoted = |q: char| selector.len() >= 2 && selector.starts_with(q) && selector.ends_with(q);
    if quoted('\'') || quoted('"') {
        let name = &selector[1..selector.len() - 1];
        if name.is_empty() {
            return Err(JsonPathError::InvalidSelector {
                selector: selector.to_string(),
            });
        }
        return Ok(PathStep::Member(name.to_string()));
    }

    selector
        .parse::<i64>()
        .map(PathStep::Index)
        .map_err(|_| JsonPathError::InvalidSelector {
            selector: selector.to_string(),
        })
}

fn resolve_index(idx: i64, len: usize) -> Option<usize> {
    if idx >= 0 {
        usize::try_from(idx).ok()
    } else {
        let back = usize::try_from(idx.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}
