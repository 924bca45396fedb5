//! A small JSONPath dialect used by the `#jsonPath(...)` expression function.
//!
//! Supported syntax: the `$` root, `.name` and `['name']` child access, `[n]` array indexing, `[*]` / `.*` wildcards,
//! and `..name` / `..*` recursive descent.
//!
//! A path that only uses child access and indexing is "definite" and resolves to a single value, or `null` when nothing
//! matches. Any wildcard or recursive descent makes the path indefinite, and it resolves to an array of every match in
//! document order.

use serde_json::Value;

use super::ParseError;

#[derive(Clone, Debug, PartialEq)]
enum Step {
    Child(String),
    Index(usize),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
}

impl Step {
    fn is_definite(&self) -> bool {
        matches!(self, Step::Child(_) | Step::Index(_))
    }
}

/// A parsed JSONPath.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct JsonPath {
    steps: Vec<Step>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<JsonPath, ParseError> {
        let invalid = |offset: usize, reason: &str| ParseError::new(path, offset, reason);

        let chars = path.char_indices().collect::<Vec<_>>();
        let at = |i: usize| chars.get(i).map(|(_, c)| *c);
        let offset = |i: usize| chars.get(i).map_or(path.len(), |(o, _)| *o);

        if at(0) != Some('$') {
            return Err(invalid(0, "path must start with `$`"));
        }

        let mut steps = Vec::new();
        let mut i = 1;
        while i < chars.len() {
            match at(i) {
                Some('.') if at(i + 1) == Some('.') => {
                    i += 2;
                    if at(i) == Some('*') {
                        steps.push(Step::DescendantWildcard);
                        i += 1;
                    } else {
                        let start = i;
                        while at(i).is_some_and(is_name_char) {
                            i += 1;
                        }
                        if start == i {
                            return Err(invalid(offset(i), "expected a field name after `..`"));
                        }
                        steps.push(Step::Descendant(collect(&chars[start..i])));
                    }
                }
                Some('.') => {
                    i += 1;
                    if at(i) == Some('*') {
                        steps.push(Step::Wildcard);
                        i += 1;
                    } else {
                        let start = i;
                        while at(i).is_some_and(is_name_char) {
                            i += 1;
                        }
                        if start == i {
                            return Err(invalid(offset(i), "expected a field name after `.`"));
                        }
                        steps.push(Step::Child(collect(&chars[start..i])));
                    }
                }
                Some('[') => {
                    i += 1;
                    match at(i) {
                        Some('*') => {
                            steps.push(Step::Wildcard);
                            i += 1;
                        }
                        Some(quote @ ('\'' | '"')) => {
                            i += 1;
                            let start = i;
                            while at(i).is_some_and(|c| c != quote) {
                                i += 1;
                            }
                            if at(i).is_none() {
                                return Err(invalid(offset(start), "unterminated quoted field name"));
                            }
                            steps.push(Step::Child(collect(&chars[start..i])));
                            i += 1;
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let start = i;
                            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                                i += 1;
                            }
                            let index = collect(&chars[start..i])
                                .parse()
                                .map_err(|_| invalid(offset(start), "array index out of range"))?;
                            steps.push(Step::Index(index));
                        }
                        _ => return Err(invalid(offset(i), "expected `*`, a quoted name or an index")),
                    }
                    if at(i) != Some(']') {
                        return Err(invalid(offset(i), "expected `]`"));
                    }
                    i += 1;
                }
                _ => return Err(invalid(offset(i), "expected `.`, `..` or `[`")),
            }
        }

        Ok(JsonPath { steps })
    }

    /// Whether the path always resolves to at most one value.
    pub fn is_definite(&self) -> bool {
        self.steps.iter().all(Step::is_definite)
    }

    /// Resolves the path against the given document.
    pub fn query(&self, document: &Value) -> Value {
        let mut current = vec![document];
        for step in &self.steps {
            let mut next = Vec::new();
            for node in current {
                apply(step, node, &mut next);
            }
            current = next;
        }

        if self.is_definite() {
            current.first().map_or(Value::Null, |v| (*v).clone())
        } else {
            Value::Array(current.into_iter().cloned().collect())
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '$' || c == '@'
}

fn collect(chars: &[(usize, char)]) -> String {
    chars.iter().map(|(_, c)| *c).collect()
}

fn apply<'a>(step: &Step, node: &'a Value, out: &mut Vec<&'a Value>) {
    match step {
        Step::Child(name) => {
            if let Some(value) = node.as_object().and_then(|fields| fields.get(name)) {
                out.push(value);
            }
        }
        Step::Index(index) => {
            if let Some(value) = node.as_array().and_then(|items| items.get(*index)) {
                out.push(value);
            }
        }
        Step::Wildcard => children(node, out),
        Step::Descendant(name) => descend(node, &mut |value| {
            if let Some(found) = value.as_object().and_then(|fields| fields.get(name)) {
                out.push(found);
            }
        }),
        Step::DescendantWildcard => descend(node, &mut |value| children(value, out)),
    }
}

fn children<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(fields) => out.extend(fields.values()),
        Value::Array(items) => out.extend(items.iter()),
        _ => {}
    }
}

// Visits the node and then every nested value below it, depth first.
fn descend<'a, F>(node: &'a Value, visit: &mut F)
where
    F: FnMut(&'a Value),
{
    visit(node);
    match node {
        Value::Object(fields) => fields.values().for_each(|child| descend(child, visit)),
        Value::Array(items) => items.iter().for_each(|child| descend(child, visit)),
        _ => {}
    }
}
