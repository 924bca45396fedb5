//! Expressions evaluated against messages.
//!
//! An [`Expression`] is decided once, when configuration is built: it is either a literal constant or a dynamic
//! evaluator. The counter only ever calls [`Expression::evaluate`] and never needs to know which kind it holds.
//!
//! Dynamic expressions can come from anything implementing [`Evaluate`], or from the small built-in language parsed by
//! [`Expression::parse`]:
//!
//! - `'text'`, `"text"`, numbers, `true`, `false` and `null` are literals
//! - `payload` is the message payload, and `payload.field`, `payload['field']` and `payload[0]` navigate into it
//! - `headers.name` and `headers['name']` read message headers
//! - `#jsonPath(payload, '$..field')` runs a JSONPath query over the payload document
//! - `#length(...)` is the number of characters in text, elements in an array, or entries in an object

use std::{borrow::Cow, fmt, str::FromStr, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::message::{Message, Payload};

mod parser;
use self::parser::{Ast, Root, Segment};

mod path;
use self::path::JsonPath;

/// Errors that could occur while parsing an expression.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid expression `{expression}` at offset {offset}: {reason}")]
pub struct ParseError {
    expression: String,
    offset: usize,
    reason: String,
}

impl ParseError {
    pub(crate) fn new(expression: &str, offset: usize, reason: &str) -> Self {
        ParseError { expression: expression.to_owned(), offset, reason: reason.to_owned() }
    }

    /// The byte offset in the expression at which parsing failed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Why parsing failed.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors that could occur while evaluating an expression against a message.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The payload had to be read as a JSON document but was not valid JSON.
    #[error("payload is not a valid JSON document: {0}")]
    Decode(#[from] serde_json::Error),

    /// The payload had to be read as text but the bytes were not valid UTF-8.
    #[error("payload bytes are not valid UTF-8")]
    NotUtf8,

    /// An object payload was used where a whole value is required.
    #[error("object payloads only support named property access")]
    OpaqueObject,

    /// A custom evaluator failed.
    #[error("{0}")]
    Custom(Cow<'static, str>),
}

impl EvaluationError {
    /// Creates an error for a custom evaluator failure.
    pub fn custom<M>(message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        EvaluationError::Custom(message.into())
    }
}

/// Evaluates against a message to produce a value.
///
/// The resulting value may be a scalar, an array, or `null`.
pub trait Evaluate: fmt::Debug + Send + Sync {
    /// Evaluates against the given message.
    ///
    /// # Errors
    ///
    /// If the message cannot be evaluated, an error describing why is returned.
    fn evaluate(&self, message: &Message) -> Result<Value, EvaluationError>;
}

/// An expression evaluated against each message.
#[derive(Clone, Debug)]
pub enum Expression {
    /// A constant value.
    Literal(Value),

    /// A value computed from the message.
    Dynamic(Arc<dyn Evaluate>),
}

impl Expression {
    /// Creates a literal expression.
    pub fn literal<V>(value: V) -> Self
    where
        V: Into<Value>,
    {
        Expression::Literal(value.into())
    }

    /// Creates a dynamic expression from the given evaluator.
    pub fn dynamic<E>(evaluator: E) -> Self
    where
        E: Evaluate + 'static,
    {
        Expression::Dynamic(Arc::new(evaluator))
    }

    /// Parses an expression in the built-in expression language.
    ///
    /// Constant expressions become [`Expression::Literal`], everything else becomes [`Expression::Dynamic`].
    ///
    /// # Errors
    ///
    /// If the expression is not valid, an error describing where and why is returned.
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        Ok(match parser::parse(expression)? {
            Ast::Literal(value) => Expression::Literal(value),
            ast => Expression::dynamic(Compiled { source: expression.trim().to_owned(), ast }),
        })
    }

    /// Evaluates the expression against the given message.
    ///
    /// # Errors
    ///
    /// Literal expressions never fail. Dynamic expressions fail if the message cannot be evaluated.
    pub fn evaluate(&self, message: &Message) -> Result<Value, EvaluationError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Dynamic(evaluator) => evaluator.evaluate(message),
        }
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

/// An expression compiled from the built-in expression language.
struct Compiled {
    source: String,
    ast: Ast,
}

impl fmt::Debug for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Compiled").field(&self.source).finish()
    }
}

impl Evaluate for Compiled {
    fn evaluate(&self, message: &Message) -> Result<Value, EvaluationError> {
        eval(&self.ast, message)
    }
}

fn eval(ast: &Ast, message: &Message) -> Result<Value, EvaluationError> {
    match ast {
        Ast::Literal(value) => Ok(value.clone()),
        Ast::Access { root, segments } => access(message, *root, segments),
        Ast::JsonPath { root, path } => json_path(message, *root, path),
        Ast::Length(inner) => Ok(length(&eval(inner, message)?)),
    }
}

// Characters in text, elements in arrays, entries in objects. Anything else has no length.
fn length(value: &Value) -> Value {
    let length = match value {
        Value::String(text) => text.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields.len(),
        _ => return Value::Null,
    };
    Value::from(length)
}

fn access(message: &Message, root: Root, segments: &[Segment]) -> Result<Value, EvaluationError> {
    let (first, rest) = match segments.split_first() {
        Some((first, rest)) => (first, rest),
        None => return whole(message, root),
    };

    let start = match (root, message.payload(), first) {
        (Root::Payload, Payload::Object(object), Segment::Field(name)) => {
            object.property(name).unwrap_or(Value::Null)
        }
        (Root::Payload, Payload::Object(_), Segment::Index(_)) => Value::Null,
        (Root::Payload, Payload::Bytes(_) | Payload::Json(_), segment) => {
            message.document()?.map_or(Value::Null, |document| navigate(document, segment))
        }
        (Root::Headers, _, Segment::Field(name)) => message.header(name).cloned().unwrap_or(Value::Null),
        (Root::Headers, _, Segment::Index(_)) => Value::Null,
        (Root::Payload, _, segment) => navigate(&whole(message, root)?, segment),
    };

    Ok(rest.iter().fold(start, |value, segment| navigate(&value, segment)))
}

fn navigate(value: &Value, segment: &Segment) -> Value {
    let next = match segment {
        Segment::Field(name) => value.as_object().and_then(|fields| fields.get(name)),
        Segment::Index(index) => value.as_array().and_then(|items| items.get(*index)),
    };
    next.cloned().unwrap_or(Value::Null)
}

// The root as a single value, without any navigation.
fn whole(message: &Message, root: Root) -> Result<Value, EvaluationError> {
    match root {
        Root::Headers => Ok(Value::Object(
            message.headers().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        Root::Payload => match message.payload() {
            Payload::Text(text) => Ok(Value::String(text.clone())),
            Payload::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(|text| Value::String(text.to_owned()))
                .map_err(|_| EvaluationError::NotUtf8),
            Payload::Json(value) => Ok(value.clone()),
            Payload::Object(_) => Err(EvaluationError::OpaqueObject),
        },
    }
}

// JSONPath queries always work on a document: text and bytes payloads are decoded first.
fn json_path(message: &Message, root: Root, path: &JsonPath) -> Result<Value, EvaluationError> {
    match root {
        Root::Payload => match message.document()? {
            Some(document) => Ok(path.query(document)),
            None => Err(EvaluationError::OpaqueObject),
        },
        Root::Headers => Ok(path.query(&whole(message, root)?)),
    }
}
