use std::sync::Arc;

use metrics::{Key, Level, Metadata, Recorder};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::{
    expression::{EvaluationError, Expression},
    extract::{has_text, read_field, to_values},
    message::Message,
    tags::{TagGroups, TagSet},
};

/// Prefix of the counter incremented once for every message.
pub const MESSAGE_COUNTER_PREFIX: &str = "message.";

/// Tag key marking the kind of counter.
pub const COUNTER_TYPE_TAG: &str = "counterType";

/// Value of [`COUNTER_TYPE_TAG`] on message counters.
pub const MESSAGE_COUNTER_TYPE: &str = "message";

static METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Errors that could occur while counting a message.
///
/// None of these are about missing data: fields that are absent, and expressions that produce nothing, simply
/// contribute no tags. These errors mean the message could not be fully counted: apart from name errors, the message
/// counter has already been incremented when they are returned.
#[derive(Debug, Error)]
pub enum CountError {
    /// The name expression failed to evaluate.
    #[error("failed to evaluate counter name: {0}")]
    Name(#[source] EvaluationError),

    /// The name expression produced something that is not text.
    #[error("counter name expression produced {value}, which is not usable as a counter name")]
    NameNotText {
        /// The value produced by the name expression.
        value: Value,
    },

    /// A tag expression failed to evaluate.
    #[error("failed to evaluate tag '{tag}': {source}")]
    Tag {
        /// The tag whose expression failed.
        tag: String,

        /// Why evaluation failed.
        source: EvaluationError,
    },

    /// A tag field could not be read because the payload could not be decoded.
    #[error("failed to read field '{field}': {source}")]
    Field {
        /// The field being read.
        field: String,

        /// Why decoding failed.
        source: serde_json::Error,
    },

    /// The amount expression failed to evaluate.
    #[error("failed to evaluate amount: {0}")]
    Amount(#[source] EvaluationError),

    /// The amount expression produced something that is not a non-negative whole number.
    #[error("amount expression produced {value}, which is not a non-negative whole number")]
    AmountNotCountable {
        /// The value produced by the amount expression.
        value: Value,
    },
}

/// Where the counter name comes from.
#[derive(Clone, Debug)]
pub(crate) enum NameSource {
    Literal(String),
    Expression(Expression),
}

/// Validated, immutable counter configuration.
pub(crate) struct ServiceConfiguration {
    pub name: NameSource,
    pub message_counter: bool,
    pub message_counter_tag: bool,
    pub amount: Option<Expression>,
    pub fixed_tags: TagSet,
    pub tag_expressions: Vec<(String, Expression)>,
    pub tag_fields: Vec<String>,
    pub recorders: Vec<Arc<dyn Recorder + Send + Sync>>,
}

/// Increments counters derived from the messages passing through it.
///
/// For every message, the service:
///
/// - computes the counter name, either literally or from the name expression
/// - increments `message.<name>` once, carrying the fixed tags, if the message counter is enabled
/// - groups the tag values produced by the tag expressions and tag fields by tag name
/// - increments `<name>` once per index across those groups, carrying the fixed tags plus the value each group holds at
///   that index, skipping any index where a group has no usable value
///
/// Counting is a side effect: messages are never modified. The service holds no per-message state, and can be shared
/// freely between threads.
///
/// Created with [`CounterBuilder`][crate::CounterBuilder].
pub struct CounterService {
    config: ServiceConfiguration,
}

impl CounterService {
    pub(crate) fn new(config: ServiceConfiguration) -> Self {
        CounterService { config }
    }

    /// Counts the message, and hands it back unchanged.
    ///
    /// # Errors
    ///
    /// If the counter name, a tag expression, or the amount cannot be evaluated, or a tag field cannot be read because
    /// the payload is not valid JSON, an error is returned. A message whose name could not be computed counts nothing.
    /// Otherwise the message counter has already been incremented, and only the tagged counters are skipped.
    pub fn count(&self, message: Message) -> Result<Message, CountError> {
        self.record(&message)?;
        Ok(message)
    }

    /// Counts the message.
    ///
    /// This is the same as [`count`][Self::count], for callers that want to keep hold of the message regardless of
    /// the outcome.
    ///
    /// # Errors
    ///
    /// See [`count`][Self::count].
    pub fn record(&self, message: &Message) -> Result<(), CountError> {
        let name = self.counter_name(message)?;

        // Arrival is counted before any tag is computed.
        if self.config.message_counter {
            let mut tags = self.config.fixed_tags.clone();
            if self.config.message_counter_tag {
                tags.insert(COUNTER_TYPE_TAG, MESSAGE_COUNTER_TYPE);
            }
            self.increment(format!("{MESSAGE_COUNTER_PREFIX}{name}"), &tags, 1);
        }

        let mut groups = self.expression_groups(message)?;
        groups.merge(self.field_groups(message)?);

        let tag_sets = groups.fan_out(&self.config.fixed_tags);
        let amount = match &self.config.amount {
            Some(expression) if !tag_sets.is_empty() => amount(expression, message)?,
            _ => 1,
        };

        for tags in &tag_sets {
            self.increment(name.clone(), tags, amount);
        }

        Ok(())
    }

    fn counter_name(&self, message: &Message) -> Result<String, CountError> {
        let expression = match &self.config.name {
            NameSource::Literal(name) => return Ok(name.clone()),
            NameSource::Expression(expression) => expression,
        };

        match expression.evaluate(message).map_err(CountError::Name)? {
            Value::String(name) if has_text(&name) => Ok(name),
            value @ (Value::Number(_) | Value::Bool(_)) => Ok(value.to_string()),
            value => Err(CountError::NameNotText { value }),
        }
    }

    fn expression_groups(&self, message: &Message) -> Result<TagGroups, CountError> {
        let mut groups = TagGroups::default();
        for (tag, expression) in &self.config.tag_expressions {
            let value = expression
                .evaluate(message)
                .map_err(|source| CountError::Tag { tag: tag.clone(), source })?;
            groups.extend(tag.as_str(), to_values(value));
        }
        Ok(groups)
    }

    fn field_groups(&self, message: &Message) -> Result<TagGroups, CountError> {
        let mut groups = TagGroups::default();
        for field in &self.config.tag_fields {
            let value = read_field(message, field)
                .map_err(|source| CountError::Field { field: field.clone(), source })?;
            groups.extend(field.as_str(), to_values(value));
        }
        Ok(groups)
    }

    fn increment(&self, name: String, tags: &TagSet, amount: u64) {
        let key = Key::from_parts(name, tags.to_labels());
        trace!(counter = key.name(), amount, "Incrementing counter.");

        if self.config.recorders.is_empty() {
            metrics::with_recorder(|recorder| recorder.register_counter(&key, &METADATA).increment(amount));
        } else {
            for recorder in &self.config.recorders {
                recorder.register_counter(&key, &METADATA).increment(amount);
            }
        }
    }
}

fn amount(expression: &Expression, message: &Message) -> Result<u64, CountError> {
    let value = expression.evaluate(message).map_err(CountError::Amount)?;
    let amount = match &value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64).map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    amount.ok_or(CountError::AmountNotCountable { value })
}
