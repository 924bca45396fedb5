use std::{collections::BTreeMap, sync::Arc};

use indexmap::IndexMap;
use metrics::Recorder;

use crate::{
    config::{ConfigError, CounterConfig, DEFAULT_COUNTER_NAME},
    expression::Expression,
    extract::has_text,
    service::{CounterService, NameSource, ServiceConfiguration},
    tags::TagSet,
};

/// Builder for a [`CounterService`].
pub struct CounterBuilder {
    default_name: String,
    name: Option<String>,
    name_expression: Option<Expression>,
    message_counter: bool,
    message_counter_tag: bool,
    amount_expression: Option<Expression>,
    fixed_tags: BTreeMap<String, String>,
    tag_expressions: IndexMap<String, Expression>,
    tag_fields: Vec<String>,
    recorders: Vec<Arc<dyn Recorder + Send + Sync>>,
}

impl CounterBuilder {
    /// Creates a builder from declarative configuration.
    ///
    /// # Errors
    ///
    /// If any of the configured expressions cannot be parsed, an error is returned naming the option it came from.
    pub fn from_config(config: CounterConfig) -> Result<Self, ConfigError> {
        let parse = |option: String, source: &str| {
            Expression::parse(source).map_err(|source| ConfigError::Expression { option, source })
        };

        let mut builder = CounterBuilder::default()
            .with_default_name(config.default_name)
            .with_message_counter(config.message_counter_enabled)
            .with_message_counter_tag(config.message_counter_tag);

        if let Some(name) = config.name {
            builder = builder.with_name(name);
        }
        if let Some(source) = config.name_expression {
            builder = builder.with_name_expression(parse("name-expression".to_owned(), &source)?);
        }
        if let Some(source) = config.amount_expression {
            builder = builder.with_amount_expression(parse("amount-expression".to_owned(), &source)?);
        }
        for (key, value) in config.tag.fixed {
            builder = builder.with_fixed_tag(key, value);
        }
        for (tag, source) in config.tag.expression {
            let expression = parse(format!("tag.expression.{tag}"), &source)?;
            builder = builder.with_tag_expression(tag, expression);
        }
        for field in config.tag.fields {
            builder = builder.with_tag_field(field);
        }

        Ok(builder)
    }

    /// Sets the counter name used when neither a name nor a name expression is set.
    ///
    /// Defaults to `counts`.
    #[must_use]
    pub fn with_default_name<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.default_name = name.into();
        self
    }

    /// Sets the literal name of the counter to increment.
    ///
    /// Mutually exclusive with [`with_name_expression`][Self::with_name_expression].
    #[must_use]
    pub fn with_name<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.name = Some(name.into());
        self
    }

    /// Sets an expression that computes the name of the counter to increment from each message.
    ///
    /// The expression must produce text (or a number or boolean, which are converted to text).
    ///
    /// Mutually exclusive with [`with_name`][Self::with_name].
    #[must_use]
    pub fn with_name_expression(mut self, expression: Expression) -> Self {
        self.name_expression = Some(expression);
        self
    }

    /// Sets whether a `message.<name>` counter is incremented once for every message.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_message_counter(mut self, enabled: bool) -> Self {
        self.message_counter = enabled;
        self
    }

    /// Sets whether the message counter carries a `counterType=message` tag, on top of the fixed tags.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_message_counter_tag(mut self, enabled: bool) -> Self {
        self.message_counter_tag = enabled;
        self
    }

    /// Sets an expression that computes how much to increment the tagged counters by for each message.
    ///
    /// The expression must produce a non-negative whole number. The message counter is always incremented by one.
    ///
    /// Defaults to incrementing by one.
    #[must_use]
    pub fn with_amount_expression(mut self, expression: Expression) -> Self {
        self.amount_expression = Some(expression);
        self
    }

    /// Adds a tag attached to every increment.
    ///
    /// Tags with a blank key or value are ignored.
    #[must_use]
    pub fn with_fixed_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fixed_tags.insert(key.into(), value.into());
        self
    }

    /// Adds a tag whose values are computed by evaluating an expression against each message.
    ///
    /// An expression producing an array yields one value per non-blank element, and each value ends up on a separate
    /// increment.
    #[must_use]
    pub fn with_tag_expression<K>(mut self, tag: K, expression: Expression) -> Self
    where
        K: Into<String>,
    {
        self.tag_expressions.insert(tag.into(), expression);
        self
    }

    /// Adds a payload field whose values become a tag of the same name.
    ///
    /// A field holding an array yields one value per non-blank element, and each value ends up on a separate
    /// increment.
    #[must_use]
    pub fn with_tag_field<F>(mut self, field: F) -> Self
    where
        F: Into<String>,
    {
        self.tag_fields.push(field.into());
        self
    }

    /// Adds a recorder that increments are sent to.
    ///
    /// Every increment is sent to every added recorder, in the order they were added. When no recorder is added,
    /// increments go to the recorder installed for the current scope: a local recorder if one is set, otherwise the
    /// global recorder.
    #[must_use]
    pub fn add_recorder<R>(mut self, recorder: R) -> Self
    where
        R: Recorder + Send + Sync + 'static,
    {
        self.recorders.push(Arc::new(recorder));
        self
    }

    /// Builds the counter service.
    ///
    /// # Errors
    ///
    /// If both a name and a name expression are set, or the resulting literal name is blank, an error is returned.
    pub fn build(self) -> Result<CounterService, ConfigError> {
        let name = match (self.name, self.name_expression) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingName),
            (None, Some(expression)) => NameSource::Expression(expression),
            (name, None) => {
                let name = name.unwrap_or(self.default_name);
                if !has_text(&name) {
                    return Err(ConfigError::BlankName);
                }
                NameSource::Literal(name)
            }
        };

        Ok(CounterService::new(ServiceConfiguration {
            name,
            message_counter: self.message_counter,
            message_counter_tag: self.message_counter_tag,
            amount: self.amount_expression,
            fixed_tags: TagSet::fixed(&self.fixed_tags),
            tag_expressions: self.tag_expressions.into_iter().collect(),
            tag_fields: self.tag_fields,
            recorders: self.recorders,
        }))
    }
}

impl Default for CounterBuilder {
    fn default() -> Self {
        CounterBuilder {
            default_name: DEFAULT_COUNTER_NAME.to_owned(),
            name: None,
            name_expression: None,
            message_counter: true,
            message_counter_tag: false,
            amount_expression: None,
            fixed_tags: BTreeMap::new(),
            tag_expressions: IndexMap::new(),
            tag_fields: Vec::new(),
            recorders: Vec::new(),
        }
    }
}
