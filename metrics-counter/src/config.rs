use std::{collections::BTreeMap, fs, io, path::Path};

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::expression::ParseError;

/// Counter name used when neither a name nor a name expression is configured.
pub const DEFAULT_COUNTER_NAME: &str = "counts";

/// Errors that could occur while loading or validating counter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Both a name and a name expression were configured.
    #[error("'name' and 'name-expression' are mutually exclusive")]
    ConflictingName,

    /// The configured counter name was blank.
    #[error("counter name must not be blank")]
    BlankName,

    /// An expression could not be parsed.
    #[error("invalid '{option}': {source}")]
    Expression {
        /// The configuration option holding the expression.
        option: String,

        /// Why the expression is invalid.
        source: ParseError,
    },
}

/// Declarative counter configuration.
///
/// The layout follows the option tree the counter has always been configured with:
///
/// ```yaml
/// name: books
/// message-counter-enabled: true
/// tag:
///   fixed:
///     region: eu
///   expression:
///     category: "#jsonPath(payload, '$..category')"
///   fields:
///     - author
/// ```
///
/// Expressions are kept as source text here and are parsed when the configuration is turned into a
/// [`CounterBuilder`][crate::CounterBuilder].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CounterConfig {
    /// Name used when neither `name` nor `name-expression` is set.
    pub default_name: String,

    /// Literal name of the counter to increment.
    pub name: Option<String>,

    /// Expression, evaluated against each message, that produces the name of the counter to increment.
    pub name_expression: Option<String>,

    /// Whether to also increment a `message.<name>` counter once per message.
    pub message_counter_enabled: bool,

    /// Whether the message counter carries a `counterType=message` tag.
    pub message_counter_tag: bool,

    /// Expression producing the amount to increment tagged counters by, instead of one.
    pub amount_expression: Option<String>,

    /// Fixed and computed tags.
    pub tag: TagConfig,
}

impl Default for CounterConfig {
    fn default() -> Self {
        CounterConfig {
            default_name: DEFAULT_COUNTER_NAME.to_owned(),
            name: None,
            name_expression: None,
            message_counter_enabled: true,
            message_counter_tag: false,
            amount_expression: None,
            tag: TagConfig::default(),
        }
    }
}

/// Tag configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TagConfig {
    /// Tags attached to every increment.
    pub fixed: BTreeMap<String, String>,

    /// Tags computed by evaluating an expression against each message.
    pub expression: IndexMap<String, String>,

    /// Payload fields whose values become tags.
    pub fields: Vec<String>,
}

impl CounterConfig {
    /// Parses configuration from a YAML document.
    ///
    /// # Errors
    ///
    /// If the document is not valid YAML, or holds unknown options, an error is returned.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, an error is returned.
    pub fn from_path<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}
