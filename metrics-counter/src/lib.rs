//! A message-processing stage that increments [`metrics`] counters as messages pass through it.
//!
//! Counter names and tags are derived from each message: the name can be fixed or computed by an expression, and tags
//! can be fixed, computed by expressions, or read from payload fields. A single message can produce several
//! increments when a tag expression or field yields more than one value.
//!
//! # Usage
//!
//! ```
//! # use metrics_counter::{CounterBuilder, Expression, Message};
//! let service = CounterBuilder::default()
//!     .with_name("orders")
//!     .with_fixed_tag("region", "eu")
//!     .with_tag_expression("status", Expression::parse("payload.status").expect("valid expression"))
//!     .with_tag_field("items")
//!     .build()
//!     .expect("valid configuration");
//!
//! // With no recorders added, increments go to the globally installed recorder.
//! let message = Message::new(br#"{"status": "paid", "items": ["book", "pen"]}"#.to_vec());
//! let message = service.count(message).expect("message should be counted");
//! ```
//!
//! The example above increments:
//!
//! - `message.orders{region=eu}` once
//! - `orders{region=eu,status=paid,items=book}` once
//!
//! The second `items` value has no matching `status` value at the same position, so it is not counted.
//!
//! # Configuration
//!
//! The same options can be loaded from YAML with [`CounterConfig`], and turned into a builder with
//! [`CounterBuilder::from_config`].
//!
//! # Stages
//!
//! [`CounterSink`] and [`CounterProcessor`] wrap the service as pipeline stages that can run on their own thread,
//! reading messages from a channel.

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::CounterBuilder;

mod config;
pub use self::config::{ConfigError, CounterConfig, TagConfig, DEFAULT_COUNTER_NAME};

mod expression;
pub use self::expression::{EvaluationError, Evaluate, Expression, ParseError};

mod extract;

mod message;
pub use self::message::{Message, Payload, PropertyAccess, Serialized};

mod service;
pub use self::service::{
    CountError, CounterService, COUNTER_TYPE_TAG, MESSAGE_COUNTER_PREFIX, MESSAGE_COUNTER_TYPE,
};

pub mod stage;
pub use self::stage::{CounterProcessor, CounterSink, ErrorPolicy, StageError, StageSummary};

mod tags;
