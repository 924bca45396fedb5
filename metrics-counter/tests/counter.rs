use std::{sync::Arc, thread};

use metrics_counter::{
    ConfigError, CountError, CounterBuilder, CounterConfig, CounterService, Expression, Message, Payload,
    Serialized,
};
use metrics_util::{
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
    MetricKind,
};
use serde::Serialize;
use serde_json::json;

const BOOK_STORE: &str = r#"{ "store": {
    "book": [
      { "category": "reference", "author": "Nigel Rees", "title": "Sayings of the Century", "price": 8.95 },
      { "category": "fiction", "author": "Evelyn Waugh", "title": "Sword of Honour", "price": 12.99 },
      { "category": "fiction", "author": "Herman Melville", "title": "Moby Dick", "isbn": "0-553-21311-3", "price": 8.99 },
      { "category": "fiction", "author": "J. R. R. Tolkien", "title": "The Lord of the Rings", "isbn": "0-395-19395-8", "price": 22.99 },
      { "category": "fiction", "author": "J. R. R. Tolkien", "title": "The Hobbit", "isbn": "0-395-19395-8", "price": 22.99 }
    ],
    "bicycle": { "color": "red", "price": 19.95 }
  }
}"#;

/// A counter as seen by the recorder: name, tags sorted by key, and value.
#[derive(Debug, PartialEq)]
struct Observed {
    name: String,
    tags: Vec<(String, String)>,
    value: u64,
}

fn observe(snapshotter: &Snapshotter) -> Vec<Observed> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter)
        .map(|(key, _, _, value)| {
            let key = key.key();
            let mut tags = key
                .labels()
                .map(|label| (label.key().to_owned(), label.value().to_owned()))
                .collect::<Vec<_>>();
            tags.sort();
            let value = match value {
                DebugValue::Counter(value) => value,
                other => panic!("expected a counter value, got {other:?}"),
            };
            Observed { name: key.name().to_owned(), tags, value }
        })
        .collect()
}

fn setup(builder: CounterBuilder) -> (CounterService, Snapshotter) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let service = builder.add_recorder(recorder).build().expect("valid configuration");
    (service, snapshotter)
}

fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut tags = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect::<Vec<_>>();
    tags.sort();
    tags
}

/// Value of the counter with exactly the given name and tags.
fn value_of(observed: &[Observed], name: &str, pairs: &[(&str, &str)]) -> Option<u64> {
    let expected = tags(pairs);
    observed.iter().find(|c| c.name == name && c.tags == expected).map(|c| c.value)
}

/// All counters with the given name carrying the given tag key.
fn with_tag_key<'a>(observed: &'a [Observed], name: &str, key: &str) -> Vec<&'a Observed> {
    observed.iter().filter(|c| c.name == name && c.tags.iter().any(|(k, _)| k == key)).collect()
}

/// Sum over all counters with the given name carrying the given tag.
fn sum_with_tag(observed: &[Observed], name: &str, key: &str, value: &str) -> u64 {
    observed
        .iter()
        .filter(|c| c.name == name && c.tags.iter().any(|(k, v)| k == key && v == value))
        .map(|c| c.value)
        .sum()
}

fn expression(source: &str) -> Expression {
    Expression::parse(source).expect("valid expression")
}

fn json_bytes(json: &str) -> Message {
    Message::new(json.as_bytes().to_vec())
}

#[test]
fn plain_counter_name() {
    let (service, snapshotter) = setup(CounterBuilder::default().with_name("counter666"));

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(13));
    assert_eq!(observed.len(), 1, "no tags configured, so only the message counter fires");
}

#[test]
fn expression_counter_name() {
    let (service, snapshotter) = setup(CounterBuilder::default().with_name_expression(expression("payload")));

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    assert_eq!(value_of(&observe(&snapshotter), "message.hello", &[]), Some(13));
}

#[test]
fn numeric_counter_name() {
    let (service, snapshotter) =
        setup(CounterBuilder::default().with_name_expression(expression("headers.partition")));

    service.count(Message::new("x").with_header("partition", 7)).expect("message should be counted");

    assert_eq!(value_of(&observe(&snapshotter), "message.7", &[]), Some(1));
}

#[test]
fn default_counter_name() {
    let (service, snapshotter) = setup(CounterBuilder::default());
    service.count(Message::new("hello")).expect("message should be counted");
    assert_eq!(value_of(&observe(&snapshotter), "message.counts", &[]), Some(1));

    let (service, snapshotter) = setup(CounterBuilder::default().with_default_name("app"));
    service.count(Message::new("hello")).expect("message should be counted");
    assert_eq!(value_of(&observe(&snapshotter), "message.app", &[]), Some(1));
}

#[test]
fn fixed_tags() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_fixed_tag("foo", "bar")
            .with_fixed_tag("gork", "bork"),
    );

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    let observed = observe(&snapshotter);
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].name, "message.counter666");
    assert_eq!(observed[0].tags, tags(&[("foo", "bar"), ("gork", "bork")]));
    assert_eq!(observed[0].value, 13);
}

#[test]
fn message_counter_tag() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_fixed_tag("foo", "bar")
            .with_fixed_tag("gork", "bork")
            .with_message_counter_tag(true)
            .with_tag_expression("kind", expression("'plain'")),
    );

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    let observed = observe(&snapshotter);
    assert_eq!(
        value_of(&observed, "message.counter666", &[("foo", "bar"), ("gork", "bork"), ("counterType", "message")]),
        Some(13)
    );

    // The marker only applies to the message counter.
    assert_eq!(value_of(&observed, "counter666", &[("foo", "bar"), ("gork", "bork"), ("kind", "plain")]), Some(13));
}

#[test]
fn literal_tag_expressions_share_one_counter() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_expression("foo", expression("'bar'"))
            .with_tag_expression("gork", expression("'bork'")),
    );

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    let observed = observe(&snapshotter);
    let foo = with_tag_key(&observed, "counter666", "foo");
    let gork = with_tag_key(&observed, "counter666", "gork");
    assert_eq!(foo.len(), 1);
    assert_eq!(gork.len(), 1);
    assert_eq!(foo[0], gork[0]);
    assert_eq!(value_of(&observed, "counter666", &[("foo", "bar"), ("gork", "bork")]), Some(13));
}

#[test]
fn empty_tags_are_not_counted() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_fixed_tag("foo", "")
            .with_tag_field("noField")
            .with_tag_expression("tag666", expression("#jsonPath(payload, '$..noField')"))
            .with_tag_expression("test", expression("#jsonPath(payload, '$..test')")),
    );

    service.count(json_bytes(r#"{"test": "Bar"}"#)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert!(with_tag_key(&observed, "counter666", "foo").is_empty());
    assert!(with_tag_key(&observed, "counter666", "noField").is_empty());
    assert!(with_tag_key(&observed, "counter666", "tag666").is_empty());
    assert_eq!(with_tag_key(&observed, "counter666", "test").len(), 1);
    assert_eq!(value_of(&observed, "counter666", &[("test", "Bar")]), Some(1));
}

#[test]
fn null_tags_are_not_counted() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_fixed_tag("foo", "")
            .with_tag_expression("tag666", expression("#jsonPath(payload, '$..noField')"))
            .with_tag_expression("test", expression("#jsonPath(payload, '$..test')")),
    );

    service.count(json_bytes(r#"{"test": null}"#)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert!(with_tag_key(&observed, "counter666", "test").is_empty());
    assert!(with_tag_key(&observed, "counter666", "tag666").is_empty());
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(1));
}

#[test]
fn disabled_message_counter() {
    let (service, snapshotter) =
        setup(CounterBuilder::default().with_name("counter666").with_message_counter(false));

    for _ in 0..13 {
        service.count(Message::new("hello")).expect("message should be counted");
    }

    assert!(observe(&snapshotter).is_empty());
}

#[test]
fn field_values_from_json() {
    let (service, snapshotter) = setup(
        CounterBuilder::default().with_name("counter666").with_tag_field("test").with_tag_field("test2"),
    );

    service.count(json_bytes(r#"{"test": "Bar"}"#)).expect("message should be counted");
    service.count(json_bytes(r#"{"test": "Foo"}"#)).expect("message should be counted");
    service.count(json_bytes(r#"{"test": "Bar"}"#)).expect("message should be counted");
    service.count(json_bytes(r#"{"test2": ["Gork", "Gork", "Gork"]}"#)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "counter666", &[("test", "Foo")]), Some(1));
    assert_eq!(value_of(&observed, "counter666", &[("test", "Bar")]), Some(2));
    assert_eq!(value_of(&observed, "counter666", &[("test2", "Gork")]), Some(3));
}

#[test]
fn field_values_accumulate_across_scalars_and_arrays() {
    let (service, snapshotter) = setup(CounterBuilder::default().with_name("counter666").with_tag_field("test"));

    for value in ["Bar", "Foo", "Bar"] {
        service.count(Message::new(json!({ "test": value }))).expect("message should be counted");
    }
    service.count(Message::new(json!({ "test": ["Foo", "Bar", "Foo"] }))).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "counter666", &[("test", "Foo")]), Some(3));
    assert_eq!(value_of(&observed, "counter666", &[("test", "Bar")]), Some(3));
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(4));
}

#[test]
fn tag_expressions_over_json_documents() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("books")
            .with_tag_expression("category", expression("#jsonPath(payload, '$..category')"))
            .with_tag_expression("author", expression("#jsonPath(payload, '$..author')")),
    );

    service.count(json_bytes(BOOK_STORE)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(sum_with_tag(&observed, "books", "category", "reference"), 1);
    assert_eq!(sum_with_tag(&observed, "books", "category", "fiction"), 4);
    assert_eq!(sum_with_tag(&observed, "books", "author", "J. R. R. Tolkien"), 2);
    assert_eq!(
        value_of(&observed, "books", &[("category", "fiction"), ("author", "J. R. R. Tolkien")]),
        Some(2)
    );
}

#[derive(Debug, Serialize)]
struct TestPojoList {
    test: Vec<String>,
}

#[test]
fn field_values_from_objects() {
    let (service, snapshotter) = setup(CounterBuilder::default().with_name("counter666").with_tag_field("test"));

    let pojo = TestPojoList { test: vec!["Foo".into(), "Bar".into(), "Foo".into()] };
    service.count(Message::new(Payload::object(Serialized(pojo)))).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "counter666", &[("test", "Foo")]), Some(2));
    assert_eq!(value_of(&observed, "counter666", &[("test", "Bar")]), Some(1));
}

#[test]
fn field_tags_override_expression_tags() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_expression("test", expression("'from-expression'"))
            .with_tag_field("test"),
    );

    service.count(Message::new(json!({ "test": "from-field" }))).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "counter666", &[("test", "from-field")]), Some(1));
    assert!(observed.iter().all(|c| c.tags.iter().all(|(_, v)| v != "from-expression")));
}

#[test]
fn amount_expression() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_expression("foo", expression("'bar'"))
            .with_amount_expression(expression("payload.quantity")),
    );

    service.count(Message::new(json!({ "quantity": 19 }))).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(1));
    assert_eq!(value_of(&observed, "counter666", &[("foo", "bar")]), Some(19));
}

#[test]
fn amount_from_text_length() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_expression("foo", expression("'bar'"))
            .with_amount_expression(expression("#length(payload)")),
    );

    let text = "hello world message";
    service.count(Message::new(text)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(1));
    assert_eq!(value_of(&observed, "counter666", &[("foo", "bar")]), Some(text.len() as u64));
}

#[test]
fn wildcard_values_pair_in_document_order() {
    let (service, snapshotter) = setup(
        CounterBuilder::default()
            .with_name("c")
            .with_tag_expression("k", expression("#jsonPath(payload, '$.x.*')"))
            .with_tag_expression("p", expression("#jsonPath(payload, '$.y[*]')")),
    );

    service
        .count(json_bytes(r#"{"x": {"zeta": "first", "alpha": "second"}, "y": ["p0", "p1"]}"#))
        .expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "c", &[("k", "first"), ("p", "p0")]), Some(1));
    assert_eq!(value_of(&observed, "c", &[("k", "second"), ("p", "p1")]), Some(1));
    assert_eq!(with_tag_key(&observed, "c", "k").len(), 2);
}

#[test]
fn message_is_returned_unchanged() {
    let (service, _snapshotter) = setup(CounterBuilder::default().with_name("counter666").with_tag_field("test"));

    let message = json_bytes(r#"{"test": "Bar"}"#).with_header("id", "m-1");
    let returned = service.count(message.clone()).expect("message should be counted");

    assert_eq!(returned.headers(), message.headers());
    match (returned.payload(), message.payload()) {
        (Payload::Bytes(a), Payload::Bytes(b)) => assert_eq!(a, b),
        other => panic!("payload kind changed: {other:?}"),
    }
}

#[test]
fn every_recorder_sees_every_increment() {
    let first = DebuggingRecorder::new();
    let first_snapshotter = first.snapshotter();
    let second = DebuggingRecorder::new();
    let second_snapshotter = second.snapshotter();

    let service = CounterBuilder::default()
        .with_name("counter666")
        .with_tag_field("test")
        .add_recorder(first)
        .add_recorder(second)
        .build()
        .expect("valid configuration");

    service.count(Message::new(json!({ "test": ["a", "b"] }))).expect("message should be counted");

    let first = observe(&first_snapshotter);
    let second = observe(&second_snapshotter);
    assert_eq!(first.len(), 3);
    for counter in &first {
        assert_eq!(value_of(&second, &counter.name, &pairs(&counter.tags)), Some(counter.value));
    }
}

fn pairs(tags: &[(String, String)]) -> Vec<(&str, &str)> {
    tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

#[test]
fn local_recorder_is_used_without_recorders() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let service = CounterBuilder::default().with_name("counter666").build().expect("valid configuration");

    metrics::with_local_recorder(&recorder, || {
        service.count(Message::new("hello")).expect("message should be counted");
    });

    assert_eq!(value_of(&observe(&snapshotter), "message.counter666", &[]), Some(1));
}

#[test]
fn shared_between_threads() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let service = Arc::new(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_field("worker")
            .add_recorder(recorder)
            .build()
            .expect("valid configuration"),
    );

    let handles = (0..4)
        .map(|worker| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for _ in 0..100 {
                    service.count(Message::new(json!({ "worker": worker }))).expect("message should be counted");
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("worker should not panic");
    }

    let observed = observe(&snapshotter);
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(400));
    for worker in ["0", "1", "2", "3"] {
        assert_eq!(value_of(&observed, "counter666", &[("worker", worker)]), Some(100));
    }
}

#[test]
fn conflicting_names_fail_to_build() {
    let result = CounterBuilder::default().with_name("counter666").with_name_expression(expression("payload")).build();
    assert!(matches!(result, Err(ConfigError::ConflictingName)));

    let result = CounterBuilder::default().with_name("  ").build();
    assert!(matches!(result, Err(ConfigError::BlankName)));

    let result = CounterBuilder::default().with_default_name("").build();
    assert!(matches!(result, Err(ConfigError::BlankName)));
}

#[test]
fn name_errors_count_nothing() {
    let (service, snapshotter) =
        setup(CounterBuilder::default().with_name_expression(expression("#jsonPath(payload, '$..name')")));
    let result = service.count(Message::new(json!({ "name": "x" })));
    assert!(matches!(result, Err(CountError::NameNotText { .. })));

    let (decoding, decoding_snapshotter) =
        setup(CounterBuilder::default().with_name_expression(expression("payload.name")));
    let result = decoding.count(json_bytes("{ not json"));
    assert!(matches!(result, Err(CountError::Name(_))));

    assert!(observe(&snapshotter).is_empty());
    assert!(observe(&decoding_snapshotter).is_empty());
}

#[test]
fn tag_errors_still_count_arrival() {
    let (fields, fields_snapshotter) =
        setup(CounterBuilder::default().with_name("counter666").with_tag_field("test"));
    let result = fields.count(json_bytes("{ not json"));
    assert!(matches!(result, Err(CountError::Field { ref field, .. }) if field == "test"));

    let (tagged, tagged_snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_fixed_tag("env", "prod")
            .with_tag_expression("test", expression("#jsonPath(payload, '$.test')")),
    );
    let result = tagged.count(Message::new("not json"));
    assert!(matches!(result, Err(CountError::Tag { ref tag, .. }) if tag == "test"));

    let (amounts, amounts_snapshotter) = setup(
        CounterBuilder::default()
            .with_name("counter666")
            .with_tag_expression("foo", expression("'bar'"))
            .with_amount_expression(expression("payload.quantity")),
    );
    let result = amounts.count(Message::new(json!({ "quantity": "lots" })));
    assert!(matches!(result, Err(CountError::AmountNotCountable { .. })));

    let observed = observe(&fields_snapshotter);
    assert_eq!(observed, vec![Observed { name: "message.counter666".into(), tags: vec![], value: 1 }]);

    let observed = observe(&tagged_snapshotter);
    let arrival = Observed { name: "message.counter666".into(), tags: tags(&[("env", "prod")]), value: 1 };
    assert_eq!(observed, vec![arrival]);

    let observed = observe(&amounts_snapshotter);
    assert_eq!(observed, vec![Observed { name: "message.counter666".into(), tags: vec![], value: 1 }]);
}

#[test]
fn missing_fields_are_not_errors() {
    let (service, snapshotter) = setup(CounterBuilder::default().with_name("counter666").with_tag_field("test"));

    service.count(Message::new("plain text")).expect("text payloads have no fields");
    service.count(Message::new(json!([1, 2, 3]))).expect("arrays have no fields");
    service.count(json_bytes(r#"{"other": 1}"#)).expect("missing fields are absent");

    let observed = observe(&snapshotter);
    assert_eq!(observed.len(), 1);
    assert_eq!(value_of(&observed, "message.counter666", &[]), Some(3));
}

#[test]
fn configured_from_yaml() {
    let config = CounterConfig::from_yaml_str(
        r##"
name: books
message-counter-tag: true
tag:
  fixed:
    store: main
    ignored: ""
  expression:
    category: "#jsonPath(payload, '$..category')"
"##,
    )
    .expect("valid configuration");

    let builder = CounterBuilder::from_config(config).expect("expressions should parse");
    let (service, snapshotter) = setup(builder);

    service.count(json_bytes(BOOK_STORE)).expect("message should be counted");

    let observed = observe(&snapshotter);
    assert_eq!(
        value_of(&observed, "message.books", &[("store", "main"), ("counterType", "message")]),
        Some(1)
    );
    assert_eq!(value_of(&observed, "books", &[("store", "main"), ("category", "fiction")]), Some(4));
    assert_eq!(value_of(&observed, "books", &[("store", "main"), ("category", "reference")]), Some(1));
}

#[test]
fn invalid_yaml_expressions_name_their_option() {
    let config = CounterConfig::from_yaml_str("tag:\n  expression:\n    broken: \"#jsonPath(payload\"\n")
        .expect("valid document");

    match CounterBuilder::from_config(config) {
        Err(ConfigError::Expression { option, .. }) => assert_eq!(option, "tag.expression.broken"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("broken expression should not build"),
    }

    let config = CounterConfig::from_yaml_str("name: a\nname-expression: payload\n").expect("valid document");
    let result = CounterBuilder::from_config(config).expect("expressions should parse").build();
    assert!(matches!(result, Err(ConfigError::ConflictingName)));
}
