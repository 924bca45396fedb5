//! Counts newline-delimited JSON documents read from standard input.
//!
//! Optionally takes the path to a YAML counter configuration as its only argument, and prints every counter that was
//! incremented once the input is exhausted.
//!
//! ```text
//! printf '{"status":"paid"}\n{"status":"open"}\n' | cargo run --example ndjson_counter -- counter.yaml
//! ```

use std::{
    io::{self, BufRead},
    sync::Arc,
};

use metrics_counter::{CounterBuilder, CounterConfig, CounterSink, Message};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = match std::env::args().nth(1) {
        Some(path) => CounterConfig::from_path(path).expect("failed to load counter configuration"),
        None => CounterConfig::default(),
    };

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let service = CounterBuilder::from_config(config)
        .expect("failed to parse counter expressions")
        .add_recorder(recorder)
        .build()
        .expect("failed to build counter service");

    let (tx, rx) = crossbeam_channel::bounded(1024);
    let sink = CounterSink::new(Arc::new(service)).spawn(rx).expect("failed to spawn counter sink");

    for line in io::stdin().lock().lines() {
        let line = line.expect("failed to read standard input");
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(Message::new(line.into_bytes())).is_err() {
            break;
        }
    }
    drop(tx);

    match sink.join().expect("counter sink panicked") {
        Ok(summary) => info!(counted = summary.counted, skipped = summary.skipped, "Input exhausted."),
        Err(e) => error!(error = %e, "Counter sink stopped."),
    }

    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        if let DebugValue::Counter(value) = value {
            let key = key.key();
            let labels = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect::<Vec<_>>();
            println!("{}{{{}}} {}", key.name(), labels.join(","), value);
        }
    }
}
