//! Pipeline stages built on top of [`CounterService`].
//!
//! A [`CounterSink`] counts messages and goes no further, while a [`CounterProcessor`] counts messages and forwards
//! them, unchanged, to the next stage. Both can be driven directly, one message at a time, or run as a worker over a
//! pair of channels.

use std::{io, sync::Arc, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    message::Message,
    service::{CountError, CounterService},
};

/// What a running stage does with a message that could not be counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log the error, drop the message, and carry on with the next one.
    #[default]
    Skip,

    /// Stop the stage and return the error.
    Halt,
}

/// Errors that stop a running stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// A message could not be counted, and the stage was configured to halt.
    #[error("stopped on a message that could not be counted: {0}")]
    Count(#[from] CountError),

    /// The downstream channel was disconnected while forwarding a message.
    #[error("downstream channel disconnected")]
    Disconnected,

    /// Failed to spawn the worker thread.
    #[error("failed to spawn stage worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Outcome of a stage that ran until its input was closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageSummary {
    /// Messages that were counted.
    pub counted: u64,

    /// Messages that could not be counted and were dropped.
    pub skipped: u64,
}

fn drive<F>(
    service: &CounterService,
    policy: ErrorPolicy,
    input: &Receiver<Message>,
    mut forward: F,
) -> Result<StageSummary, StageError>
where
    F: FnMut(Message) -> Result<(), StageError>,
{
    let mut summary = StageSummary::default();
    for message in input.iter() {
        match service.record(&message) {
            Ok(()) => {
                summary.counted += 1;
                forward(message)?;
            }
            Err(e) => match policy {
                ErrorPolicy::Skip => {
                    summary.skipped += 1;
                    warn!(error = %e, "Dropping message that could not be counted.");
                }
                ErrorPolicy::Halt => return Err(e.into()),
            },
        }
    }

    debug!(counted = summary.counted, skipped = summary.skipped, "Input closed, stopping stage.");
    Ok(summary)
}

/// A terminal stage that counts every message it receives.
pub struct CounterSink {
    service: Arc<CounterService>,
    policy: ErrorPolicy,
}

impl CounterSink {
    /// Creates a sink that counts with the given service.
    pub fn new(service: Arc<CounterService>) -> Self {
        CounterSink { service, policy: ErrorPolicy::default() }
    }

    /// Sets what happens to messages that cannot be counted when the sink is running.
    ///
    /// Defaults to [`ErrorPolicy::Skip`].
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Counts a single message.
    ///
    /// # Errors
    ///
    /// If the message cannot be counted, an error is returned.
    pub fn consume(&self, message: Message) -> Result<(), CountError> {
        self.service.record(&message)
    }

    /// Counts messages from `input` until it is closed.
    ///
    /// # Errors
    ///
    /// If a message cannot be counted and the error policy is [`ErrorPolicy::Halt`], the error is returned.
    pub fn run(&self, input: &Receiver<Message>) -> Result<StageSummary, StageError> {
        drive(&self.service, self.policy, input, |_| Ok(()))
    }

    /// Runs the sink on a dedicated thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, an error is returned.
    pub fn spawn(
        self,
        input: Receiver<Message>,
    ) -> Result<JoinHandle<Result<StageSummary, StageError>>, StageError> {
        debug!("Starting counter sink.");
        let handle = std::thread::Builder::new()
            .name("metrics-counter-sink".to_string())
            .spawn(move || self.run(&input))?;
        Ok(handle)
    }
}

/// A pass-through stage that counts every message and forwards it unchanged.
pub struct CounterProcessor {
    service: Arc<CounterService>,
    policy: ErrorPolicy,
}

impl CounterProcessor {
    /// Creates a processor that counts with the given service.
    pub fn new(service: Arc<CounterService>) -> Self {
        CounterProcessor { service, policy: ErrorPolicy::default() }
    }

    /// Sets what happens to messages that cannot be counted when the processor is running.
    ///
    /// Skipped messages are not forwarded. Defaults to [`ErrorPolicy::Skip`].
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Counts a single message and hands it back unchanged.
    ///
    /// # Errors
    ///
    /// If the message cannot be counted, an error is returned.
    pub fn process(&self, message: Message) -> Result<Message, CountError> {
        self.service.count(message)
    }

    /// Counts messages from `input`, forwarding each to `output`, until `input` is closed.
    ///
    /// # Errors
    ///
    /// If `output` is disconnected, or a message cannot be counted and the error policy is [`ErrorPolicy::Halt`], an
    /// error is returned.
    pub fn run(
        &self,
        input: &Receiver<Message>,
        output: &Sender<Message>,
    ) -> Result<StageSummary, StageError> {
        drive(&self.service, self.policy, input, |message| {
            output.send(message).map_err(|_| StageError::Disconnected)
        })
    }

    /// Runs the processor on a dedicated thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, an error is returned.
    pub fn spawn(
        self,
        input: Receiver<Message>,
        output: Sender<Message>,
    ) -> Result<JoinHandle<Result<StageSummary, StageError>>, StageError> {
        debug!("Starting counter processor.");
        let handle = std::thread::Builder::new()
            .name("metrics-counter-processor".to_string())
            .spawn(move || self.run(&input, &output))?;
        Ok(handle)
    }
}
