//! Progress Reporting
//!
//! Runners report task completions through a [`ProgressTracker`] that lives on
//! the calling thread. The tracker owns the counter, so sinks only render.

use serde::Serialize;

/// One completed task out of `total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Tasks completed so far, including this one
    pub completed: u64,
    /// Tasks in the run
    pub total: u64,
}

impl ProgressEvent {
    /// Whether this is the last event of the run
    pub fn is_final(&self) -> bool {
        self.completed == self.total
    }
}

/// Observer of a run's progress.
pub trait ProgressSink {
    /// The run is starting with `total` tasks
    fn started(&mut self, _total: u64) {}

    /// A task completed. Called once per task, in completion order.
    fn completed(&mut self, event: ProgressEvent);

    /// The run is over, successfully or not
    fn finished(&mut self) {}
}

/// Counts completions and forwards them to an optional sink.
pub struct ProgressTracker<'a> {
    sink: Option<&'a mut dyn ProgressSink>,
    completed: u64,
    total: u64,
}

impl<'a> ProgressTracker<'a> {
    /// Start tracking a run of `total` tasks
    pub fn new(mut sink: Option<&'a mut dyn ProgressSink>, total: usize) -> Self {
        let total = total as u64;
        if let Some(sink) = sink.as_deref_mut() {
            sink.started(total);
        }
        Self {
            sink,
            completed: 0,
            total,
        }
    }

    /// Record one completed task
    pub fn record(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
        let event = ProgressEvent {
            completed: self.completed,
            total: self.total,
        };
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.completed(event);
        }
    }

    /// Completions recorded so far
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl Drop for ProgressTracker<'_> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.finished();
        }
    }
}

/// Sink that keeps every event, for tests and programmatic callers
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// `total` passed to `started`, if the run started
    pub started: Option<u64>,
    /// Events in the order they arrived
    pub events: Vec<ProgressEvent>,
    /// Whether `finished` was called
    pub finished: bool,
}

impl RecordingSink {
    /// Last event received
    pub fn last(&self) -> Option<ProgressEvent> {
        self.events.last().copied()
    }

    /// Whether completion counts never went down
    pub fn is_monotonic(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[0].completed <= pair[1].completed)
    }
}

impl ProgressSink for RecordingSink {
    fn started(&mut self, total: u64) {
        self.started = Some(total);
    }

    fn completed(&mut self, event: ProgressEvent) {
        self.events.push(event);
    }

    fn finished(&mut self) {
        self.finished = true;
    }
}
