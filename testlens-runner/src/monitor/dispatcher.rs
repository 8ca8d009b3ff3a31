// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher task for a monitor.
//!
//! This task receives commands from the [`TestMonitor`](super::TestMonitor) handle, schedules
//! parse passes, and sends the resulting events to the metrics aggregator and the watcher bus.

use crate::{
    classify::LineClassifier,
    config::MonitorConfig,
    debounce::DebounceCoordinator,
    errors::EngineError,
    events::{SuiteSummary, TestEvent, TestEventKind},
    metrics::MetricsAggregator,
    parser::OutputParser,
    watcher::WatcherBus,
};
use debug_ignore::DebugIgnore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tracing::debug;

pub(super) type ErrorSink = Box<dyn FnMut(EngineError) + Send>;

/// State shared between the monitor handle and the dispatcher.
///
/// Lock order: `metrics` and `bus` are never held at the same time. `error_sink` may be taken
/// while `bus` is held.
#[derive(Debug)]
pub(super) struct SharedState {
    metrics: Mutex<MetricsAggregator>,
    bus: Mutex<WatcherBus>,
    error_sink: Mutex<DebugIgnore<ErrorSink>>,
}

impl SharedState {
    pub(super) fn new(metrics: MetricsAggregator, error_sink: ErrorSink) -> Self {
        Self {
            metrics: Mutex::new(metrics),
            bus: Mutex::new(WatcherBus::new()),
            error_sink: Mutex::new(DebugIgnore(error_sink)),
        }
    }

    pub(super) fn metrics(&self) -> MutexGuard<'_, MetricsAggregator> {
        lock(&self.metrics)
    }

    pub(super) fn bus(&self) -> MutexGuard<'_, WatcherBus> {
        lock(&self.bus)
    }

    pub(super) fn report_error(&self, error: EngineError) {
        let mut sink = lock(&self.error_sink);
        (sink.0)(error);
    }
}

// A panic while a lock is held can only come from our own code (watcher panics are caught), and
// none of the guarded state is left half-updated by one, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command sent from the monitor handle to the dispatcher.
#[derive(Debug)]
pub(super) enum MonitorCommand {
    Feed(String),
    Flush { ack: oneshot::Sender<()> },
    Stop { ack: oneshot::Sender<()> },
}

/// Context for the dispatcher task.
#[derive(Debug)]
pub(super) struct DispatcherContext {
    shared: Arc<SharedState>,
    coordinator: DebounceCoordinator,
    parser: OutputParser,
}

impl DispatcherContext {
    pub(super) fn new(shared: Arc<SharedState>, config: &MonitorConfig) -> Self {
        Self {
            shared,
            coordinator: DebounceCoordinator::new(
                config.monitor.quiet_period,
                config.monitor.flush_partial_lines,
            ),
            parser: OutputParser::new(
                LineClassifier::new(&config.classifier.dialects),
                config.monitor.max_line_length,
            ),
        }
    }

    /// Runs the dispatcher until the monitor handle is dropped.
    pub(super) async fn run(mut self, mut command_rx: UnboundedReceiver<MonitorCommand>) {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(MonitorCommand::Feed(text)) => {
                            self.coordinator.feed(&text);
                        }
                        Some(MonitorCommand::Flush { ack }) => {
                            self.flush();
                            // The caller may have stopped waiting.
                            _ = ack.send(());
                        }
                        Some(MonitorCommand::Stop { ack }) => {
                            self.stop();
                            _ = ack.send(());
                        }
                        None => {
                            debug!("monitor handle dropped, dispatcher exiting");
                            break;
                        }
                    }
                }
                _ = self.coordinator.quiet(), if self.coordinator.is_pending() => {
                    self.flush();
                }
            }
        }
    }

    /// Runs a parse pass over everything buffered so far.
    fn flush(&mut self) {
        let lines = self.coordinator.take_pass();
        if lines.is_empty() {
            return;
        }
        let events = self.parser.parse_pass(&lines);
        debug!(lines = lines.len(), events = events.len(), "parse pass complete");
        for event in &events {
            self.dispatch(event);
        }
    }

    fn dispatch(&self, event: &TestEvent) {
        let summary = {
            let mut metrics = self.shared.metrics();
            metrics.apply(event);
            match &event.kind {
                TestEventKind::SuiteSummary { tally } => Some(SuiteSummary {
                    session_started_at: metrics.session_started_at().fixed_offset(),
                    tally: Some(tally.clone()),
                    metrics: metrics.snapshot(),
                    is_final: false,
                }),
                TestEventKind::TestStarted { .. } | TestEventKind::TestFinished { .. } => None,
            }
        };

        let mut bus = self.shared.bus();
        let mut on_error = |error| self.shared.report_error(error);
        match (&event.kind, summary) {
            (_, Some(summary)) => bus.notify_suite_complete(&summary, &mut on_error),
            (TestEventKind::TestStarted { .. }, None) => bus.notify_start(event, &mut on_error),
            (_, None) => bus.notify_complete(event, &mut on_error),
        }
    }

    /// Cancels any pending pass, discards buffered output, and emits the final summary.
    fn stop(&mut self) {
        self.coordinator.stop();
        let summary = {
            let metrics = self.shared.metrics();
            SuiteSummary {
                session_started_at: metrics.session_started_at().fixed_offset(),
                tally: metrics.last_tally().cloned(),
                metrics: metrics.snapshot(),
                is_final: true,
            }
        };
        debug!(completed = summary.metrics.completed(), "monitoring stopped");
        self.shared
            .bus()
            .notify_suite_complete(&summary, &mut |error| self.shared.report_error(error));
    }
}
