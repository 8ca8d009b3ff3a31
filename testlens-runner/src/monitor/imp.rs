// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::dispatcher::{DispatcherContext, ErrorSink, MonitorCommand, SharedState};
use crate::{
    config::MonitorConfig,
    errors::{EngineError, InsightStoreError, MonitorBuildError},
    insight::{EmptyInsightStore, InsightStore, InsightStoreClient},
    metrics::MetricsAggregator,
    predict::PredictionEngine,
    watcher::{TestWatcher, WatcherId},
};
use debug_ignore::DebugIgnore;
use std::sync::{Arc, Weak};
use testlens_metadata::{FailureRecord, PredictionSet, TestMetrics, TestRef};
use tokio::{
    sync::{
        mpsc::{UnboundedSender, unbounded_channel},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Builds a [`TestMonitor`].
#[derive(Debug)]
pub struct TestMonitorBuilder {
    config: MonitorConfig,
    insight_store: Option<DebugIgnore<Arc<dyn InsightStore>>>,
    error_sink: Option<DebugIgnore<ErrorSink>>,
}

impl TestMonitorBuilder {
    /// Creates a new builder with the given configuration.
    ///
    /// The config should already have been validated, as
    /// [`MonitorConfig::from_location`] does.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            insight_store: None,
            error_sink: None,
        }
    }

    /// Sets the insight store used for predictions.
    ///
    /// Without one, every test is treated as having no history.
    pub fn set_insight_store(&mut self, store: Arc<dyn InsightStore>) -> &mut Self {
        self.insight_store = Some(DebugIgnore(store));
        self
    }

    /// Sets the sink that receives non-fatal engine errors.
    ///
    /// The default sink logs each error as a warning. The sink may be called while watchers are
    /// being notified, so it must not subscribe or unsubscribe watchers itself.
    pub fn set_error_sink(
        &mut self,
        sink: impl FnMut(EngineError) + Send + 'static,
    ) -> &mut Self {
        self.error_sink = Some(DebugIgnore(Box::new(sink)));
        self
    }

    /// Builds the monitor and spawns its dispatcher task on the current tokio runtime.
    pub fn build(self) -> Result<TestMonitor, MonitorBuildError> {
        let handle = tokio::runtime::Handle::try_current().map_err(MonitorBuildError::NoRuntime)?;

        let error_sink = self.error_sink.map_or_else(
            || -> ErrorSink { Box::new(|error: EngineError| error.log_warning()) },
            |sink| sink.0,
        );
        let shared = Arc::new(SharedState::new(
            MetricsAggregator::new(self.config.monitor.eta_min_rate),
            error_sink,
        ));

        let (command_tx, command_rx) = unbounded_channel();
        let dispatcher = DispatcherContext::new(shared.clone(), &self.config);
        let task = handle.spawn(dispatcher.run(command_rx));

        let store = match self.insight_store {
            Some(store) => store.0,
            None => Arc::new(EmptyInsightStore),
        };
        let predictor = PredictionEngine::new(
            InsightStoreClient::new(store),
            self.config.prediction.clone(),
        );

        debug!(
            quiet_period = ?self.config.monitor.quiet_period,
            dialects = ?self.config.classifier.dialects,
            "test monitor built",
        );
        Ok(TestMonitor {
            shared,
            command_tx,
            task,
            predictor,
        })
    }
}

/// A handle to a running monitor.
///
/// Output is passed in through [`feed`](Self::feed) and parsed in the background once the
/// stream has been quiet for the configured period. Watchers are notified from the background
/// task, in line order.
///
/// Dropping the handle shuts the background task down without emitting a final summary; use
/// [`stop_monitoring`](Self::stop_monitoring) first to emit one.
#[derive(Debug)]
pub struct TestMonitor {
    shared: Arc<SharedState>,
    command_tx: UnboundedSender<MonitorCommand>,
    task: JoinHandle<()>,
    predictor: PredictionEngine,
}

impl TestMonitor {
    /// Resets all metrics and starts a new session.
    ///
    /// Output fed before this call that hasn't been parsed yet is kept, and will be counted in
    /// the new session.
    pub fn start_monitoring(&self) {
        self.shared.metrics().reset();
        debug!("monitoring started");
    }

    /// Cancels any pending parse pass, discards unparsed output, and notifies watchers with a
    /// final summary carrying the last known totals.
    ///
    /// This may be called any number of times, including before
    /// [`start_monitoring`](Self::start_monitoring). Each call emits a final summary.
    pub async fn stop_monitoring(&self) {
        let (ack, ack_rx) = oneshot::channel();
        self.send_and_wait(MonitorCommand::Stop { ack }, ack_rx).await;
    }

    /// Feeds a chunk of output to the monitor.
    ///
    /// Chunks may contain any number of lines, including partial ones. Invalid UTF-8 is replaced
    /// and empty chunks are ignored. This never fails and never blocks.
    pub fn feed(&self, chunk: impl AsRef<[u8]>) {
        let chunk = chunk.as_ref();
        if chunk.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(chunk).into_owned();
        if self.command_tx.send(MonitorCommand::Feed(text)).is_err() {
            debug!("dispatcher has exited, dropping output");
        }
    }

    /// Parses everything fed so far without waiting for the quiet period, and waits for the
    /// resulting events to be dispatched.
    pub async fn flush_now(&self) {
        let (ack, ack_rx) = oneshot::channel();
        self.send_and_wait(MonitorCommand::Flush { ack }, ack_rx).await;
    }

    /// Returns a copy of the current metrics.
    pub fn snapshot(&self) -> TestMetrics {
        self.shared.metrics().snapshot()
    }

    /// Subscribes a watcher. It is notified after every watcher subscribed before it.
    ///
    /// Watcher callbacks run on the dispatcher task and must not subscribe or unsubscribe
    /// watchers themselves.
    pub fn subscribe(&self, watcher: impl TestWatcher + 'static) -> Subscription {
        let id = self.shared.bus().subscribe(Box::new(watcher));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Ranks `candidates` by their risk of failing.
    ///
    /// Tests that already failed in this session are passed to the prediction engine as live
    /// context. Insight store errors are sent to the error sink, and the affected candidates are
    /// treated as having no history.
    pub async fn get_predictions(&self, candidates: &[TestRef]) -> PredictionSet {
        let live_failures = self.shared.metrics().failed_tests().clone();
        let report = self.predictor.predict(candidates, &live_failures).await;
        for error in report.errors {
            self.shared.report_error(error);
        }
        report.set
    }

    /// Forwards a learned pattern/solution pair to the insight store.
    pub async fn record_failure(&self, record: FailureRecord) -> Result<(), InsightStoreError> {
        self.predictor.record_failure(record).await
    }

    /// Shuts the dispatcher down and waits for it to exit.
    ///
    /// Unparsed output is discarded and no final summary is emitted.
    pub async fn shutdown(self) {
        let Self { command_tx, task, .. } = self;
        drop(command_tx);
        if let Err(error) = task.await {
            warn!("monitor dispatcher task failed: {error}");
        }
    }

    async fn send_and_wait(&self, command: MonitorCommand, ack_rx: oneshot::Receiver<()>) {
        if self.command_tx.send(command).is_err() {
            debug!("dispatcher has exited, ignoring command");
            return;
        }
        if ack_rx.await.is_err() {
            debug!("dispatcher exited before acknowledging command");
        }
    }
}

/// A handle to a watcher subscription, returned by [`TestMonitor::subscribe`].
///
/// Dropping the handle leaves the watcher subscribed.
#[derive(Debug)]
pub struct Subscription {
    shared: Weak<SharedState>,
    id: WatcherId,
}

impl Subscription {
    /// Returns the watcher's ID.
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Unsubscribes the watcher. Returns false if it was already unsubscribed, or if the monitor
    /// no longer exists.
    ///
    /// The watcher receives no further notifications once this returns.
    pub fn unsubscribe(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.bus().unsubscribe(self.id),
            None => false,
        }
    }
}
