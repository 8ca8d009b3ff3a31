// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscribers notified as test events are produced.

use crate::{
    errors::{EngineError, WatcherError},
    events::{SuiteSummary, TestEvent},
};
use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};
use tracing::debug;

/// A subscriber to test events.
///
/// Every callback is optional. Callbacks run synchronously on the dispatcher as events are
/// produced, so they should return quickly. Errors and panics are caught and reported through
/// the monitor's error sink; they never stop delivery to other watchers.
pub trait TestWatcher: Send {
    /// A name for this watcher, used when reporting its errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called when a test starts.
    fn on_test_start(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
        let _ = event;
        Ok(())
    }

    /// Called when a test finishes, whatever its outcome.
    fn on_test_complete(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
        let _ = event;
        Ok(())
    }

    /// Called when a summary tally is seen, and once more when monitoring stops.
    fn on_suite_complete(&mut self, summary: &SuiteSummary) -> Result<(), WatcherError> {
        let _ = summary;
        Ok(())
    }
}

/// Identifies a [`TestWatcher`] callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherCallback {
    /// [`TestWatcher::on_test_start`].
    TestStart,

    /// [`TestWatcher::on_test_complete`].
    TestComplete,

    /// [`TestWatcher::on_suite_complete`].
    SuiteComplete,
}

impl fmt::Display for WatcherCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestStart => f.write_str("on_test_start"),
            Self::TestComplete => f.write_str("on_test_complete"),
            Self::SuiteComplete => f.write_str("on_suite_complete"),
        }
    }
}

/// Identifies a subscription on a [`WatcherBus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

/// An ordered registry of watchers.
///
/// Watchers are notified in subscription order.
#[derive(Default)]
pub struct WatcherBus {
    next_id: u64,
    watchers: Vec<(WatcherId, Box<dyn TestWatcher>)>,
}

impl fmt::Debug for WatcherBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherBus")
            .field("next_id", &self.next_id)
            .field(
                "watchers",
                &self
                    .watchers
                    .iter()
                    .map(|(id, watcher)| (id, watcher.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl WatcherBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watcher to the end of the notification order.
    pub fn subscribe(&mut self, watcher: Box<dyn TestWatcher>) -> WatcherId {
        let id = WatcherId(self.next_id);
        self.next_id += 1;
        debug!(watcher = watcher.name(), ?id, "watcher subscribed");
        self.watchers.push((id, watcher));
        id
    }

    /// Removes a watcher. Returns false if it had already been removed.
    pub fn unsubscribe(&mut self, id: WatcherId) -> bool {
        match self.watchers.iter().position(|(other, _)| *other == id) {
            Some(index) => {
                let (_, watcher) = self.watchers.remove(index);
                debug!(watcher = watcher.name(), ?id, "watcher unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Returns the number of subscribed watchers.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Returns true if no watchers are subscribed.
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Notifies every watcher that a test started.
    pub fn notify_start(&mut self, event: &TestEvent, on_error: &mut dyn FnMut(EngineError)) {
        self.dispatch(WatcherCallback::TestStart, on_error, |watcher| {
            watcher.on_test_start(event)
        });
    }

    /// Notifies every watcher that a test finished.
    pub fn notify_complete(&mut self, event: &TestEvent, on_error: &mut dyn FnMut(EngineError)) {
        self.dispatch(WatcherCallback::TestComplete, on_error, |watcher| {
            watcher.on_test_complete(event)
        });
    }

    /// Notifies every watcher of a suite summary.
    pub fn notify_suite_complete(
        &mut self,
        summary: &SuiteSummary,
        on_error: &mut dyn FnMut(EngineError),
    ) {
        self.dispatch(WatcherCallback::SuiteComplete, on_error, |watcher| {
            watcher.on_suite_complete(summary)
        });
    }

    fn dispatch(
        &mut self,
        callback: WatcherCallback,
        on_error: &mut dyn FnMut(EngineError),
        mut call: impl FnMut(&mut dyn TestWatcher) -> Result<(), WatcherError>,
    ) {
        for (_, watcher) in &mut self.watchers {
            let result = catch_unwind(AssertUnwindSafe(|| call(watcher.as_mut())));
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => EngineError::WatcherFailed {
                    watcher: watcher.name().to_owned(),
                    callback,
                    error,
                },
                Err(payload) => EngineError::WatcherPanicked {
                    watcher: watcher.name().to_owned(),
                    callback,
                    message: panic_message(payload.as_ref()),
                },
            };
            on_error(error);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TestEventKind, TestOutcome};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Recording {
        name: &'static str,
        log: Log,
    }

    impl TestWatcher for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn on_test_complete(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
            let test = event.kind.test_ref().expect("finished events name a test");
            self.log
                .0
                .lock()
                .unwrap()
                .push(format!("{}: {test}", self.name));
            Ok(())
        }
    }

    struct Failing;

    impl TestWatcher for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_test_complete(&mut self, _event: &TestEvent) -> Result<(), WatcherError> {
            Err(WatcherError::new("disk full"))
        }
    }

    struct Panicking;

    impl TestWatcher for Panicking {
        fn on_test_complete(&mut self, _event: &TestEvent) -> Result<(), WatcherError> {
            panic!("watcher exploded");
        }
    }

    fn finished(name: &str) -> TestEvent {
        TestEvent::now(TestEventKind::TestFinished {
            test_name: name.to_owned(),
            file_name: None,
            outcome: TestOutcome::Passed,
            duration: None,
            memory: None,
        })
    }

    #[test]
    fn notifies_in_subscription_order() {
        let log = Log::default();
        let mut bus = WatcherBus::new();
        bus.subscribe(Box::new(Recording { name: "first", log: log.clone() }));
        bus.subscribe(Box::new(Recording { name: "second", log: log.clone() }));

        let mut errors = Vec::new();
        bus.notify_complete(&finished("a"), &mut |error| errors.push(error));
        bus.notify_complete(&finished("b"), &mut |error| errors.push(error));

        assert!(errors.is_empty());
        assert_eq!(log.entries(), vec!["first: a", "second: a", "first: b", "second: b"]);
    }

    #[test]
    fn errors_and_panics_do_not_stop_delivery() {
        let log = Log::default();
        let mut bus = WatcherBus::new();
        bus.subscribe(Box::new(Failing));
        bus.subscribe(Box::new(Panicking));
        bus.subscribe(Box::new(Recording { name: "last", log: log.clone() }));

        let mut errors = Vec::new();
        bus.notify_complete(&finished("a"), &mut |error| errors.push(error));

        assert_eq!(log.entries(), vec!["last: a"]);
        assert_eq!(errors.len(), 2);
        assert!(
            matches!(
                &errors[0],
                EngineError::WatcherFailed { watcher, callback: WatcherCallback::TestComplete, .. }
                    if watcher == "failing"
            ),
            "{:?}",
            errors[0]
        );
        assert!(
            matches!(
                &errors[1],
                EngineError::WatcherPanicked { message, .. } if message == "watcher exploded"
            ),
            "{:?}",
            errors[1]
        );
    }

    #[test]
    fn unsubscribe_removes_once() {
        let log = Log::default();
        let mut bus = WatcherBus::new();
        let id = bus.subscribe(Box::new(Recording { name: "gone", log: log.clone() }));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.is_empty());

        bus.notify_complete(&finished("a"), &mut |_| {});
        assert!(log.entries().is_empty());
    }

    #[test]
    fn default_callbacks_are_no_ops() {
        struct Silent;
        impl TestWatcher for Silent {}

        let mut bus = WatcherBus::new();
        bus.subscribe(Box::new(Silent));
        let mut errors = Vec::new();
        bus.notify_start(&finished("a"), &mut |error| errors.push(error));
        bus.notify_complete(&finished("a"), &mut |error| errors.push(error));
        assert!(errors.is_empty());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn panic_message_formats() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "(non-string panic payload)");
    }
}
