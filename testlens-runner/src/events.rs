// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured events produced from test output.

use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::time::Duration;
use testlens_metadata::{SuiteTally, TestMetrics, TestRef};

/// A test event.
///
/// Events are produced by an [`OutputParser`](crate::parser::OutputParser) and consumed by the
/// [`MetricsAggregator`](crate::metrics::MetricsAggregator) and by subscribed
/// [`TestWatcher`](crate::watcher::TestWatcher)s. They are never mutated once created.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The kind of test event this is.
    #[serde(flatten)]
    pub kind: TestEventKind,
}

impl TestEvent {
    /// Creates a new event stamped with the current local time.
    pub fn now(kind: TestEventKind) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            kind,
        }
    }
}

/// The kind of test event this is.
///
/// Forms part of [`TestEvent`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TestEventKind {
    /// A test, or a file of tests, started running.
    #[serde(rename_all = "kebab-case")]
    TestStarted {
        /// The test that started. If the output only named a file, this is the file name.
        test_name: String,

        /// The file the test belongs to, if reported.
        file_name: Option<String>,
    },

    /// A test reached a terminal state.
    #[serde(rename_all = "kebab-case")]
    TestFinished {
        /// The test that finished.
        test_name: String,

        /// The file the test belongs to, if reported.
        file_name: Option<String>,

        /// How the test finished.
        outcome: TestOutcome,

        /// The duration reported for the test.
        #[serde(with = "humantime_serde")]
        duration: Option<Duration>,

        /// Memory usage reported for the test.
        memory: Option<MemorySample>,
    },

    /// A summary tally was reported.
    SuiteSummary {
        /// The parsed tally.
        tally: SuiteTally,
    },
}

impl TestEventKind {
    /// Returns the test this event is about, if any.
    pub fn test_ref(&self) -> Option<TestRef> {
        match self {
            Self::TestStarted {
                test_name,
                file_name,
            }
            | Self::TestFinished {
                test_name,
                file_name,
                ..
            } => Some(TestRef {
                test_name: test_name.clone(),
                file_name: file_name.clone(),
            }),
            Self::SuiteSummary { .. } => None,
        }
    }
}

/// How a test finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed.
    #[serde(rename_all = "kebab-case")]
    Failed {
        /// Indented error text that followed the failure line, if any.
        error_text: Option<String>,
    },

    /// The test was skipped, ignored or marked todo.
    Skipped,
}

impl TestOutcome {
    /// Returns a short, uppercase label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed { .. } => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

/// A memory sample attached to a test result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemorySample {
    /// Memory in use before the test ran, if reported.
    pub before_bytes: Option<u64>,

    /// Memory in use after the test ran.
    pub after_bytes: u64,

    /// Peak memory while the test ran.
    pub peak_bytes: u64,
}

/// The payload delivered to [`TestWatcher::on_suite_complete`](crate::watcher::TestWatcher::on_suite_complete).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuiteSummary {
    /// When the monitoring session started.
    pub session_started_at: DateTime<FixedOffset>,

    /// The tally that triggered this notification, or the last tally seen for the final
    /// notification.
    pub tally: Option<SuiteTally>,

    /// Metrics at the time of the notification.
    pub metrics: TestMetrics,

    /// True if this is the final notification emitted when monitoring stops.
    pub is_final: bool,
}
