// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live aggregation of test events into [`TestMetrics`].

use crate::{
    events::{TestEvent, TestEventKind, TestOutcome},
    time::{StopwatchStart, stopwatch},
};
use chrono::{DateTime, Local};
use std::{collections::BTreeSet, time::Duration};
use testlens_metadata::{SuiteTally, TestMetrics, TestRef};

/// Folds test events into running counts, timings and derived rates.
///
/// Events are never un-applied, so counters only grow until [`reset`](Self::reset) is called.
/// Reruns of the same test are counted once per attempt.
#[derive(Clone, Debug)]
pub struct MetricsAggregator {
    stopwatch: StopwatchStart,
    eta_min_rate: f64,
    current_test: Option<String>,
    current_file: Option<String>,
    passed: usize,
    failed: usize,
    skipped: usize,
    reported_total: Option<usize>,
    test_duration_total: Duration,
    reported_run_time: Option<Duration>,
    peak_memory_bytes: Option<u64>,
    suite_summaries_seen: usize,
    failed_tests: BTreeSet<TestRef>,
    last_tally: Option<SuiteTally>,
}

impl MetricsAggregator {
    /// Creates a new aggregator, with the session clock starting now.
    ///
    /// `eta_min_rate` is the lowest rate, in tests per second, assumed when estimating the time
    /// remaining.
    pub fn new(eta_min_rate: f64) -> Self {
        Self {
            stopwatch: stopwatch(),
            eta_min_rate,
            current_test: None,
            current_file: None,
            passed: 0,
            failed: 0,
            skipped: 0,
            reported_total: None,
            test_duration_total: Duration::ZERO,
            reported_run_time: None,
            peak_memory_bytes: None,
            suite_summaries_seen: 0,
            failed_tests: BTreeSet::new(),
            last_tally: None,
        }
    }

    /// Zeroes every field and restarts the session clock.
    pub fn reset(&mut self) {
        *self = Self::new(self.eta_min_rate);
    }

    /// Folds a single event into the aggregate.
    pub fn apply(&mut self, event: &TestEvent) {
        match &event.kind {
            TestEventKind::TestStarted {
                test_name,
                file_name,
            } => {
                self.current_test = Some(test_name.clone());
                if let Some(file_name) = file_name {
                    self.current_file = Some(file_name.clone());
                }
            }
            TestEventKind::TestFinished {
                test_name,
                file_name,
                outcome,
                duration,
                memory,
            } => {
                match outcome {
                    TestOutcome::Passed => self.passed += 1,
                    TestOutcome::Failed { .. } => {
                        self.failed += 1;
                        self.failed_tests.insert(TestRef {
                            test_name: test_name.clone(),
                            file_name: file_name.clone(),
                        });
                    }
                    TestOutcome::Skipped => self.skipped += 1,
                }
                if self.current_test.as_deref() == Some(test_name.as_str()) {
                    self.current_test = None;
                }
                if let Some(duration) = duration {
                    self.test_duration_total = self.test_duration_total.saturating_add(*duration);
                }
                if let Some(memory) = memory {
                    self.peak_memory_bytes = Some(
                        self.peak_memory_bytes
                            .map_or(memory.peak_bytes, |peak| peak.max(memory.peak_bytes)),
                    );
                }
            }
            TestEventKind::SuiteSummary { tally } => {
                self.suite_summaries_seen += 1;
                // Summaries may be repeated or partial, so keep the largest values seen.
                if let Some(total) = tally.total {
                    self.reported_total = Some(self.reported_total.map_or(total, |t| t.max(total)));
                }
                if let Some(run_time) = tally.duration {
                    self.reported_run_time =
                        Some(self.reported_run_time.map_or(run_time, |t| t.max(run_time)));
                }
                self.last_tally = Some(tally.clone());
            }
        }
    }

    /// Returns a point-in-time copy of the metrics.
    pub fn snapshot(&self) -> TestMetrics {
        self.snapshot_at(self.stopwatch.snapshot().duration)
    }

    pub(crate) fn snapshot_at(&self, elapsed: Duration) -> TestMetrics {
        let completed = self.passed + self.failed + self.skipped;
        // A total lower than the number of completed tests means the summary undercounted (for
        // example, reruns), so the completed count wins.
        let total_tests = self.reported_total.map(|total| total.max(completed));

        let elapsed_secs = elapsed.as_secs_f64();
        let tests_per_second = if elapsed_secs > 0.0 {
            completed as f64 / elapsed_secs
        } else {
            0.0
        };

        let estimated_time_remaining = total_tests.map(|total| {
            let remaining = total - completed;
            if remaining == 0 {
                return Duration::ZERO;
            }
            let rate = tests_per_second
                .max(self.eta_min_rate)
                .max(f64::MIN_POSITIVE);
            Duration::try_from_secs_f64(remaining as f64 / rate).unwrap_or(Duration::MAX)
        });

        TestMetrics {
            current_test: self.current_test.clone(),
            current_file: self.current_file.clone(),
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            total_tests,
            duration: self
                .test_duration_total
                .max(self.reported_run_time.unwrap_or_default()),
            elapsed,
            tests_per_second,
            estimated_time_remaining,
            peak_memory_bytes: self.peak_memory_bytes,
            suite_summaries_seen: self.suite_summaries_seen,
        }
    }

    /// Returns the tests that failed at least once this session.
    pub fn failed_tests(&self) -> &BTreeSet<TestRef> {
        &self.failed_tests
    }

    /// Returns the most recent summary tally, if any.
    pub fn last_tally(&self) -> Option<&SuiteTally> {
        self.last_tally.as_ref()
    }

    /// Returns the wall-clock time at which the session started.
    pub fn session_started_at(&self) -> DateTime<Local> {
        self.stopwatch.start_time()
    }
}
