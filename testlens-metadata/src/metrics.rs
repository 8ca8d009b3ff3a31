// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A point-in-time snapshot of the live metrics for a monitoring session.
///
/// Counters are monotonically non-decreasing within a session. Once
/// [`total_tests`](Self::total_tests) is known, it is never less than
/// [`completed`](Self::completed).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestMetrics {
    /// The test currently running, if any.
    pub current_test: Option<String>,

    /// The file the current test belongs to, if known.
    pub current_file: Option<String>,

    /// The number of test attempts that passed.
    pub passed: usize,

    /// The number of test attempts that failed.
    pub failed: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The total number of tests, once a summary tally has reported it.
    pub total_tests: Option<usize>,

    /// The running total of reported test durations, raised to the run time reported by a
    /// summary line if that is larger.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Wall-clock time since monitoring started.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// Completed tests per second of wall-clock time. Zero if no time has elapsed.
    pub tests_per_second: f64,

    /// The estimated time until all tests have completed, once the total is known.
    #[serde(with = "humantime_serde", default)]
    pub estimated_time_remaining: Option<Duration>,

    /// The largest memory sample reported by the test output, in bytes.
    pub peak_memory_bytes: Option<u64>,

    /// The number of summary lines observed.
    pub suite_summaries_seen: usize,
}

impl TestMetrics {
    /// Returns the number of tests that reached a terminal state.
    #[inline]
    pub fn completed(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// Returns true if any test failed.
    #[inline]
    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }
}

/// A tally parsed from a summary line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuiteTally {
    /// What the tally counts.
    pub scope: TallyScope,

    /// The number of passed entries reported.
    pub passed: usize,

    /// The number of failed entries reported.
    pub failed: usize,

    /// The number of skipped, ignored, pending or todo entries reported.
    pub skipped: usize,

    /// The total reported, if present.
    pub total: Option<usize>,

    /// The run time reported, if present.
    #[serde(with = "humantime_serde", default)]
    pub duration: Option<Duration>,
}

/// What a [`SuiteTally`] counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TallyScope {
    /// Individual tests.
    #[default]
    Tests,

    /// Test suites (files).
    Suites,

    /// A standalone run-time line with no counts.
    Time,
}
