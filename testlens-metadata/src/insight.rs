// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// A reference to a single test: its name, plus the file it lives in if known.
///
/// Insights are keyed by this pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRef {
    /// The name of the test.
    pub test_name: String,

    /// The file the test is defined in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl TestRef {
    /// Creates a new reference to a test with no associated file.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            file_name: None,
        }
    }

    /// Creates a new reference to a test defined in `file_name`.
    pub fn with_file(test_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            file_name: Some(file_name.into()),
        }
    }

    /// Parses `file::name` or a bare `name`.
    ///
    /// The split happens at the first `::` followed by a non-empty name, so test names that
    /// themselves contain `::` (Rust paths) are only split if a file part is present. Use
    /// [`Self::new`] to avoid splitting altogether.
    pub fn parse(input: &str) -> Self {
        match input.split_once("::") {
            Some((file, name)) if looks_like_file(file) && !name.is_empty() => {
                Self::with_file(name, file)
            }
            _ => Self::new(input),
        }
    }
}

fn looks_like_file(s: &str) -> bool {
    s.contains('.') || s.contains('/') || s.contains('\\')
}

impl fmt::Display for TestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_name {
            Some(file_name) => write!(f, "{file_name}::{}", self.test_name),
            None => write!(f, "{}", self.test_name),
        }
    }
}

/// A historical record for a single test, owned by an external insight store.
///
/// The engine treats insights as read-only.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestInsight {
    /// The test this insight describes.
    #[serde(flatten)]
    pub test: TestRef,

    /// The fraction of historical runs in which this test failed, in `[0, 1]`.
    #[serde(default)]
    pub failure_rate: f64,

    /// The average duration of this test across historical runs.
    #[serde(with = "humantime_serde", default)]
    pub average_duration: Duration,

    /// Patterns detected for this test.
    #[serde(default)]
    pub patterns: Vec<Pattern>,

    /// Timestamps of the most recent failures, oldest first.
    #[serde(default)]
    pub last_failures: Vec<DateTime<FixedOffset>>,

    /// Identifiers of tests that tend to fail together with this one.
    #[serde(default)]
    pub correlated_tests: Vec<String>,

    /// A human-readable recommendation for this test. May be empty.
    #[serde(default)]
    pub recommended_action: String,
}

impl TestInsight {
    /// Creates an insight with the given failure rate and no other history.
    pub fn new(test: TestRef, failure_rate: f64) -> Self {
        Self {
            test,
            failure_rate,
            average_duration: Duration::ZERO,
            patterns: Vec::new(),
            last_failures: Vec::new(),
            correlated_tests: Vec::new(),
            recommended_action: String::new(),
        }
    }

    /// Returns the strongest pattern that raises this test's failure risk, if any.
    ///
    /// Ties on confidence resolve to the pattern listed first.
    pub fn strongest_risk_pattern(&self) -> Option<&Pattern> {
        self.patterns
            .iter()
            .filter(|pattern| pattern.kind.raises_risk())
            .fold(None, |best: Option<&Pattern>, pattern| match best {
                Some(best) if best.confidence >= pattern.confidence => Some(best),
                _ => Some(pattern),
            })
    }
}

/// A pattern detected in a test's history.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Pattern {
    /// The kind of pattern.
    #[serde(rename = "type")]
    pub kind: PatternKind,

    /// How confident the detector is in this pattern, in `[0, 1]`.
    pub confidence: f64,

    /// Evidence supporting the pattern, e.g. excerpts from past runs.
    #[serde(default)]
    pub evidence: Vec<String>,

    /// A suggested remedy. May be empty.
    #[serde(default)]
    pub suggestion: String,
}

impl Pattern {
    /// Creates a pattern with no evidence and no suggestion.
    pub fn new(kind: PatternKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence,
            evidence: Vec::new(),
            suggestion: String::new(),
        }
    }
}

/// The kind of a [`Pattern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// The test's outcome varies between runs without code changes.
    Flaky,

    /// The test fails on every recorded run.
    AlwaysFails,

    /// The test is consistently slower than its peers.
    Slow,

    /// The test has timed out in the past.
    Timeout,

    /// The test's memory usage grows across runs.
    MemoryLeak,

    /// A pattern kind this version of testlens doesn't know about.
    #[serde(other)]
    Other,
}

impl PatternKind {
    /// Returns true if a pattern of this kind raises the predicted failure risk.
    pub fn raises_risk(self) -> bool {
        matches!(self, Self::Flaky | Self::AlwaysFails)
    }

    /// Returns the string representation of this kind, as used in serialized output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flaky => "flaky",
            Self::AlwaysFails => "always_fails",
            Self::Slow => "slow",
            Self::Timeout => "timeout",
            Self::MemoryLeak => "memory_leak",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learned pattern/solution pair for a failing test, forwarded to the insight store.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailureRecord {
    /// The test that failed.
    #[serde(flatten)]
    pub test: TestRef,

    /// The pattern observed for this failure.
    pub pattern: Pattern,

    /// The solution that resolved, or is expected to resolve, the failure.
    #[serde(default)]
    pub solution: String,
}
