// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classify single lines of test output into raw signals.
//!
//! The main type here is [`LineClassifier`]. It holds an ordered table of rules, each belonging
//! to a [`Dialect`], and returns the signal produced by the first rule that matches a line.
//! Supporting another output dialect means adding rows to the table.

mod rules;

use crate::events::MemorySample;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use testlens_metadata::SuiteTally;

/// An output dialect understood by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// Glyph-prefixed results with inline durations, as printed by Jest, Mocha and Vitest:
    /// `✓ name (25ms)`, `✕ name`, `○ skipped name`, plus `Running <file>` start lines.
    Symbolic,

    /// `Label: N passed, M total` summary tallies and `Time: 1.2s` lines.
    Tally,

    /// The default Rust test harness: `test name ... ok` and `test result: …` lines.
    Libtest,

    /// cargo-nextest's human output: `PASS [ 0.004s] binary test`.
    Nextest,
}

impl Dialect {
    /// All known dialects, in their default evaluation order.
    pub const ALL: &'static [Self] = &[Self::Symbolic, Self::Tally, Self::Libtest, Self::Nextest];

    /// Returns the string representation of this dialect, as used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Symbolic => "symbolic",
            Self::Tally => "tally",
            Self::Libtest => "libtest",
            Self::Nextest => "nextest",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw signal extracted from one line of output.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    /// A test or a file of tests started running. At least one of the fields is set.
    Start {
        /// The test that started, if named.
        test_name: Option<String>,

        /// The file that started, if named.
        file_name: Option<String>,
    },

    /// A test reached a terminal state.
    Finished(FinishedSignal),

    /// A summary tally.
    Summary(SuiteTally),
}

/// A test that reached a terminal state, as reported on a single line.
#[derive(Clone, Debug, PartialEq)]
pub struct FinishedSignal {
    /// How the test finished.
    pub status: FinishedStatus,

    /// The name of the test.
    pub test_name: String,

    /// The file or binary the test belongs to, if reported on the same line.
    pub file_name: Option<String>,

    /// The duration reported on the line.
    pub duration: Option<Duration>,

    /// A memory sample reported on the line.
    pub memory: Option<MemorySample>,
}

/// The terminal state reported by a [`FinishedSignal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishedStatus {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,
}

/// Turns single lines of output into [`Signal`]s.
///
/// Classification is stateless: each line is matched independently against the enabled rules,
/// in table order.
#[derive(Clone, Debug)]
pub struct LineClassifier {
    rules: Vec<&'static rules::Rule>,
}

impl LineClassifier {
    /// Creates a classifier that evaluates the rules for the given dialects.
    ///
    /// Rules are always evaluated in table order (start, pass, fail, skip, summary), regardless
    /// of the order dialects are listed in.
    pub fn new(dialects: &[Dialect]) -> Self {
        let rules = rules::RULES
            .iter()
            .filter(|rule| dialects.contains(&rule.dialect))
            .collect();
        Self { rules }
    }

    /// Classifies a single line of output.
    ///
    /// The line should already have escape sequences removed (see
    /// [`normalize_line`](crate::parser::normalize_line)). Leading and trailing whitespace is
    /// ignored. Returns `None` if no rule matches.
    pub fn classify(&self, line: &str) -> Option<Signal> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|rule| {
            let captures = rule.regex.captures(line)?;
            (rule.build)(&captures)
        })
    }

    /// Returns the names of the rules this classifier evaluates, in order.
    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new(Dialect::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use testlens_metadata::TallyScope;

    fn finished(
        status: FinishedStatus,
        test_name: &str,
        file_name: Option<&str>,
        duration_ms: Option<u64>,
    ) -> Option<Signal> {
        Some(Signal::Finished(FinishedSignal {
            status,
            test_name: test_name.to_owned(),
            file_name: file_name.map(str::to_owned),
            duration: duration_ms.map(Duration::from_millis),
            memory: None,
        }))
    }

    fn start(test_name: Option<&str>, file_name: Option<&str>) -> Option<Signal> {
        Some(Signal::Start {
            test_name: test_name.map(str::to_owned),
            file_name: file_name.map(str::to_owned),
        })
    }

    #[test_case("Running math.spec.ts", start(None, Some("math.spec.ts")) ; "start with file")]
    #[test_case(
        "Running math.spec.ts :: adds numbers",
        start(Some("adds numbers"), Some("math.spec.ts"))
        ; "start with file and test"
    )]
    #[test_case(" RUNS  src/math.test.js", start(None, Some("src/math.test.js")) ; "jest runs line")]
    #[test_case(
        "     Running unittests src/lib.rs (target/debug/deps/mylib-0123abcd)",
        start(None, Some("src/lib.rs"))
        ; "cargo running line"
    )]
    #[test_case(
        "✓ should validate email (25ms)",
        finished(FinishedStatus::Passed, "should validate email", None, Some(25))
        ; "pass with duration"
    )]
    #[test_case(
        "    ✓ adds (3 ms)",
        finished(FinishedStatus::Passed, "adds", None, Some(3))
        ; "indented jest pass"
    )]
    #[test_case(
        "✔ parses (1.5s)",
        finished(FinishedStatus::Passed, "parses", None, Some(1500))
        ; "pass with seconds"
    )]
    #[test_case(
        "✓ handles (nested) parens",
        finished(FinishedStatus::Passed, "handles (nested) parens", None, None)
        ; "parens in name"
    )]
    #[test_case(
        "✓ keeps (unknown detail)",
        finished(FinishedStatus::Passed, "keeps (unknown detail)", None, None)
        ; "non-duration detail is part of the name"
    )]
    #[test_case(
        "✕ subtracts (2 ms)",
        finished(FinishedStatus::Failed, "subtracts", None, Some(2))
        ; "jest fail"
    )]
    #[test_case("✗ divides", finished(FinishedStatus::Failed, "divides", None, None) ; "fail without duration")]
    #[test_case(
        "○ skipped multiplies",
        finished(FinishedStatus::Skipped, "multiplies", None, None)
        ; "jest skip"
    )]
    #[test_case("✎ todo exponentiates", finished(FinishedStatus::Skipped, "exponentiates", None, None) ; "jest todo")]
    #[test_case(
        "test tests::it_works ... ok",
        finished(FinishedStatus::Passed, "tests::it_works", None, None)
        ; "libtest pass"
    )]
    #[test_case(
        "test tests::it_breaks ... FAILED",
        finished(FinishedStatus::Failed, "tests::it_breaks", None, None)
        ; "libtest fail"
    )]
    #[test_case(
        "test tests::slow ... ignored, requires network",
        finished(FinishedStatus::Skipped, "tests::slow", None, None)
        ; "libtest ignored with reason"
    )]
    #[test_case(
        "test tests::timed ... ok <0.250s>",
        finished(FinishedStatus::Passed, "tests::timed", None, Some(250))
        ; "libtest report time"
    )]
    #[test_case(
        "        PASS [   0.004s] nextest-tests::basic test_success",
        finished(FinishedStatus::Passed, "test_success", Some("nextest-tests::basic"), Some(4))
        ; "nextest pass"
    )]
    #[test_case(
        "        FAIL [   1.250s] nextest-tests::basic test_failure_assert",
        finished(FinishedStatus::Failed, "test_failure_assert", Some("nextest-tests::basic"), Some(1250))
        ; "nextest fail"
    )]
    #[test_case(
        "     SIGSEGV [   0.010s] nextest-tests::basic test_segfault",
        finished(FinishedStatus::Failed, "test_segfault", Some("nextest-tests::basic"), Some(10))
        ; "nextest signal"
    )]
    #[test_case(
        "        SKIP [         ] nextest-tests::basic test_ignored",
        finished(FinishedStatus::Skipped, "test_ignored", Some("nextest-tests::basic"), None)
        ; "nextest skip"
    )]
    #[test_case(
        "       START             nextest-tests::basic test_cwd",
        start(Some("test_cwd"), Some("nextest-tests::basic"))
        ; "nextest start"
    )]
    #[test_case("", None ; "empty line")]
    #[test_case("   ", None ; "whitespace only")]
    #[test_case("console.log('hello')", None ; "unrelated output")]
    #[test_case("PASS src/math.test.js", None ; "jest file result is not a test")]
    #[test_case("✓", None ; "glyph without name")]
    fn classify_line(input: &str, expected: Option<Signal>) {
        let classifier = LineClassifier::default();
        assert_eq!(classifier.classify(input), expected);
    }

    #[test_case(
        "Tests: 5 passed, 5 of 20 total",
        SuiteTally { scope: TallyScope::Tests, passed: 5, total: Some(20), ..SuiteTally::default() }
        ; "partial total"
    )]
    #[test_case(
        "Tests:       1 failed, 2 skipped, 1 todo, 5 passed, 9 total",
        SuiteTally {
            scope: TallyScope::Tests,
            passed: 5,
            failed: 1,
            skipped: 3,
            total: Some(9),
            duration: None,
        }
        ; "all jest labels"
    )]
    #[test_case(
        "Test Suites: 2 passed, 2 total",
        SuiteTally { scope: TallyScope::Suites, passed: 2, total: Some(2), ..SuiteTally::default() }
        ; "suites"
    )]
    #[test_case(
        "Time:        2.345 s, estimated 3 s",
        SuiteTally { scope: TallyScope::Time, duration: Some(Duration::from_millis(2345)), ..SuiteTally::default() }
        ; "time seconds"
    )]
    #[test_case(
        "Time: 850ms",
        SuiteTally { scope: TallyScope::Time, duration: Some(Duration::from_millis(850)), ..SuiteTally::default() }
        ; "time millis"
    )]
    #[test_case(
        "test result: FAILED. 3 passed; 1 failed; 2 ignored; 0 measured; 0 filtered out; finished in 0.52s",
        SuiteTally {
            scope: TallyScope::Tests,
            passed: 3,
            failed: 1,
            skipped: 2,
            total: Some(6),
            duration: Some(Duration::from_millis(520)),
        }
        ; "libtest result"
    )]
    #[test_case(
        "     Summary [   0.010s] 5 tests run: 4 passed, 1 failed, 2 skipped",
        SuiteTally {
            scope: TallyScope::Tests,
            passed: 4,
            failed: 1,
            skipped: 2,
            total: Some(7),
            duration: Some(Duration::from_millis(10)),
        }
        ; "nextest summary"
    )]
    fn classify_summary(input: &str, expected: SuiteTally) {
        let classifier = LineClassifier::default();
        assert_eq!(classifier.classify(input), Some(Signal::Summary(expected)));
    }

    #[test]
    fn memory_annotation() {
        let classifier = LineClassifier::default();
        let signal = classifier.classify("✓ allocates (12 ms, 45 MB heap size)");
        let Some(Signal::Finished(finished)) = signal else {
            panic!("expected a finished signal, found {signal:?}");
        };
        assert_eq!(finished.test_name, "allocates");
        assert_eq!(finished.duration, Some(Duration::from_millis(12)));
        assert_eq!(
            finished.memory,
            Some(MemorySample {
                before_bytes: None,
                after_bytes: 45 * 1024 * 1024,
                peak_bytes: 45 * 1024 * 1024,
            })
        );
    }

    #[test]
    fn disabled_dialects_do_not_match() {
        let classifier = LineClassifier::new(&[Dialect::Symbolic]);
        assert_eq!(classifier.classify("test tests::it_works ... ok"), None);
        assert_eq!(classifier.classify("Tests: 1 passed, 1 total"), None);
        assert!(classifier.classify("✓ still works").is_some());
        assert!(classifier.rule_names().all(|name| name.starts_with("symbolic")));
    }

    #[test]
    fn rules_follow_start_pass_fail_skip_summary_order() {
        let classifier = LineClassifier::default();
        let kinds: Vec<_> = classifier
            .rule_names()
            .map(|name| name.rsplit('-').next().expect("rule names are dialect-kind"))
            .collect();
        let mut sorted = kinds.clone();
        let rank = |kind: &str| match kind {
            "start" => 0,
            "pass" => 1,
            "result" => 1,
            "fail" => 2,
            "skip" => 3,
            _ => 4,
        };
        sorted.sort_by_key(|kind| rank(kind));
        assert_eq!(kinds, sorted);
    }

    #[test_strategy::proptest]
    fn classify_never_panics(line: String) {
        let classifier = LineClassifier::default();
        let _ = classifier.classify(&line);
    }
}
