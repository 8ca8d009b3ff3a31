// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rule table behind [`LineClassifier`](super::LineClassifier).

use super::{Dialect, FinishedSignal, FinishedStatus, Signal};
use crate::events::MemorySample;
use regex::{Captures, Regex};
use std::{sync::LazyLock, time::Duration};
use testlens_metadata::{SuiteTally, TallyScope};

pub(super) struct Rule {
    pub(super) dialect: Dialect,
    pub(super) name: &'static str,
    pub(super) regex: Regex,
    pub(super) build: fn(&Captures<'_>) -> Option<Signal>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("dialect", &self.dialect)
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish_non_exhaustive()
    }
}

fn rule(
    dialect: Dialect,
    name: &'static str,
    regex: &str,
    build: fn(&Captures<'_>) -> Option<Signal>,
) -> Rule {
    Rule {
        dialect,
        name,
        regex: Regex::new(regex).expect("rule regex is known to be valid"),
        build,
    }
}

/// Rules in evaluation order: start, pass, fail, skip, then summaries.
///
/// Lines are trimmed before they are matched.
pub(super) static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // --- start ---
        rule(
            Dialect::Symbolic,
            "symbolic-start",
            r"^(?:Running|RUNS)\s+(?P<file>\S+)(?:\s+::\s+(?P<test>\S.*))?$",
            |c| start(c.name("test"), c.name("file")),
        ),
        rule(
            Dialect::Libtest,
            "libtest-start",
            r"^Running\s+(?:unittests\s+)?(?P<file>\S+)\s+\([^)]*\)$",
            |c| start(None, c.name("file")),
        ),
        rule(
            Dialect::Nextest,
            "nextest-start",
            r"^START\s+(?:\[[^\]]*\]\s+)?(?P<binary>\S+)\s+(?P<test>\S.*)$",
            |c| start(c.name("test"), c.name("binary")),
        ),
        // --- pass ---
        rule(
            Dialect::Symbolic,
            "symbolic-pass",
            r"^[✓✔√]\s+(?P<rest>\S.*)$",
            |c| symbolic(FinishedStatus::Passed, &c["rest"]),
        ),
        rule(
            Dialect::Libtest,
            "libtest-result",
            r"^test\s+(?P<name>\S.*?)\s+\.\.\.\s+(?P<status>ok|FAILED|ignored)\b(?:.*?<(?P<secs>\d+(?:\.\d+)?)s>)?",
            libtest_result,
        ),
        rule(
            Dialect::Nextest,
            "nextest-result",
            r"^(?P<status>PASS|LEAK|FAIL|LEAK-FAIL|TIMEOUT|ABORT|SIG[A-Z]+|SKIP)\s+\[\s*(?:(?P<secs>\d+(?:\.\d+)?)s)?[^\]]*\]\s+(?P<binary>\S+)\s+(?P<test>\S.*)$",
            nextest_result,
        ),
        // --- fail ---
        rule(
            Dialect::Symbolic,
            "symbolic-fail",
            r"^[✗✘✕×✖]\s+(?P<rest>\S.*)$",
            |c| symbolic(FinishedStatus::Failed, &c["rest"]),
        ),
        // --- skip ---
        rule(
            Dialect::Symbolic,
            "symbolic-skip",
            r"^[○◌↓⊘✎]\s+(?:(?:skipped|todo|pending)\s+)?(?P<rest>\S.*)$",
            |c| symbolic(FinishedStatus::Skipped, &c["rest"]),
        ),
        // --- summary ---
        rule(
            Dialect::Tally,
            "tally-tests",
            r"^Tests:\s+(?P<body>\S.*)$",
            |c| tally(TallyScope::Tests, &c["body"]),
        ),
        rule(
            Dialect::Tally,
            "tally-suites",
            r"^Test Suites:\s+(?P<body>\S.*)$",
            |c| tally(TallyScope::Suites, &c["body"]),
        ),
        rule(
            Dialect::Tally,
            "tally-time",
            r"^Time:\s+(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>ms|s)\b",
            |c| {
                Some(Signal::Summary(SuiteTally {
                    scope: TallyScope::Time,
                    duration: Some(parse_duration(&c["value"], &c["unit"])?),
                    ..SuiteTally::default()
                }))
            },
        ),
        rule(
            Dialect::Libtest,
            "libtest-summary",
            r"^test result:\s+(?:ok|FAILED)\.\s+(?P<body>.*)$",
            libtest_summary,
        ),
        rule(
            Dialect::Nextest,
            "nextest-summary",
            r"^Summary\s+\[\s*(?P<secs>\d+(?:\.\d+)?)s\]\s+(?P<run>\d+)\s+tests?\s+run:\s*(?P<body>.*)$",
            nextest_summary,
        ),
    ]
});

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<count>\d+)\s+(?P<label>passed|failed|skipped|todo|pending|ignored)\b")
        .expect("count regex is known to be valid")
});

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\d+\s+of\s+)?(?P<total>\d+)\s+total\b")
        .expect("total regex is known to be valid")
});

static FINISHED_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"finished in (?P<secs>\d+(?:\.\d+)?)s")
        .expect("finished-in regex is known to be valid")
});

static DETAIL_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>ms|s)$")
        .expect("duration detail regex is known to be valid")
});

static DETAIL_MEMORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>KB|MB|GB)(?:\s+heap size)?$")
        .expect("memory detail regex is known to be valid")
});

fn start(test: Option<regex::Match<'_>>, file: Option<regex::Match<'_>>) -> Option<Signal> {
    let test_name = test.map(|m| m.as_str().trim().to_owned());
    let file_name = file.map(|m| m.as_str().to_owned());
    if test_name.is_none() && file_name.is_none() {
        return None;
    }
    Some(Signal::Start {
        test_name,
        file_name,
    })
}

/// Builds a finished signal from the text after a status glyph, splitting off a trailing
/// `(25ms)` or `(25 ms, 45 MB heap size)` detail if present.
fn symbolic(status: FinishedStatus, rest: &str) -> Option<Signal> {
    let (name, detail) = split_trailing_detail(rest);
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let Detail { duration, memory } = detail.unwrap_or_default();
    Some(Signal::Finished(FinishedSignal {
        status,
        test_name: name.to_owned(),
        file_name: None,
        duration,
        memory,
    }))
}

#[derive(Default)]
struct Detail {
    duration: Option<Duration>,
    memory: Option<MemorySample>,
}

fn split_trailing_detail(rest: &str) -> (&str, Option<Detail>) {
    let trimmed = rest.trim_end();
    let Some(without_close) = trimmed.strip_suffix(')') else {
        return (rest, None);
    };
    let Some(open) = without_close.rfind('(') else {
        return (rest, None);
    };
    match parse_detail(&without_close[open + 1..]) {
        Some(detail) => (&without_close[..open], Some(detail)),
        None => (rest, None),
    }
}

fn parse_detail(inner: &str) -> Option<Detail> {
    let mut detail = Detail::default();
    for part in inner.split(',') {
        let part = part.trim();
        if let Some(c) = DETAIL_DURATION_RE.captures(part) {
            detail.duration = Some(parse_duration(&c["value"], &c["unit"])?);
        } else if let Some(c) = DETAIL_MEMORY_RE.captures(part) {
            let scale = match &c["unit"] {
                "KB" => 1024,
                "MB" => 1024 * 1024,
                _ => 1024 * 1024 * 1024,
            };
            let bytes = parse_scaled(&c["value"], scale)?;
            detail.memory = Some(MemorySample {
                before_bytes: None,
                after_bytes: bytes,
                peak_bytes: bytes,
            });
        } else {
            return None;
        }
    }
    Some(detail)
}

fn libtest_result(c: &Captures<'_>) -> Option<Signal> {
    let status = match &c["status"] {
        "ok" => FinishedStatus::Passed,
        "FAILED" => FinishedStatus::Failed,
        _ => FinishedStatus::Skipped,
    };
    let duration = match c.name("secs") {
        Some(secs) => Some(parse_duration(secs.as_str(), "s")?),
        None => None,
    };
    Some(Signal::Finished(FinishedSignal {
        status,
        test_name: c["name"].to_owned(),
        file_name: None,
        duration,
        memory: None,
    }))
}

fn nextest_result(c: &Captures<'_>) -> Option<Signal> {
    let status = match &c["status"] {
        "PASS" | "LEAK" => FinishedStatus::Passed,
        "SKIP" => FinishedStatus::Skipped,
        _ => FinishedStatus::Failed,
    };
    let duration = match c.name("secs") {
        Some(secs) => Some(parse_duration(secs.as_str(), "s")?),
        None => None,
    };
    Some(Signal::Finished(FinishedSignal {
        status,
        test_name: c["test"].trim().to_owned(),
        file_name: Some(c["binary"].to_owned()),
        duration,
        memory: None,
    }))
}

/// Parses a `N passed, M failed, … [K of] T total` body.
fn tally(scope: TallyScope, body: &str) -> Option<Signal> {
    let mut tally = SuiteTally {
        scope,
        ..SuiteTally::default()
    };
    let matched_counts = add_counts(&mut tally, body)?;
    tally.total = match TOTAL_RE.captures(body) {
        Some(c) => Some(c["total"].parse().ok()?),
        None => None,
    };
    if !matched_counts && tally.total.is_none() {
        return None;
    }
    Some(Signal::Summary(tally))
}

fn libtest_summary(c: &Captures<'_>) -> Option<Signal> {
    let body = &c["body"];
    let mut tally = SuiteTally::default();
    add_counts(&mut tally, body)?;
    tally.total = Some(tally.passed + tally.failed + tally.skipped);
    tally.duration = match FINISHED_IN_RE.captures(body) {
        Some(c) => Some(parse_duration(&c["secs"], "s")?),
        None => None,
    };
    Some(Signal::Summary(tally))
}

fn nextest_summary(c: &Captures<'_>) -> Option<Signal> {
    let mut tally = SuiteTally::default();
    add_counts(&mut tally, &c["body"])?;
    let run: usize = c["run"].parse().ok()?;
    tally.total = Some(run + tally.skipped);
    tally.duration = Some(parse_duration(&c["secs"], "s")?);
    Some(Signal::Summary(tally))
}

/// Adds every `N label` count in `body` to `tally`. Returns whether any count was found, or
/// `None` if a count overflowed.
fn add_counts(tally: &mut SuiteTally, body: &str) -> Option<bool> {
    let mut matched = false;
    for c in COUNT_RE.captures_iter(body) {
        let count: usize = c["count"].parse().ok()?;
        let slot = match &c["label"] {
            "passed" => &mut tally.passed,
            "failed" => &mut tally.failed,
            _ => &mut tally.skipped,
        };
        *slot = slot.checked_add(count)?;
        matched = true;
    }
    Some(matched)
}

/// Parses a decimal number of `ms` or `s` exactly, without going through floating point.
fn parse_duration(value: &str, unit: &str) -> Option<Duration> {
    let unit_nanos = match unit {
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        _ => return None,
    };
    parse_scaled(value, unit_nanos).map(Duration::from_nanos)
}

/// Parses a decimal number and multiplies it by `scale`, truncating the result to a whole unit.
fn parse_scaled(value: &str, scale: u64) -> Option<u64> {
    // Digits past this point cannot change a u64 result.
    const MAX_FRACTION_DIGITS: usize = 19;

    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let mut numerator = u128::from(whole.parse::<u64>().ok()?);
    let mut denominator = 1u128;
    for digit in fraction.chars().take(MAX_FRACTION_DIGITS) {
        numerator = numerator
            .checked_mul(10)?
            .checked_add(u128::from(digit.to_digit(10)?))?;
        denominator *= 10;
    }
    let scaled = numerator.checked_mul(u128::from(scale))? / denominator;
    u64::try_from(scaled).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("25", "ms", Some(Duration::from_millis(25)) ; "whole millis")]
    #[test_case("1.5", "s", Some(Duration::from_millis(1500)) ; "fractional seconds")]
    #[test_case("0.004", "s", Some(Duration::from_millis(4)) ; "small seconds")]
    #[test_case("2.345", "s", Some(Duration::from_millis(2345)) ; "exact decimal")]
    #[test_case("0.5", "ms", Some(Duration::from_micros(500)) ; "fractional millis")]
    #[test_case("99999999999999999999", "s", None ; "overflow")]
    #[test_case("1", "h", None ; "unknown unit")]
    fn parse_duration_exact(value: &str, unit: &str, expected: Option<Duration>) {
        assert_eq!(parse_duration(value, unit), expected);
    }

    #[test_case("1.5", 1024, Some(1536) ; "binary kilobytes")]
    #[test_case("45.25", 1024 * 1024, Some(47_448_064) ; "binary megabytes")]
    #[test_case("0.001", 1024, Some(1) ; "truncates below one unit")]
    #[test_case("2", 1000, Some(2000) ; "whole value")]
    #[test_case("1.x", 1024, None ; "invalid digit")]
    fn parse_scaled_keeps_precision(value: &str, scale: u64, expected: Option<u64>) {
        assert_eq!(parse_scaled(value, scale), expected);
    }

    #[test]
    fn rule_names_are_unique() {
        let mut names: Vec<_> = RULES.iter().map(|rule| rule.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RULES.len());
    }
}
