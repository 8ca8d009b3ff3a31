// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn classified lines into [`TestEvent`]s.

use crate::{
    classify::{FinishedStatus, LineClassifier, Signal},
    events::{TestEvent, TestEventKind, TestOutcome},
};
use std::borrow::Cow;

/// Prepares a raw line for classification.
///
/// Escape sequences are stripped, a carriage-return redraw keeps only the text after the last
/// `\r`, and lines longer than `max_len` bytes are truncated at a character boundary.
pub fn normalize_line(raw: &str, max_len: usize) -> Cow<'_, str> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    let raw = match raw.rfind('\r') {
        Some(index) => &raw[index + 1..],
        None => raw,
    };
    let mut line = if raw.contains('\x1b') {
        Cow::Owned(strip_ansi_escapes::strip_str(raw))
    } else {
        Cow::Borrowed(raw)
    };
    if line.len() > max_len {
        let mut end = max_len;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        match &mut line {
            Cow::Borrowed(s) => *s = &s[..end],
            Cow::Owned(s) => s.truncate(end),
        }
    }
    line
}

/// Parses lines of output into events, one pass at a time.
///
/// The parser only ever looks back one event: a failure is held open so that the indented lines
/// directly following it can be attached as its error text. An open failure is emitted as soon
/// as a line arrives that isn't a continuation, and at the end of every pass.
#[derive(Debug)]
pub struct OutputParser {
    classifier: LineClassifier,
    max_line_length: usize,
    open_failure: Option<OpenFailure>,
}

#[derive(Debug)]
struct OpenFailure {
    indent: usize,
    event: TestEvent,
    error_lines: Vec<String>,
}

impl OpenFailure {
    fn into_event(self) -> TestEvent {
        let Self {
            mut event,
            error_lines,
            ..
        } = self;
        if !error_lines.is_empty() {
            if let TestEventKind::TestFinished {
                outcome: TestOutcome::Failed { error_text },
                ..
            } = &mut event.kind
            {
                *error_text = Some(error_lines.join("\n"));
            }
        }
        event
    }
}

impl OutputParser {
    /// Creates a new parser.
    pub fn new(classifier: LineClassifier, max_line_length: usize) -> Self {
        Self {
            classifier,
            max_line_length,
            open_failure: None,
        }
    }

    /// Parses a complete pass of lines, returning the events they produce in line order.
    ///
    /// Lines that don't classify are dropped silently.
    pub fn parse_pass<I, S>(&mut self, lines: I) -> Vec<TestEvent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut events = Vec::new();
        for line in lines {
            self.push_line(line.as_ref(), &mut events);
        }
        self.finish(&mut events);
        events
    }

    /// Parses a single line, appending any events it completes to `out`.
    pub fn push_line(&mut self, raw: &str, out: &mut Vec<TestEvent>) {
        let line = normalize_line(raw, self.max_line_length);
        let trimmed = line.trim();
        let signal = self.classifier.classify(trimmed);

        if signal.is_none() {
            if let Some(open) = &mut self.open_failure {
                if trimmed.is_empty() {
                    // Blank lines between a failure and its details keep the failure open.
                    return;
                }
                if indent_of(&line) > open.indent {
                    open.error_lines.push(trimmed.to_owned());
                    return;
                }
            }
        }

        self.finish(out);

        let Some(signal) = signal else {
            return;
        };
        let kind = match signal {
            Signal::Start {
                test_name,
                file_name,
            } => {
                let Some(test_name) = test_name.or_else(|| file_name.clone()) else {
                    return;
                };
                TestEventKind::TestStarted {
                    test_name,
                    file_name,
                }
            }
            Signal::Finished(finished) => {
                let outcome = match finished.status {
                    FinishedStatus::Passed => TestOutcome::Passed,
                    FinishedStatus::Failed => TestOutcome::Failed { error_text: None },
                    FinishedStatus::Skipped => TestOutcome::Skipped,
                };
                let is_failure = matches!(outcome, TestOutcome::Failed { .. });
                let kind = TestEventKind::TestFinished {
                    test_name: finished.test_name,
                    file_name: finished.file_name,
                    outcome,
                    duration: finished.duration,
                    memory: finished.memory,
                };
                if is_failure {
                    self.open_failure = Some(OpenFailure {
                        indent: indent_of(&line),
                        event: TestEvent::now(kind),
                        error_lines: Vec::new(),
                    });
                    return;
                }
                kind
            }
            Signal::Summary(tally) => TestEventKind::SuiteSummary { tally },
        };
        out.push(TestEvent::now(kind));
    }

    /// Emits the open failure, if any.
    pub fn finish(&mut self, out: &mut Vec<TestEvent>) {
        if let Some(open) = self.open_failure.take() {
            out.push(open.into_event());
        }
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}
