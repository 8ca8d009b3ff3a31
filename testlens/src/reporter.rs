// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writes events, summaries and predictions to the terminal.

use clap::ValueEnum;
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use std::{fmt, io::Write, time::Duration};
use swrite::{SWrite, swrite, swriteln};
use testlens_metadata::{PredictionSet, TestMetrics};
use testlens_runner::{
    errors::WatcherError,
    events::{SuiteSummary, TestEvent, TestEventKind, TestOutcome},
    watcher::TestWatcher,
};

/// The format to print results in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum MessageFormat {
    /// Human-readable lines
    #[default]
    Human,

    /// One JSON object per line
    Json,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ReporterStyles {
    count: Style,
    pass: Style,
    fail: Style,
    fail_output: Style,
    skip: Style,
}

impl ReporterStyles {
    pub(crate) fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.fail_output = Style::new().red();
        self.skip = Style::new().yellow().bold();
    }
}

/// A watcher that prints one line per test result, and the final metrics once monitoring stops.
pub(crate) struct LineReporter<W> {
    format: MessageFormat,
    styles: ReporterStyles,
    show_starts: bool,
    writer: W,
}

impl<W: Write + Send> LineReporter<W> {
    pub(crate) fn new(format: MessageFormat, styles: ReporterStyles, writer: W) -> Self {
        Self {
            format,
            styles,
            show_starts: false,
            writer,
        }
    }

    /// Also prints a line when a test starts.
    pub(crate) fn set_show_starts(&mut self, show_starts: bool) -> &mut Self {
        self.show_starts = show_starts;
        self
    }

    fn write_out(&mut self, out: &str) -> Result<(), WatcherError> {
        self.writer
            .write_all(out.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|error| WatcherError::with_source("failed to write to output", error))
    }

    fn report_event(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
        let mut out = String::new();
        match self.format {
            MessageFormat::Human => write_event(event, &self.styles, &mut out),
            MessageFormat::Json => write_json_line(event, &mut out)?,
        }
        self.write_out(&out)
    }
}

impl<W: Write + Send> TestWatcher for LineReporter<W> {
    fn name(&self) -> &str {
        "reporter"
    }

    fn on_test_start(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
        if self.show_starts {
            self.report_event(event)?;
        }
        Ok(())
    }

    fn on_test_complete(&mut self, event: &TestEvent) -> Result<(), WatcherError> {
        self.report_event(event)
    }

    fn on_suite_complete(&mut self, summary: &SuiteSummary) -> Result<(), WatcherError> {
        let mut out = String::new();
        match self.format {
            MessageFormat::Human => {
                if !summary.is_final {
                    return Ok(());
                }
                write_final_metrics(&summary.metrics, &self.styles, &mut out);
            }
            MessageFormat::Json => write_json_line(summary, &mut out)?,
        }
        self.write_out(&out)
    }
}

fn write_json_line(value: &impl Serialize, out: &mut String) -> Result<(), WatcherError> {
    let json = serde_json::to_string(value)
        .map_err(|error| WatcherError::with_source("failed to serialize output", error))?;
    swriteln!(out, "{json}");
    Ok(())
}

struct DisplayBracketedDuration(Option<Duration>);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            // * > means right-align.
            // * 8 is the number of characters to pad to.
            // * .3 means print three digits after the decimal point.
            Some(duration) => write!(f, "[{:>8.3}s]", duration.as_secs_f64()),
            None => write!(f, "[{:>9}]", ""),
        }
    }
}

pub(crate) fn write_event(event: &TestEvent, styles: &ReporterStyles, out: &mut String) {
    let Some(test) = event.kind.test_ref() else {
        return;
    };
    match &event.kind {
        TestEventKind::TestStarted { .. } => {
            swriteln!(out, "{:>12} {test}", "START".style(styles.pass));
        }
        TestEventKind::TestFinished {
            outcome, duration, ..
        } => {
            let status_style = match outcome {
                TestOutcome::Passed => styles.pass,
                TestOutcome::Failed { .. } => styles.fail,
                TestOutcome::Skipped => styles.skip,
            };
            swriteln!(
                out,
                "{:>12} {} {test}",
                outcome.label().style(status_style),
                DisplayBracketedDuration(*duration),
            );
            if let TestOutcome::Failed {
                error_text: Some(error_text),
            } = outcome
            {
                for line in error_text.lines() {
                    swriteln!(out, "{:>12} {}", "", line.style(styles.fail_output));
                }
            }
        }
        TestEventKind::SuiteSummary { .. } => {}
    }
}

pub(crate) fn write_final_metrics(metrics: &TestMetrics, styles: &ReporterStyles, out: &mut String) {
    let summary_style = if metrics.any_failed() {
        styles.fail
    } else {
        styles.pass
    };
    let completed = metrics.completed();
    swrite!(
        out,
        "{:>12} {} {} {} completed",
        "Summary".style(summary_style),
        DisplayBracketedDuration(Some(metrics.elapsed)),
        completed.style(styles.count),
        plural_tests(completed),
    );
    if let Some(total) = metrics.total_tests {
        swrite!(out, " of {}", total.style(styles.count));
    }
    swriteln!(
        out,
        ": {} {}, {} {}, {} {}",
        metrics.passed.style(styles.count),
        "passed".style(styles.pass),
        metrics.failed.style(styles.count),
        "failed".style(styles.fail),
        metrics.skipped.style(styles.count),
        "skipped".style(styles.skip),
    );
    if let Some(peak) = metrics.peak_memory_bytes {
        swriteln!(
            out,
            "{:>12} {:.1} MiB",
            "Peak memory".style(styles.count),
            peak as f64 / (1024.0 * 1024.0),
        );
    }
}

fn plural_tests(count: usize) -> &'static str {
    if count == 1 { "test" } else { "tests" }
}

pub(crate) fn write_predictions(set: &PredictionSet, styles: &ReporterStyles, out: &mut String) {
    if set.likely_failures.is_empty() {
        swriteln!(out, "{:>12} no likely failures", "RISK".style(styles.pass));
    }
    for prediction in &set.likely_failures {
        swriteln!(
            out,
            "{:>12} [{:>5.1}%] {}: {}",
            "RISK".style(styles.fail),
            prediction.probability * 100.0,
            prediction.test.style(styles.count),
            prediction.reason,
        );
    }
    for (index, test) in set.optimized_order.iter().enumerate() {
        let heading = if index == 0 { "ORDER" } else { "" };
        swriteln!(out, "{:>12} {}. {test}", heading.style(styles.count), index + 1);
    }
}
