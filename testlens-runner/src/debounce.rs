// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coalesce bursts of output into parse passes.
//!
//! Output arrives in arbitrary chunks. Every chunk is appended to a [`LineBuffer`] and pushes
//! the quiet-period deadline out; once the stream has been quiet for the configured period, the
//! buffered lines are handed over as a single pass. Chunks therefore never trigger a pass on
//! their own, and any number of chunks within one quiet period produce exactly one pass.

use crate::time::{QuietTimer, quiet_timer};
use std::{mem, pin::Pin, time::Duration};

/// Accumulates chunks of text and splits them into lines.
///
/// A line is complete once its terminating `\n` has been seen. The text after the last `\n` is
/// kept as a partial line until more input arrives.
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    complete: Vec<String>,
    partial: String,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of text.
    pub fn push(&mut self, chunk: &str) {
        let mut rest = chunk;
        while let Some(index) = rest.find('\n') {
            self.partial.push_str(&rest[..index]);
            self.complete.push(mem::take(&mut self.partial));
            rest = &rest[index + 1..];
        }
        self.partial.push_str(rest);
    }

    /// Takes all complete lines out of the buffer.
    ///
    /// If `include_partial` is true, a non-empty partial line is taken as well and treated as
    /// complete.
    pub fn take_lines(&mut self, include_partial: bool) -> Vec<String> {
        let mut lines = mem::take(&mut self.complete);
        if include_partial && !self.partial.is_empty() {
            lines.push(mem::take(&mut self.partial));
        }
        lines
    }

    /// Discards everything in the buffer.
    pub fn discard(&mut self) {
        self.complete.clear();
        self.partial.clear();
    }

    /// Returns true if the buffer holds no text.
    pub fn is_empty(&self) -> bool {
        self.complete.is_empty() && self.partial.is_empty()
    }
}

/// Schedules parse passes so that each burst of output is parsed once.
///
/// The coordinator owns the pending buffer and the quiet-period timer. It is driven by whoever
/// owns it: call [`feed`](Self::feed) as output arrives, wait for the quiet period while
/// [`is_pending`](Self::is_pending) is true, then call [`take_pass`](Self::take_pass).
#[derive(Debug)]
pub struct DebounceCoordinator {
    buffer: LineBuffer,
    timer: Pin<Box<QuietTimer>>,
    flush_partial_lines: bool,
}

impl DebounceCoordinator {
    /// Creates a coordinator with the given quiet period.
    ///
    /// If `flush_partial_lines` is true, a trailing line without a newline is parsed at the end
    /// of a quiet period. Otherwise it waits in the buffer for its newline.
    pub fn new(quiet_period: Duration, flush_partial_lines: bool) -> Self {
        Self {
            buffer: LineBuffer::new(),
            timer: Box::pin(quiet_timer(quiet_period)),
            flush_partial_lines,
        }
    }

    /// Appends a chunk and restarts the quiet period.
    ///
    /// Empty chunks are ignored and leave any pending deadline untouched.
    pub fn feed(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.push(chunk);
        self.timer.as_mut().rearm();
    }

    /// Returns true if a pass is scheduled.
    pub fn is_pending(&self) -> bool {
        self.timer.is_armed()
    }

    /// Returns a future that completes once the quiet period has elapsed.
    ///
    /// The future never completes while no pass is scheduled, so it is meant to be guarded by
    /// `is_pending` inside a `select!` loop.
    pub(crate) fn quiet(&mut self) -> Pin<&mut QuietTimer> {
        self.timer.as_mut()
    }

    /// Cancels the scheduled pass, if any, and returns the buffered lines.
    pub fn take_pass(&mut self) -> Vec<String> {
        self.timer.as_mut().disarm();
        self.buffer.take_lines(self.flush_partial_lines)
    }

    /// Cancels the scheduled pass and discards everything buffered.
    pub fn stop(&mut self) {
        self.timer.as_mut().disarm();
        self.buffer.discard();
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
