// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testlens: live intelligence over streaming test output.
//!
//! Output flows through the engine like so:
//!
//! 1. Chunks of raw text are passed to [`TestMonitor::feed`](monitor::TestMonitor::feed).
//! 2. The [`DebounceCoordinator`](debounce::DebounceCoordinator) buffers them until the stream
//!    has been quiet for a while.
//! 3. The buffered lines are parsed in a single pass: the
//!    [`LineClassifier`](classify::LineClassifier) turns each line into a raw signal, and the
//!    [`OutputParser`](parser::OutputParser) turns signals into [`TestEvent`](events::TestEvent)s.
//! 4. Each event is folded into the [`MetricsAggregator`](metrics::MetricsAggregator), then
//!    delivered to subscribed [`TestWatcher`](watcher::TestWatcher)s.
//!
//! Separately, the [`PredictionEngine`](predict::PredictionEngine) ranks tests by failure risk
//! using historical data from an [`InsightStore`](insight::InsightStore).

pub mod classify;
pub mod config;
pub mod debounce;
pub mod errors;
pub mod events;
pub mod insight;
pub mod metrics;
pub mod monitor;
pub mod parser;
pub mod predict;
mod time;
pub mod watcher;
