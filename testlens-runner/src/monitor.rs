// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The monitor: the host-facing handle to the engine.
//!
//! The main structure in this module is [`TestMonitor`], built with a [`TestMonitorBuilder`].
//! Output fed to the monitor is forwarded to a dispatcher task, which owns the debounce
//! coordinator and the parser. Once the output goes quiet, the dispatcher parses the buffered
//! lines, folds each event into the metrics and notifies watchers, all in line order.

mod dispatcher;
mod imp;

pub use imp::*;
