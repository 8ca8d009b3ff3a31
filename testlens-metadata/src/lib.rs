// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the data testlens exchanges with its hosts.
//!
//! This crate contains the serializable records shared between the
//! [testlens engine](https://docs.rs/testlens-runner) and the tools embedding it: live metrics
//! snapshots, summary tallies, historical insights, and prediction sets.

mod exit_codes;
mod insight;
mod metrics;
mod prediction;

pub use exit_codes::*;
pub use insight::*;
pub use metrics::*;
pub use prediction::*;
