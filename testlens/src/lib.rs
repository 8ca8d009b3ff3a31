// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A command-line host for testlens.
//!
//! `testlens watch` reads a test tool's output from standard input and reports progress,
//! failures and final metrics as the run goes. `testlens predict` ranks tests by their risk of
//! failing, based on a snapshot of historical insights.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
