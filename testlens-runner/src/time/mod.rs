// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod quiet_timer;
mod stopwatch;

pub(crate) use quiet_timer::*;
pub(crate) use stopwatch::*;
