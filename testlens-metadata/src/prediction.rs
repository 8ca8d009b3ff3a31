// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestRef;
use serde::{Deserialize, Serialize};

/// A predicted failure for a single test.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Prediction {
    /// The test this prediction is for.
    #[serde(flatten)]
    pub test: TestRef,

    /// The estimated probability that the test fails on this run, in `[0, 1]`.
    pub probability: f64,

    /// A human-readable explanation for the estimate.
    pub reason: String,
}

/// The result of ranking a set of candidate tests by failure risk.
///
/// Recomputed on demand and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PredictionSet {
    /// Tests likely to fail, sorted by descending probability.
    pub likely_failures: Vec<Prediction>,

    /// All candidates in a fail-fast execution order: highest risk first, tests with no
    /// history last.
    pub optimized_order: Vec<TestRef>,
}

impl PredictionSet {
    /// Returns true if no candidate was predicted to fail.
    pub fn is_empty(&self) -> bool {
        self.likely_failures.is_empty()
    }
}
