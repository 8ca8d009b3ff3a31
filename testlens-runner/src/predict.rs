// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rank tests by their estimated risk of failing.
//!
//! Scores come from historical insights: the base score is the test's failure rate, raised to
//! the confidence of a `flaky` or `always_fails` pattern if one is present. Candidates are then
//! ordered highest-risk first, with tests that have no history at the end in their original
//! order.

use crate::{
    errors::{EngineError, InsightStoreError},
    insight::InsightStoreClient,
};
use futures::future::join_all;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::BTreeSet;
use testlens_metadata::{FailureRecord, Prediction, PredictionSet, TestInsight, TestRef};

/// Thresholds used by the [`PredictionEngine`].
///
/// This is the `[prediction]` section of the [monitor config](crate::config::MonitorConfig).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PredictionConfig {
    /// Only tests scoring strictly above this are listed as likely failures.
    pub min_probability: f64,

    /// If set, a test that already failed in the current session scores at least this much.
    #[serde(default)]
    pub live_failure_boost: Option<f64>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.0,
            live_failure_boost: None,
        }
    }
}

/// The result of a prediction, along with any store errors encountered while computing it.
#[derive(Debug, Default)]
pub struct PredictionReport {
    /// The ranked predictions.
    pub set: PredictionSet,

    /// One error for each candidate whose lookup failed. Those candidates were treated as having
    /// no history.
    pub errors: Vec<EngineError>,
}

/// Combines insights with the current run to rank tests by failure risk.
#[derive(Clone, Debug)]
pub struct PredictionEngine {
    client: InsightStoreClient,
    config: PredictionConfig,
}

impl PredictionEngine {
    /// Creates a new engine.
    pub fn new(client: InsightStoreClient, config: PredictionConfig) -> Self {
        Self { client, config }
    }

    /// Computes predictions for `candidates`, logging any store errors.
    pub async fn get_predictions(&self, candidates: &[TestRef]) -> PredictionSet {
        let report = self.predict(candidates, &BTreeSet::new()).await;
        for error in &report.errors {
            error.log_warning();
        }
        report.set
    }

    /// Computes predictions for `candidates`.
    ///
    /// `live_failures` are the tests that have already failed in the current session. Store
    /// lookups run concurrently; a failed lookup is reported in
    /// [`PredictionReport::errors`] and never aborts the batch.
    pub async fn predict(
        &self,
        candidates: &[TestRef],
        live_failures: &BTreeSet<TestRef>,
    ) -> PredictionReport {
        let lookups = join_all(candidates.iter().map(|test| self.client.insight(test))).await;

        let mut errors = Vec::new();
        let mut scored = Vec::new();
        let mut unscored = Vec::new();
        for (test, lookup) in candidates.iter().zip(lookups) {
            let insight = lookup.unwrap_or_else(|error| {
                errors.push(error);
                None
            });
            let failed_live = failed_in_session(test, live_failures);
            match self.score(insight.as_ref(), failed_live) {
                Some((probability, reason)) => scored.push(Prediction {
                    test: test.clone(),
                    probability,
                    reason,
                }),
                None => unscored.push(test.clone()),
            }
        }

        // Stable sorts keep input order among equal scores.
        let ranked: Vec<Prediction> = scored
            .into_iter()
            .sorted_by(|a, b| b.probability.total_cmp(&a.probability))
            .collect();
        let optimized_order = ranked
            .iter()
            .map(|prediction| prediction.test.clone())
            .chain(unscored)
            .collect();
        let likely_failures = ranked
            .into_iter()
            .filter(|prediction| prediction.probability > self.config.min_probability)
            .collect();

        PredictionReport {
            set: PredictionSet {
                likely_failures,
                optimized_order,
            },
            errors,
        }
    }

    /// Forwards a learned failure to the insight store.
    pub async fn record_failure(&self, record: FailureRecord) -> Result<(), InsightStoreError> {
        self.client.record_failure(record).await
    }

    /// Returns the score and reason for a candidate, or `None` if nothing is known about it.
    fn score(&self, insight: Option<&TestInsight>, failed_live: bool) -> Option<(f64, String)> {
        let historical = insight.map(|insight| {
            let base = unit(insight.failure_rate);
            let pattern = insight.strongest_risk_pattern();
            let score = pattern.map_or(base, |pattern| base.max(unit(pattern.confidence)));
            (score, reason(insight, base))
        });

        let boost = self
            .config
            .live_failure_boost
            .filter(|_| failed_live)
            .map(unit);
        match (historical, boost) {
            (Some((score, _)), Some(boost)) if boost > score => {
                Some((boost, "already failed in this session".to_owned()))
            }
            (Some(historical), _) => Some(historical),
            (None, Some(boost)) => Some((boost, "already failed in this session".to_owned())),
            (None, None) => None,
        }
    }
}

fn failed_in_session(test: &TestRef, live_failures: &BTreeSet<TestRef>) -> bool {
    if live_failures.contains(test) {
        return true;
    }
    // Output often names tests without their file. Match on the name alone only when one side
    // has no file; two different files never match.
    live_failures.iter().any(|failed| {
        (failed.file_name.is_none() || test.file_name.is_none())
            && failed.test_name == test.test_name
    })
}

fn reason(insight: &TestInsight, failure_rate: f64) -> String {
    let pattern = insight.strongest_risk_pattern();
    if let Some(pattern) = pattern {
        if !pattern.suggestion.is_empty() {
            return pattern.suggestion.clone();
        }
    }
    if !insight.recommended_action.is_empty() {
        return insight.recommended_action.clone();
    }
    match pattern {
        Some(pattern) => format!(
            "{} pattern detected (confidence {:.0}%)",
            pattern.kind,
            unit(pattern.confidence) * 100.0
        ),
        None => format!("historical failure rate {:.0}%", failure_rate * 100.0),
    }
}

/// Clamps a value to `[0, 1]`, mapping NaN to 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insight::{InMemoryInsightStore, InsightStore};
    use futures::future::{BoxFuture, FutureExt};
    use pretty_assertions::assert_eq;
    use std::{sync::Arc, time::Duration};
    use test_case::test_case;
    use testlens_metadata::{Pattern, PatternKind};

    fn engine(insights: Vec<TestInsight>, config: PredictionConfig) -> PredictionEngine {
        let store = InMemoryInsightStore::from_insights(insights);
        PredictionEngine::new(InsightStoreClient::new(Arc::new(store)), config)
    }

    fn refs(names: &[&str]) -> Vec<TestRef> {
        names.iter().copied().map(TestRef::new).collect()
    }

    fn names(tests: &[TestRef]) -> Vec<&str> {
        tests.iter().map(|test| test.test_name.as_str()).collect()
    }

    #[tokio::test]
    async fn always_failing_test_is_scheduled_first() {
        let mut critical = TestInsight::new(TestRef::new("critical"), 1.0);
        critical.patterns = vec![Pattern::new(PatternKind::AlwaysFails, 0.9)];
        let engine = engine(vec![critical], PredictionConfig::default());

        let set = engine
            .get_predictions(&refs(&["regular", "critical", "another"]))
            .await;
        assert_eq!(names(&set.optimized_order), vec!["critical", "regular", "another"]);
        assert_eq!(set.likely_failures.len(), 1);
        assert_eq!(set.likely_failures[0].probability, 1.0);
        assert_eq!(
            set.likely_failures[0].reason,
            "always_fails pattern detected (confidence 90%)"
        );
    }

    #[tokio::test]
    async fn ranking_is_descending_and_stable() {
        let insights = vec![
            TestInsight::new(TestRef::new("low"), 0.1),
            TestInsight::new(TestRef::new("tie-a"), 0.5),
            TestInsight::new(TestRef::new("zero"), 0.0),
            TestInsight::new(TestRef::new("tie-b"), 0.5),
            TestInsight::new(TestRef::new("high"), 0.8),
        ];
        let engine = engine(insights, PredictionConfig::default());
        let set = engine
            .get_predictions(&refs(&[
                "unknown-1",
                "low",
                "tie-a",
                "zero",
                "tie-b",
                "high",
                "unknown-2",
            ]))
            .await;

        assert_eq!(
            names(&set.optimized_order),
            vec!["high", "tie-a", "tie-b", "low", "zero", "unknown-1", "unknown-2"]
        );
        let likely: Vec<_> = set
            .likely_failures
            .iter()
            .map(|prediction| prediction.test.test_name.as_str())
            .collect();
        assert_eq!(likely, vec!["high", "tie-a", "tie-b", "low"]);
        assert!(
            set.likely_failures
                .windows(2)
                .all(|pair| pair[0].probability >= pair[1].probability)
        );
    }

    #[test_case(0.3, None, "", "historical failure rate 30%" ; "rate only")]
    #[test_case(0.3, Some((PatternKind::Flaky, "add a retry")), "", "add a retry" ; "pattern suggestion")]
    #[test_case(0.3, Some((PatternKind::Flaky, "")), "quarantine", "quarantine" ; "recommended action")]
    #[test_case(0.3, Some((PatternKind::Slow, "")), "", "historical failure rate 30%" ; "non-risk pattern")]
    fn reasons(rate: f64, pattern: Option<(PatternKind, &str)>, action: &str, expected: &str) {
        let mut insight = TestInsight::new(TestRef::new("t"), rate);
        if let Some((kind, suggestion)) = pattern {
            insight.patterns.push(Pattern {
                suggestion: suggestion.to_owned(),
                ..Pattern::new(kind, 0.6)
            });
        }
        insight.recommended_action = action.to_owned();
        assert_eq!(reason(&insight, rate), expected);
    }

    #[tokio::test]
    async fn min_probability_filters_likely_failures_only() {
        let insights = vec![
            TestInsight::new(TestRef::new("a"), 0.2),
            TestInsight::new(TestRef::new("b"), 0.6),
        ];
        let config = PredictionConfig {
            min_probability: 0.5,
            ..PredictionConfig::default()
        };
        let set = engine(insights, config).get_predictions(&refs(&["a", "b"])).await;
        assert_eq!(set.likely_failures.len(), 1);
        assert_eq!(names(&set.optimized_order), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn out_of_range_rates_are_clamped() {
        let insights = vec![
            TestInsight::new(TestRef::new("nan"), f64::NAN),
            TestInsight::new(TestRef::new("big"), 7.0),
        ];
        let set = engine(insights, PredictionConfig::default())
            .get_predictions(&refs(&["nan", "big"]))
            .await;
        assert_eq!(names(&set.optimized_order), vec!["big", "nan"]);
        assert_eq!(set.likely_failures.len(), 1);
        assert_eq!(set.likely_failures[0].probability, 1.0);
    }

    #[tokio::test]
    async fn live_failures_are_boosted() {
        let config = PredictionConfig {
            live_failure_boost: Some(0.75),
            ..PredictionConfig::default()
        };
        let engine = engine(vec![TestInsight::new(TestRef::new("known"), 0.1)], config);
        let live = BTreeSet::from([TestRef::with_file("fresh", "a.spec.ts")]);
        let report = engine.predict(&refs(&["known", "fresh", "other"]), &live).await;

        assert_eq!(names(&report.set.optimized_order), vec!["fresh", "known", "other"]);
        assert_eq!(report.set.likely_failures[0].probability, 0.75);
        assert_eq!(
            report.set.likely_failures[0].reason,
            "already failed in this session"
        );
    }

    #[tokio::test]
    async fn live_failures_in_another_file_are_not_boosted() {
        let config = PredictionConfig {
            live_failure_boost: Some(0.9),
            ..PredictionConfig::default()
        };
        let engine = engine(Vec::new(), config);
        let live = BTreeSet::from([TestRef::with_file("adds", "a.spec.ts")]);

        let report = engine
            .predict(&[TestRef::with_file("adds", "b.spec.ts")], &live)
            .await;
        assert_eq!(report.set.likely_failures, Vec::new());
        assert_eq!(
            report.set.optimized_order,
            vec![TestRef::with_file("adds", "b.spec.ts")]
        );

        let report = engine
            .predict(&[TestRef::with_file("adds", "a.spec.ts")], &live)
            .await;
        assert_eq!(report.set.likely_failures.len(), 1);
        assert_eq!(report.set.likely_failures[0].probability, 0.9);
    }

    struct FlakyStore;

    impl InsightStore for FlakyStore {
        fn get_insight<'a>(
            &'a self,
            test: &'a TestRef,
        ) -> BoxFuture<'a, Result<Option<TestInsight>, InsightStoreError>> {
            async move {
                // Answer out of order to make sure results are matched to their candidates.
                let delay = if test.test_name == "slow" { 50 } else { 1 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                match test.test_name.as_str() {
                    "broken" => Err(InsightStoreError::new("timed out")),
                    "slow" => Ok(Some(TestInsight::new(test.clone(), 0.4))),
                    "fast" => Ok(Some(TestInsight::new(test.clone(), 0.2))),
                    _ => Ok(None),
                }
            }
            .boxed()
        }

        fn record_failure(
            &self,
            _record: FailureRecord,
        ) -> BoxFuture<'_, Result<(), InsightStoreError>> {
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_errors_fail_open() {
        let engine = PredictionEngine::new(
            InsightStoreClient::new(Arc::new(FlakyStore)),
            PredictionConfig::default(),
        );
        let report = engine
            .predict(&refs(&["broken", "fast", "slow", "none"]), &BTreeSet::new())
            .await;

        assert_eq!(names(&report.set.optimized_order), vec!["slow", "fast", "broken", "none"]);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            EngineError::InsightStore { test, .. } if test.test_name == "broken"
        ));
    }

    #[tokio::test]
    async fn record_failure_reaches_store() {
        let store = Arc::new(InMemoryInsightStore::new());
        let engine = PredictionEngine::new(
            InsightStoreClient::new(store.clone()),
            PredictionConfig::default(),
        );
        engine
            .record_failure(FailureRecord {
                test: TestRef::new("t"),
                pattern: Pattern::new(PatternKind::Timeout, 0.5),
                solution: "raise the timeout".to_owned(),
            })
            .await
            .expect("in-memory store never fails");
        assert_eq!(store.recorded_failures().len(), 1);
    }
}
