// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The insight store contract and its implementations.
//!
//! Historical statistics are owned by an external collaborator implementing [`InsightStore`].
//! The engine only reads insights and forwards newly learned failures; it never mutates an
//! insight it has been handed.

use crate::errors::{EngineError, InsightLoadError, InsightStoreError};
use camino::Utf8Path;
use chrono::Local;
use futures::future::{BoxFuture, FutureExt};
use std::{
    collections::BTreeMap,
    fmt,
    io::Read,
    sync::{Arc, PoisonError, RwLock},
};
use testlens_metadata::{FailureRecord, TestInsight, TestRef};
use tracing::debug;

/// A source of per-test historical statistics.
///
/// Implementations must return `Ok(None)` for tests they know nothing about. Returning an error
/// is reserved for the store itself being unavailable.
pub trait InsightStore: Send + Sync {
    /// Looks up the insight for a test.
    fn get_insight<'a>(
        &'a self,
        test: &'a TestRef,
    ) -> BoxFuture<'a, Result<Option<TestInsight>, InsightStoreError>>;

    /// Records a learned pattern/solution pair for a failing test.
    fn record_failure(&self, record: FailureRecord) -> BoxFuture<'_, Result<(), InsightStoreError>>;
}

/// An insight store with no history, and which discards recorded failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyInsightStore;

impl InsightStore for EmptyInsightStore {
    fn get_insight<'a>(
        &'a self,
        _test: &'a TestRef,
    ) -> BoxFuture<'a, Result<Option<TestInsight>, InsightStoreError>> {
        futures::future::ready(Ok(None)).boxed()
    }

    fn record_failure(&self, _record: FailureRecord) -> BoxFuture<'_, Result<(), InsightStoreError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

/// The engine's handle to an [`InsightStore`].
#[derive(Clone)]
pub struct InsightStoreClient {
    store: Arc<dyn InsightStore>,
}

impl fmt::Debug for InsightStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsightStoreClient").finish_non_exhaustive()
    }
}

impl InsightStoreClient {
    /// Creates a new client over `store`.
    pub fn new(store: Arc<dyn InsightStore>) -> Self {
        Self { store }
    }

    /// Looks up the insight for a test.
    ///
    /// A store error is returned as an [`EngineError`] naming the test, so that callers can
    /// treat the test as having no history and carry on.
    pub async fn insight(&self, test: &TestRef) -> Result<Option<TestInsight>, EngineError> {
        let result = self.store.get_insight(test).await;
        debug!(%test, found = matches!(result, Ok(Some(_))), "looked up insight");
        result.map_err(|error| EngineError::InsightStore {
            test: test.clone(),
            error,
        })
    }

    /// Forwards a failure record to the store.
    pub async fn record_failure(&self, record: FailureRecord) -> Result<(), InsightStoreError> {
        debug!(test = %record.test, pattern = %record.pattern.kind, "recording failure");
        self.store.record_failure(record).await
    }
}

impl Default for InsightStoreClient {
    fn default() -> Self {
        Self::new(Arc::new(EmptyInsightStore))
    }
}

/// An insight store held in memory.
///
/// Useful for hosts that load a snapshot of insights at startup, and for tests. Nothing is
/// persisted.
#[derive(Debug, Default)]
pub struct InMemoryInsightStore {
    inner: RwLock<InMemoryInner>,
}

#[derive(Debug, Default)]
struct InMemoryInner {
    insights: BTreeMap<TestRef, TestInsight>,
    recorded: Vec<FailureRecord>,
}

impl InMemoryInsightStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `insights`. Later entries replace earlier ones for the same
    /// test.
    pub fn from_insights(insights: impl IntoIterator<Item = TestInsight>) -> Self {
        let insights = insights
            .into_iter()
            .map(|insight| (insight.test.clone(), insight))
            .collect();
        Self {
            inner: RwLock::new(InMemoryInner {
                insights,
                recorded: Vec::new(),
            }),
        }
    }

    /// Creates a store from a JSON array of insights.
    pub fn from_json_reader(reader: impl Read) -> Result<Self, serde_json::Error> {
        let insights: Vec<TestInsight> = serde_json::from_reader(reader)?;
        Ok(Self::from_insights(insights))
    }

    /// Creates a store from a JSON file containing an array of insights.
    pub fn from_path(path: &Utf8Path) -> Result<Self, InsightLoadError> {
        let contents = std::fs::read_to_string(path).map_err(|error| InsightLoadError::Read {
            path: path.to_owned(),
            error,
        })?;
        let insights: Vec<TestInsight> =
            serde_json::from_str(&contents).map_err(|error| InsightLoadError::Parse {
                path: path.to_owned(),
                error,
            })?;
        debug!(%path, count = insights.len(), "loaded insight snapshot");
        Ok(Self::from_insights(insights))
    }

    /// Returns the number of tests with insights.
    pub fn len(&self) -> usize {
        self.read().insights.len()
    }

    /// Returns true if the store holds no insights.
    pub fn is_empty(&self) -> bool {
        self.read().insights.is_empty()
    }

    /// Returns every failure recorded so far, oldest first.
    pub fn recorded_failures(&self) -> Vec<FailureRecord> {
        self.read().recorded.clone()
    }

    /// Looks up an insight without going through the async interface.
    ///
    /// An exact match on name and file wins. Otherwise a query without a file matches the first
    /// insight with the same name, and a query with a file matches an insight recorded without
    /// one.
    pub fn lookup(&self, test: &TestRef) -> Option<TestInsight> {
        let inner = self.read();
        if let Some(insight) = inner.insights.get(test) {
            return Some(insight.clone());
        }
        match &test.file_name {
            None => inner
                .insights
                .range(test.clone()..)
                .next()
                .filter(|(key, _)| key.test_name == test.test_name)
                .map(|(_, insight)| insight.clone()),
            Some(_) => inner
                .insights
                .get(&TestRef::new(test.test_name.clone()))
                .cloned(),
        }
    }

    fn record(&self, record: FailureRecord) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let insight = inner
            .insights
            .entry(record.test.clone())
            .or_insert_with(|| TestInsight::new(record.test.clone(), 0.0));

        match insight
            .patterns
            .iter_mut()
            .find(|pattern| pattern.kind == record.pattern.kind)
        {
            Some(existing) => {
                existing.confidence = existing.confidence.max(record.pattern.confidence);
                existing
                    .evidence
                    .extend(record.pattern.evidence.iter().cloned());
                if !record.pattern.suggestion.is_empty() {
                    existing.suggestion = record.pattern.suggestion.clone();
                }
            }
            None => insight.patterns.push(record.pattern.clone()),
        }
        insight.last_failures.push(Local::now().fixed_offset());
        if !record.solution.is_empty() {
            insight.recommended_action = record.solution.clone();
        }
        inner.recorded.push(record);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InsightStore for InMemoryInsightStore {
    fn get_insight<'a>(
        &'a self,
        test: &'a TestRef,
    ) -> BoxFuture<'a, Result<Option<TestInsight>, InsightStoreError>> {
        futures::future::ready(Ok(self.lookup(test))).boxed()
    }

    fn record_failure(&self, record: FailureRecord) -> BoxFuture<'_, Result<(), InsightStoreError>> {
        self.record(record);
        futures::future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use testlens_metadata::{Pattern, PatternKind};

    const SNAPSHOT: &str = indoc! {r#"
        [
            {
                "test-name": "critical",
                "failure-rate": 1.0,
                "patterns": [{ "type": "always_fails", "confidence": 0.95 }]
            },
            {
                "test-name": "adds",
                "file-name": "math.spec.ts",
                "failure-rate": 0.25,
                "average-duration": "40ms"
            }
        ]
    "#};

    #[test]
    fn lookup_falls_back_between_file_and_name() {
        let store =
            InMemoryInsightStore::from_json_reader(SNAPSHOT.as_bytes()).expect("snapshot parses");
        assert_eq!(store.len(), 2);

        let exact = store.lookup(&TestRef::with_file("adds", "math.spec.ts"));
        assert_eq!(exact.map(|insight| insight.failure_rate), Some(0.25));

        let by_name = store.lookup(&TestRef::new("adds"));
        assert_eq!(by_name.map(|insight| insight.failure_rate), Some(0.25));

        let with_file = store.lookup(&TestRef::with_file("critical", "core.spec.ts"));
        assert_eq!(with_file.map(|insight| insight.failure_rate), Some(1.0));

        assert_eq!(store.lookup(&TestRef::with_file("adds", "other.spec.ts")), None);
        assert_eq!(store.lookup(&TestRef::new("unknown")), None);
    }

    #[tokio::test]
    async fn record_failure_merges_patterns() {
        let store = InMemoryInsightStore::new();
        let test = TestRef::with_file("flaky", "net.spec.ts");
        let record = |confidence, solution: &str| FailureRecord {
            test: test.clone(),
            pattern: Pattern {
                evidence: vec![format!("seen at {confidence}")],
                ..Pattern::new(PatternKind::Flaky, confidence)
            },
            solution: solution.to_owned(),
        };

        store
            .record_failure(record(0.4, "retry the connection"))
            .await
            .expect("in-memory store never fails");
        store
            .record_failure(record(0.7, ""))
            .await
            .expect("in-memory store never fails");

        let insight = store
            .get_insight(&test)
            .await
            .expect("in-memory store never fails")
            .expect("insight was created");
        assert_eq!(insight.patterns.len(), 1);
        assert_eq!(insight.patterns[0].confidence, 0.7);
        assert_eq!(insight.patterns[0].evidence, vec!["seen at 0.4", "seen at 0.7"]);
        assert_eq!(insight.last_failures.len(), 2);
        assert_eq!(insight.recommended_action, "retry the connection");
        assert_eq!(store.recorded_failures().len(), 2);
    }

    #[tokio::test]
    async fn client_wraps_store_errors() {
        struct Broken;

        impl InsightStore for Broken {
            fn get_insight<'a>(
                &'a self,
                _test: &'a TestRef,
            ) -> BoxFuture<'a, Result<Option<TestInsight>, InsightStoreError>> {
                async { Err(InsightStoreError::new("connection refused")) }.boxed()
            }

            fn record_failure(
                &self,
                _record: FailureRecord,
            ) -> BoxFuture<'_, Result<(), InsightStoreError>> {
                async { Err(InsightStoreError::new("read-only")) }.boxed()
            }
        }

        let client = InsightStoreClient::new(Arc::new(Broken));
        let error = client
            .insight(&TestRef::new("t"))
            .await
            .expect_err("store is broken");
        assert!(
            matches!(&error, EngineError::InsightStore { test, .. } if test.test_name == "t"),
            "{error:?}"
        );
        assert_eq!(
            InsightStoreClient::default()
                .insight(&TestRef::new("t"))
                .await
                .expect("empty store never fails"),
            None
        );
    }

    #[test]
    fn from_path_reports_errors() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            InMemoryInsightStore::from_path(&missing),
            Err(InsightLoadError::Read { .. })
        ));

        let invalid = dir.path().join("invalid.json");
        std::fs::write(&invalid, "{ not json").expect("wrote file");
        assert!(matches!(
            InMemoryInsightStore::from_path(&invalid),
            Err(InsightLoadError::Parse { .. })
        ));

        let valid = dir.path().join("insights.json");
        std::fs::write(&valid, SNAPSHOT).expect("wrote file");
        let store = InMemoryInsightStore::from_path(&valid).expect("snapshot loads");
        assert!(!store.is_empty());
    }
}
