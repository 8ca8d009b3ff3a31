// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testlens.

use crate::watcher::WatcherCallback;
use camino::Utf8PathBuf;
use std::{error, fmt};
use testlens_metadata::TestRef;
use thiserror::Error;
use tracing::warn;

/// An error that occurred while loading monitor configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file was explicitly requested but does not exist.
    #[error("testlens config file not found at `{path}`")]
    FileNotFound {
        /// The path that was requested.
        path: Utf8PathBuf,
    },

    /// An error occurred while reading the config file.
    #[error("failed to read testlens config at `{path}`")]
    Read {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying I/O error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while parsing the config file.
    #[error("failed to parse testlens config at `{path}`")]
    Parse {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying TOML error.
        #[source]
        error: toml::de::Error,
    },

    /// A duration that must be non-zero was zero.
    #[error("`{key}` must be greater than zero")]
    ZeroDuration {
        /// The config key.
        key: &'static str,
    },

    /// A length that must be non-zero was zero.
    #[error("`{key}` must be greater than zero")]
    ZeroLength {
        /// The config key.
        key: &'static str,
    },

    /// A probability was outside `[0, 1]`.
    #[error("`{key}` must be between 0 and 1, found {value}")]
    ProbabilityOutOfRange {
        /// The config key.
        key: &'static str,

        /// The value found.
        value: f64,
    },

    /// A rate that must be positive was not.
    #[error("`{key}` must be a positive number, found {value}")]
    NonPositiveRate {
        /// The config key.
        key: &'static str,

        /// The value found.
        value: f64,
    },

    /// No output dialects were enabled.
    #[error("`classifier.dialects` must list at least one dialect")]
    NoDialects,
}

/// An error returned while building a [`TestMonitor`](crate::monitor::TestMonitor).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MonitorBuildError {
    /// The monitor was built outside of a tokio runtime.
    #[error("a testlens monitor must be built from within a tokio runtime")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),
}

/// An error returned by a [`TestWatcher`](crate::watcher::TestWatcher) callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WatcherError {
    message: String,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl WatcherError {
    /// Creates a new watcher error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new watcher error with the given message and underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error returned by an [`InsightStore`](crate::insight::InsightStore).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InsightStoreError {
    message: String,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl InsightStoreError {
    /// Creates a new insight store error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new insight store error with the given message and underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error that occurred while loading an insight snapshot into an
/// [`InMemoryInsightStore`](crate::insight::InMemoryInsightStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InsightLoadError {
    /// An error occurred while reading the snapshot.
    #[error("failed to read insight snapshot at `{path}`")]
    Read {
        /// The path to the snapshot.
        path: Utf8PathBuf,

        /// The underlying I/O error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while parsing the snapshot.
    #[error("failed to parse insight snapshot at `{path}`")]
    Parse {
        /// The path to the snapshot.
        path: Utf8PathBuf,

        /// The underlying JSON error.
        #[source]
        error: serde_json::Error,
    },
}

/// A non-fatal error raised while the engine is running.
///
/// These never interrupt a monitoring session. They are routed to the error sink configured
/// through [`TestMonitorBuilder::set_error_sink`](crate::monitor::TestMonitorBuilder::set_error_sink).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A watcher callback returned an error.
    #[error("watcher `{watcher}` failed in {callback}")]
    WatcherFailed {
        /// The name of the watcher.
        watcher: String,

        /// The callback that failed.
        callback: WatcherCallback,

        /// The error returned.
        #[source]
        error: WatcherError,
    },

    /// A watcher callback panicked.
    #[error("watcher `{watcher}` panicked in {callback}: {message}")]
    WatcherPanicked {
        /// The name of the watcher.
        watcher: String,

        /// The callback that panicked.
        callback: WatcherCallback,

        /// The panic message, if it was a string.
        message: String,
    },

    /// The insight store failed for a prediction candidate.
    #[error("insight store failed for `{test}`")]
    InsightStore {
        /// The candidate being looked up.
        test: TestRef,

        /// The error returned by the store.
        #[source]
        error: InsightStoreError,
    },
}

impl EngineError {
    /// Logs this error as a warning, with the watcher or test it concerns as fields.
    pub(crate) fn log_warning(&self) {
        let chain = DisplayErrorChain::new(self);
        match self {
            Self::WatcherFailed { watcher, .. } | Self::WatcherPanicked { watcher, .. } => {
                warn!(watcher = %watcher, "{chain}");
            }
            Self::InsightStore { test, .. } => {
                warn!(
                    test_name = %test.test_name,
                    file_name = test.file_name.as_deref(),
                    "{chain}, treating as no history",
                );
            }
        }
    }
}

/// Displays an error followed by each of its sources, separated by `: `.
#[derive(Clone, Copy, Debug)]
pub struct DisplayErrorChain<E>(E);

impl<E: error::Error> DisplayErrorChain<E> {
    /// Wraps `error` for display.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex, PoisonError},
    };
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn log_output(error: &EngineError) -> String {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || error.log_warning());
        logs.contents()
    }

    #[test]
    fn watcher_errors_are_logged_with_the_watcher_name() {
        let output = log_output(&EngineError::WatcherPanicked {
            watcher: "junit".to_owned(),
            callback: WatcherCallback::TestComplete,
            message: "boom".to_owned(),
        });
        assert!(output.contains("WARN"), "logged at warn: {output}");
        assert!(output.contains("watcher=junit"), "watcher field: {output}");
        assert!(
            output.contains("watcher `junit` panicked in on_test_complete: boom"),
            "message: {output}"
        );
    }

    #[test]
    fn store_errors_are_logged_with_the_test() {
        let output = log_output(&EngineError::InsightStore {
            test: TestRef::with_file("adds", "math.spec.ts"),
            error: InsightStoreError::new("timed out"),
        });
        assert!(output.contains("test_name=adds"), "test_name field: {output}");
        assert!(output.contains("file_name="), "file_name field: {output}");
        assert!(output.contains("math.spec.ts"), "file name value: {output}");
        assert!(output.contains("timed out, treating as no history"), "message: {output}");
    }

    #[test]
    fn error_chain_includes_sources() {
        let error = EngineError::WatcherFailed {
            watcher: "junit".to_owned(),
            callback: WatcherCallback::SuiteComplete,
            error: WatcherError::with_source(
                "failed to write report",
                std::io::Error::other("disk full"),
            ),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "watcher `junit` failed in on_suite_complete: failed to write report: disk full"
        );
    }
}
