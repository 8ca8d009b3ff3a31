// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
    reporter::{LineReporter, MessageFormat, write_predictions},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::{
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};
use testlens_metadata::{PredictionSet, TestRef, TestlensExitCode};
use testlens_runner::{
    config::{ConfigLocation, MonitorConfig},
    errors::WatcherError,
    events::TestEvent,
    insight::InMemoryInsightStore,
    monitor::{TestMonitor, TestMonitorBuilder},
    watcher::TestWatcher,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Live intelligence for streaming test output.
///
/// Pipe a test tool's output into `testlens watch` to follow progress and failures as they
/// happen, or use `testlens predict` to rank tests by their risk of failing.
#[derive(Debug, Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct TestlensApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl TestlensApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeCreateError { err })?;
        match self.command {
            Command::Watch(opts) => runtime.block_on(opts.exec(output)),
            Command::Predict(opts) => runtime.block_on(opts.exec(output)),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow test output on standard input
    ///
    /// Prints a line for every completed test, then the final metrics once input ends. Exits
    /// with code 100 if any test failed.
    Watch(WatchOpts),

    /// Rank tests by their risk of failing
    Predict(PredictOpts),
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Config file to use, or `none` for built-in defaults
    ///
    /// Defaults to the file named by TESTLENS_CONFIG, if set.
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl CommonOpts {
    fn load(&self) -> Result<MonitorConfig> {
        let location = ConfigLocation::from_cli(self.config.as_deref());
        Ok(MonitorConfig::from_location(location)?)
    }
}

#[derive(Debug, Args)]
struct WatchOpts {
    #[clap(flatten)]
    common: CommonOpts,

    /// JSON snapshot of historical insights, used when printing predictions
    #[arg(long, value_name = "FILE")]
    insights: Option<Utf8PathBuf>,

    /// After input ends, rank the tests seen in this run by their risk of failing
    #[arg(long, requires = "insights")]
    predict: bool,
}

impl WatchOpts {
    async fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.common.load()?;
        let mut builder = TestMonitorBuilder::new(config);
        if let Some(path) = &self.insights {
            builder.set_insight_store(Arc::new(InMemoryInsightStore::from_path(path)?));
        }
        let monitor = builder.build()?;

        let mut reporter = LineReporter::new(
            self.common.message_format,
            output.reporter_styles(),
            std::io::stdout(),
        );
        reporter.set_show_starts(output.verbose);
        monitor.subscribe(reporter);
        let tracker = SeenTests::default();
        monitor.subscribe(tracker.clone());

        monitor.start_monitoring();
        let read_result = feed_stdin(&monitor).await;
        monitor.flush_now().await;
        monitor.stop_monitoring().await;
        read_result?;

        if self.predict {
            let predictions = monitor.get_predictions(&tracker.into_tests()).await;
            print_predictions(&predictions, self.common.message_format, output)?;
        }

        let metrics = monitor.snapshot();
        monitor.shutdown().await;
        debug!(completed = metrics.completed(), failed = metrics.failed, "watch finished");
        if metrics.any_failed() {
            Ok(TestlensExitCode::TEST_RUN_FAILED)
        } else {
            Ok(TestlensExitCode::OK)
        }
    }
}

/// Feeds standard input to the monitor until it is closed.
async fn feed_stdin(monitor: &TestMonitor) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut chunk = vec![0; 8192];
    loop {
        let read = stdin
            .read(&mut chunk)
            .await
            .map_err(|err| ExpectedError::StdinReadError { err })?;
        if read == 0 {
            return Ok(());
        }
        monitor.feed(&chunk[..read]);
    }
}

/// Collects the distinct tests that completed during a watch.
#[derive(Clone, Debug, Default)]
struct SeenTests {
    tests: Arc<Mutex<Vec<TestRef>>>,
}

impl SeenTests {
    fn into_tests(self) -> Vec<TestRef> {
        let tests = self.tests.lock().unwrap_or_else(PoisonError::into_inner);
        tests.clone()
    }
}

impl TestWatcher for SeenTests {
    fn name(&self) -> &str {
        "seen-tests"
    }

    fn on_test_complete(&mut self, event: &TestEvent) -> std::result::Result<(), WatcherError> {
        if let Some(test) = event.kind.test_ref() {
            let mut tests = self.tests.lock().unwrap_or_else(PoisonError::into_inner);
            if !tests.contains(&test) {
                tests.push(test);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
struct PredictOpts {
    #[clap(flatten)]
    common: CommonOpts,

    /// JSON snapshot of historical insights
    #[arg(long, value_name = "FILE")]
    insights: Utf8PathBuf,

    /// Tests to rank, as `name` or `file::name`
    #[arg(value_name = "TEST", required = true)]
    tests: Vec<String>,
}

impl PredictOpts {
    async fn exec(self, output: OutputContext) -> Result<i32> {
        let config = self.common.load()?;
        let store = InMemoryInsightStore::from_path(&self.insights)?;
        debug!(insights = store.len(), path = %self.insights, "loaded insights");

        let mut builder = TestMonitorBuilder::new(config);
        builder.set_insight_store(Arc::new(store));
        let monitor = builder.build()?;

        let candidates: Vec<_> = self.tests.iter().map(|test| TestRef::parse(test)).collect();
        let predictions = monitor.get_predictions(&candidates).await;
        monitor.shutdown().await;

        print_predictions(&predictions, self.common.message_format, output)?;
        Ok(TestlensExitCode::OK)
    }
}

fn print_predictions(
    predictions: &PredictionSet,
    format: MessageFormat,
    output: OutputContext,
) -> Result<()> {
    let mut out = match format {
        MessageFormat::Human => {
            let mut out = String::new();
            write_predictions(predictions, &output.reporter_styles(), &mut out);
            out
        }
        MessageFormat::Json => serde_json::to_string(predictions)
            .map_err(|err| ExpectedError::SerializeError { err })?,
    };
    if !out.ends_with('\n') {
        out.push('\n');
    }

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(out.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| ExpectedError::WriteOutputError { err })
}
