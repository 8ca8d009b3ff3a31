// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use owo_colors::OwoColorize;
use std::error::Error;
use testlens_metadata::TestlensExitCode;
use testlens_runner::errors::{ConfigError, InsightLoadError, MonitorBuildError};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholder messages. Errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An error that testlens knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config error")]
    ConfigError {
        #[from]
        err: ConfigError,
    },
    #[error("failed to create async runtime")]
    RuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("monitor build error")]
    MonitorBuildError {
        #[from]
        err: MonitorBuildError,
    },
    #[error("failed to load insights")]
    InsightLoadError {
        #[from]
        err: InsightLoadError,
    },
    #[error("failed to read test output")]
    StdinReadError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize output")]
    SerializeError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigError { .. }
            | Self::RuntimeCreateError { .. }
            | Self::MonitorBuildError { .. }
            | Self::StdinReadError { .. } => TestlensExitCode::SETUP_ERROR,
            Self::InsightLoadError { .. } => TestlensExitCode::INSIGHTS_LOAD_FAILED,
            Self::WriteOutputError { .. } | Self::SerializeError { .. } => {
                TestlensExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RuntimeCreateError { err } => {
                error!("failed to create async runtime");
                Some(err as &dyn Error)
            }
            Self::MonitorBuildError { err } => {
                error!("{err}");
                err.source()
            }
            Self::InsightLoadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::StdinReadError { err } => {
                error!("failed to read test output from stdin");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
            Self::SerializeError { err } => {
                error!("failed to serialize output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(
                target: NO_HEADING,
                "\n{}\n  {}",
                "Caused by:".style(styles.bold),
                err,
            );
            next_error = err.source();
        }
    }
}
