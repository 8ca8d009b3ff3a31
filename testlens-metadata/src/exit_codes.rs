// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `testlens` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TestlensExitCode {}

impl TestlensExitCode {
    /// No errors occurred and testlens exited normally.
    pub const OK: i32 = 0;

    /// One or more tests in the observed output failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A user issue happened while setting up a testlens invocation, e.g. an invalid config
    /// file.
    pub const SETUP_ERROR: i32 = 96;

    /// An insight snapshot could not be read or parsed.
    pub const INSIGHTS_LOAD_FAILED: i32 = 97;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
