// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monitor configuration.
//!
//! Configuration is read from TOML. The defaults live in an embedded `default-config.toml`, and
//! a user-supplied file only needs to list the keys it overrides. Unknown keys are reported as
//! warnings rather than errors.

use crate::{classify::Dialect, errors::ConfigError, predict::PredictionConfig};
use camino::Utf8Path;
use serde::Deserialize;
use std::{collections::BTreeSet, io, time::Duration};
use swrite::{SWrite, swrite};
use tracing::{debug, warn};

/// The environment variable consulted for a config file path by [`ConfigLocation::Default`].
pub const CONFIG_ENV_VAR: &str = "TESTLENS_CONFIG";

/// Special value for `--config` and `TESTLENS_CONFIG` that skips loading a config file.
pub const CONFIG_NONE: &str = "none";

/// Specifies where to load configuration from.
#[derive(Clone, Copy, Debug)]
pub enum ConfigLocation<'a> {
    /// Load the file named by `TESTLENS_CONFIG` if it is set, otherwise use built-in defaults.
    Default,

    /// Use only built-in defaults.
    Isolated,

    /// Load configuration from an explicit path.
    ///
    /// Returns an error if the file does not exist.
    Explicit(&'a Utf8Path),
}

impl<'a> ConfigLocation<'a> {
    /// Creates a config location from a CLI value.
    ///
    /// Returns `Default` if `None`, `Isolated` if `"none"`, otherwise `Explicit` with the path.
    pub fn from_cli(s: Option<&'a str>) -> Self {
        match s {
            None => Self::Default,
            Some(s) if s == CONFIG_NONE => Self::Isolated,
            Some(s) => Self::Explicit(Utf8Path::new(s)),
        }
    }
}

/// Configuration for a [`TestMonitor`](crate::monitor::TestMonitor).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorConfig {
    /// Settings for buffering and metrics.
    pub monitor: MonitorSettings,

    /// Settings for line classification.
    pub classifier: ClassifierSettings,

    /// Settings for failure prediction.
    pub prediction: PredictionConfig,
}

/// The `[monitor]` section of [`MonitorConfig`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorSettings {
    /// How long output must be quiet before buffered lines are parsed.
    #[serde(with = "humantime_serde")]
    pub quiet_period: Duration,

    /// Whether a trailing line without a newline is parsed at the end of a quiet period.
    pub flush_partial_lines: bool,

    /// Lines longer than this many bytes are truncated before classification.
    pub max_line_length: usize,

    /// The lowest rate, in tests per second, assumed when estimating the time remaining.
    pub eta_min_rate: f64,
}

/// The `[classifier]` section of [`MonitorConfig`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassifierSettings {
    /// The output dialects to recognize.
    pub dialects: Vec<Dialect>,
}

impl MonitorConfig {
    /// The embedded default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Loads configuration from the given location, layered on top of the defaults.
    pub fn from_location(location: ConfigLocation<'_>) -> Result<Self, ConfigError> {
        Self::from_location_with_warnings(location, &mut DefaultConfigWarnings)
    }

    /// Loads configuration from a TOML file, layered on top of the defaults.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        Self::from_location(ConfigLocation::Explicit(path))
    }

    fn from_location_with_warnings(
        location: ConfigLocation<'_>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::from_embedded();
        let overlay = match location {
            ConfigLocation::Isolated => {
                debug!("config: using built-in defaults (isolated)");
                None
            }
            ConfigLocation::Explicit(path) => Some(load_overlay(path, warnings)?),
            ConfigLocation::Default => match std::env::var(CONFIG_ENV_VAR) {
                Ok(path) if path == CONFIG_NONE || path.is_empty() => None,
                Ok(path) => {
                    debug!("config: {CONFIG_ENV_VAR} is set to {path}");
                    Some(load_overlay(Utf8Path::new(&path), warnings)?)
                }
                Err(_) => {
                    debug!("config: {CONFIG_ENV_VAR} not set, using built-in defaults");
                    None
                }
            },
        };
        if let Some(overlay) = overlay {
            config.apply(overlay);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses the embedded default config.
    ///
    /// Panics if the embedded TOML is invalid or contains unknown keys.
    pub(crate) fn from_embedded() -> Self {
        let deserializer = toml::Deserializer::parse(Self::DEFAULT_CONFIG)
            .expect("embedded default config should parse");
        let mut unknown = BTreeSet::new();
        let config: MonitorConfig =
            serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .expect("embedded default config should be valid");

        // The default config ships with this binary, so unknown keys in it are a bug.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            );
        }
        config
    }

    fn apply(&mut self, overlay: DeserializedConfig) {
        let DeserializedConfig {
            monitor,
            classifier,
            prediction,
        } = overlay;
        if let Some(quiet_period) = monitor.quiet_period {
            self.monitor.quiet_period = quiet_period;
        }
        if let Some(flush_partial_lines) = monitor.flush_partial_lines {
            self.monitor.flush_partial_lines = flush_partial_lines;
        }
        if let Some(max_line_length) = monitor.max_line_length {
            self.monitor.max_line_length = max_line_length;
        }
        if let Some(eta_min_rate) = monitor.eta_min_rate {
            self.monitor.eta_min_rate = eta_min_rate;
        }
        if let Some(dialects) = classifier.dialects {
            self.classifier.dialects = dialects;
        }
        if let Some(min_probability) = prediction.min_probability {
            self.prediction.min_probability = min_probability;
        }
        if let Some(live_failure_boost) = prediction.live_failure_boost {
            self.prediction.live_failure_boost = Some(live_failure_boost);
        }
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.quiet_period.is_zero() {
            return Err(ConfigError::ZeroDuration {
                key: "monitor.quiet-period",
            });
        }
        if self.monitor.max_line_length == 0 {
            return Err(ConfigError::ZeroLength {
                key: "monitor.max-line-length",
            });
        }
        let rate = self.monitor.eta_min_rate;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ConfigError::NonPositiveRate {
                key: "monitor.eta-min-rate",
                value: rate,
            });
        }
        if self.classifier.dialects.is_empty() {
            return Err(ConfigError::NoDialects);
        }
        check_probability("prediction.min-probability", self.prediction.min_probability)?;
        if let Some(boost) = self.prediction.live_failure_boost {
            check_probability("prediction.live-failure-boost", boost)?;
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_embedded()
    }
}

fn check_probability(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange { key, value })
    }
}

fn load_overlay(
    path: &Utf8Path,
    warnings: &mut impl ConfigWarnings,
) -> Result<DeserializedConfig, ConfigError> {
    debug!("config: loading from {path}");
    let contents = std::fs::read_to_string(path).map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            ConfigError::FileNotFound {
                path: path.to_owned(),
            }
        } else {
            ConfigError::Read {
                path: path.to_owned(),
                error,
            }
        }
    })?;

    let (overlay, unknown) =
        DeserializedConfig::deserialize_toml(&contents).map_err(|error| ConfigError::Parse {
            path: path.to_owned(),
            error,
        })?;
    if !unknown.is_empty() {
        warnings.unknown_config_keys(path, &unknown);
    }
    Ok(overlay)
}

/// Handles warnings raised while loading configuration.
trait ConfigWarnings {
    /// Called with the unknown keys found in a config file.
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

/// Logs warnings through `tracing`.
struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        let mut unknown_str = String::new();
        if let [key] = unknown.iter().collect::<Vec<_>>().as_slice() {
            // Print this on the same line.
            swrite!(unknown_str, "key: {key}");
        } else {
            unknown_str.push_str("keys:\n");
            for key in unknown {
                swrite!(unknown_str, "\n  - {key}");
            }
        }
        warn!("ignoring unknown testlens config {unknown_str} in {config_file}");
    }
}

/// A config file as written, where every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedConfig {
    #[serde(default)]
    monitor: DeserializedMonitorSettings,
    #[serde(default)]
    classifier: DeserializedClassifierSettings,
    #[serde(default)]
    prediction: DeserializedPredictionSettings,
}

impl DeserializedConfig {
    fn deserialize_toml(contents: &str) -> Result<(Self, BTreeSet<String>), toml::de::Error> {
        let deserializer = toml::Deserializer::parse(contents)?;
        let mut unknown = BTreeSet::new();
        let config: DeserializedConfig = serde_ignored::deserialize(deserializer, |path| {
            unknown.insert(path.to_string());
        })?;
        Ok((config, unknown))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedMonitorSettings {
    #[serde(default, with = "humantime_serde")]
    quiet_period: Option<Duration>,
    flush_partial_lines: Option<bool>,
    max_line_length: Option<usize>,
    eta_min_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedClassifierSettings {
    dialects: Option<Vec<Dialect>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedPredictionSettings {
    min_probability: Option<f64>,
    live_failure_boost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use camino_tempfile::{Utf8TempDir, tempdir};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[derive(Default)]
    struct TestConfigWarnings {
        unknown_keys: Option<(Utf8PathBuf, BTreeSet<String>)>,
    }

    impl ConfigWarnings for TestConfigWarnings {
        fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
            self.unknown_keys = Some((config_file.to_owned(), unknown.clone()));
        }
    }

    fn write_config(contents: &str) -> (Utf8TempDir, Utf8PathBuf) {
        let temp_dir = tempdir().expect("created temp dir");
        let path = temp_dir.path().join("testlens.toml");
        std::fs::write(&path, contents).expect("wrote config");
        (temp_dir, path)
    }

    #[test]
    fn default_config_is_valid() {
        let config = MonitorConfig::from_embedded();
        config.validate().expect("default config is valid");
        assert_eq!(config.monitor.quiet_period, Duration::from_millis(120));
        assert!(config.monitor.flush_partial_lines);
        assert_eq!(config.classifier.dialects, Dialect::ALL);
        assert_eq!(config.prediction, PredictionConfig::default());
    }

    #[test]
    fn overlay_replaces_listed_keys_only() {
        let (_dir, path) = write_config(indoc! {r#"
            [monitor]
            quiet-period = "250ms"

            [classifier]
            dialects = ["libtest"]

            [prediction]
            live-failure-boost = 0.8
        "#});

        let mut warnings = TestConfigWarnings::default();
        let config =
            MonitorConfig::from_location_with_warnings(ConfigLocation::Explicit(&path), &mut warnings)
                .expect("config is valid");
        assert_eq!(config.monitor.quiet_period, Duration::from_millis(250));
        assert_eq!(config.monitor.max_line_length, 16384);
        assert_eq!(config.classifier.dialects, vec![Dialect::Libtest]);
        assert_eq!(config.prediction.min_probability, 0.0);
        assert_eq!(config.prediction.live_failure_boost, Some(0.8));
        assert!(warnings.unknown_keys.is_none());
    }

    #[test]
    fn unknown_keys_are_reported() {
        let (_dir, path) = write_config(indoc! {r#"
            ignored1 = "test"

            [monitor]
            quiet-period = "100ms"
            ignored2 = true
        "#});

        let mut warnings = TestConfigWarnings::default();
        MonitorConfig::from_location_with_warnings(ConfigLocation::Explicit(&path), &mut warnings)
            .expect("config is valid");
        let (warned_path, unknown) = warnings.unknown_keys.expect("unknown keys reported");
        assert_eq!(warned_path, path);
        assert_eq!(
            unknown,
            BTreeSet::from(["ignored1".to_owned(), "monitor.ignored2".to_owned()])
        );
    }

    #[test_case(
        "[monitor]\nquiet-period = \"0ms\"",
        "`monitor.quiet-period` must be greater than zero"
        ; "zero quiet period"
    )]
    #[test_case(
        "[monitor]\nmax-line-length = 0",
        "`monitor.max-line-length` must be greater than zero"
        ; "zero line length"
    )]
    #[test_case(
        "[monitor]\neta-min-rate = -1.0",
        "`monitor.eta-min-rate` must be a positive number, found -1"
        ; "negative rate"
    )]
    #[test_case(
        "[classifier]\ndialects = []",
        "`classifier.dialects` must list at least one dialect"
        ; "no dialects"
    )]
    #[test_case(
        "[prediction]\nmin-probability = 1.5",
        "`prediction.min-probability` must be between 0 and 1, found 1.5"
        ; "probability out of range"
    )]
    #[test_case(
        "[prediction]\nlive-failure-boost = -0.1",
        "`prediction.live-failure-boost` must be between 0 and 1, found -0.1"
        ; "boost out of range"
    )]
    fn invalid_values(contents: &str, expected: &str) {
        let (_dir, path) = write_config(contents);
        let error = MonitorConfig::from_path(&path).expect_err("config is invalid");
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn unknown_dialect_is_a_parse_error() {
        let (_dir, path) = write_config("[classifier]\ndialects = [\"tap\"]");
        let error = MonitorConfig::from_path(&path).expect_err("dialect is unknown");
        assert!(matches!(error, ConfigError::Parse { .. }), "{error:?}");
    }

    #[test]
    fn locations() {
        assert!(matches!(ConfigLocation::from_cli(None), ConfigLocation::Default));
        assert!(matches!(ConfigLocation::from_cli(Some("none")), ConfigLocation::Isolated));

        let temp_dir = tempdir().expect("created temp dir");
        let missing = temp_dir.path().join("missing.toml");
        let location = ConfigLocation::from_cli(Some(missing.as_str()));
        assert!(matches!(
            MonitorConfig::from_location(location),
            Err(ConfigError::FileNotFound { path }) if path == missing
        ));

        assert_eq!(
            MonitorConfig::from_location(ConfigLocation::Isolated).expect("defaults are valid"),
            MonitorConfig::default()
        );
    }
}
