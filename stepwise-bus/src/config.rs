// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bus configuration, read from an embedded default and an optional config file.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use stepwise_model::ResultState;
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// The default implementation, [`DefaultConfigWarnings`], logs warnings. Tests
/// can collect them instead.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the
/// tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        warn!(
            "ignoring unknown bus settings in {}: {}",
            config_file
                .strip_prefix(workspace_root)
                .unwrap_or(config_file),
            unknown_keys_summary(unknown),
        );
    }
}

fn unknown_keys_summary(unknown: &BTreeSet<String>) -> String {
    unknown
        .iter()
        .map(|key| format!("`{key}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Settings that control how the bus folds events into outcomes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BusConfig {
    fail_fast: bool,
    unfinished_step_result: ResultState,
    live_step_events: bool,
}

impl BusConfig {
    /// The default location of the config within the path.
    pub const CONFIG_PATH: &'static str = ".config/stepwise.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the bus configuration.
    ///
    /// If `config_file` is given, it must exist. Otherwise the config is read from
    /// [`Self::CONFIG_PATH`] under `workspace_root` if that file exists. Either
    /// way, the file is layered on top of [`Self::DEFAULT_CONFIG`].
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &workspace_root, &unknown);
        }

        Ok(config.bus.into())
    }

    /// Returns true if steps begun after a failure are recorded as skipped.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Returns the result given to steps still open when their test finishes.
    pub fn unfinished_step_result(&self) -> ResultState {
        self.unfinished_step_result
    }

    /// Returns true if step listeners receive step start and finish events.
    pub fn live_step_events(&self) -> bool {
        self.live_step_events
    }

    /// Sets whether steps begun after a failure are recorded as skipped.
    pub fn set_fail_fast(&mut self, fail_fast: bool) -> &mut Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets the result given to steps still open when their test finishes.
    pub fn set_unfinished_step_result(&mut self, result: ResultState) -> &mut Self {
        self.unfinished_step_result = result;
        self
    }

    /// Sets whether step listeners receive step start and finish events.
    pub fn set_live_step_events(&mut self, live_step_events: bool) -> &mut Self {
        self.live_step_events = live_step_events;
        self
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(BusConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: BusConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate reports the key as well. Drop it in favor of
                // the path.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            unfinished_step_result: ResultState::Error,
            live_step_events: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BusConfigDeserialize {
    bus: BusSettingsDeserialize,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BusSettingsDeserialize {
    fail_fast: bool,
    #[serde(deserialize_with = "deserialize_result_state")]
    unfinished_step_result: ResultState,
    live_step_events: bool,
}

impl From<BusSettingsDeserialize> for BusConfig {
    fn from(settings: BusSettingsDeserialize) -> Self {
        Self {
            fail_fast: settings.fail_fast,
            unfinished_step_result: settings.unfinished_step_result,
            live_step_events: settings.live_step_events,
        }
    }
}

fn deserialize_result_state<'de, D>(deserializer: D) -> Result<ResultState, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
