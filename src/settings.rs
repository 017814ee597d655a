//! Wait policy settings loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::lifecycle::{TargetError, WaitPolicy, WaitTarget, parse_targets};

const CONFIG_FILE: &str = "convergent.toml";
const SECTION: &str = "wait";

/// Polling knobs derived from defaults, configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CONVERGENT",
    discovery(
        app_name = "convergent",
        env_var = "CONVERGENT_CONFIG_PATH",
        config_file_name = "convergent.toml",
        dotfile_name = ".convergent.toml",
        project_file_name = "convergent.toml"
    )
)]
pub struct WaitSettings {
    /// Seconds to wait before the first probe.
    #[ortho_config(default = 2)]
    pub initial_delay_secs: u64,
    /// Milliseconds between the first two probes; later intervals double.
    #[ortho_config(default = 2000)]
    pub min_interval_ms: u64,
    /// Upper bound on the interval between probes, in milliseconds.
    #[ortho_config(default = 10_000)]
    pub max_interval_ms: u64,
    /// Overall deadline of a single wait, in seconds.
    #[ortho_config(default = 180)]
    pub timeout_secs: u64,
    /// Comma-separated default wait targets, such as `ipv4,agent`.
    pub wait_for: Option<String>,
}

struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [{SECTION}] in {CONFIG_FILE}",
            self.env_var, self.toml_key
        )
    }
}

const TIMEOUT: FieldMetadata =
    FieldMetadata::new("wait timeout", "CONVERGENT_TIMEOUT_SECS", "timeout_secs");
const MIN_INTERVAL: FieldMetadata = FieldMetadata::new(
    "minimum poll interval",
    "CONVERGENT_MIN_INTERVAL_MS",
    "min_interval_ms",
);
const MAX_INTERVAL: FieldMetadata = FieldMetadata::new(
    "maximum poll interval",
    "CONVERGENT_MAX_INTERVAL_MS",
    "max_interval_ms",
);
const WAIT_FOR: FieldMetadata =
    FieldMetadata::new("wait targets", "CONVERGENT_WAIT_FOR", "wait_for");

impl WaitSettings {
    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), SettingsError> {
        if value == 0 {
            return Err(SettingsError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads settings without parsing CLI arguments. Values merge defaults,
    /// configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, SettingsError> {
        Self::load_from_iter([OsString::from("convergent")])
            .map_err(|err| SettingsError::Parse(err.to_string()))
    }

    /// Checks the values for consistency. Messages name the environment
    /// variable and the configuration key to fix.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingField`] for a zero timeout or
    /// interval, and [`SettingsError::Invalid`] when the interval bounds are
    /// inverted or the default targets do not parse.
    pub fn validate(&self) -> Result<(), SettingsError> {
        Self::require_positive(self.timeout_secs, &TIMEOUT)?;
        Self::require_positive(self.min_interval_ms, &MIN_INTERVAL)?;
        if self.max_interval_ms < self.min_interval_ms {
            return Err(SettingsError::Invalid(format!(
                "{} ({} ms) is below the {} ({} ms): {}",
                MAX_INTERVAL.description,
                self.max_interval_ms,
                MIN_INTERVAL.description,
                self.min_interval_ms,
                MAX_INTERVAL.hint()
            )));
        }
        self.targets()
            .map(drop)
            .map_err(|err| SettingsError::Invalid(format!("{err}: {}", WAIT_FOR.hint())))
    }

    /// Builds the wait policy after validation.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when validation fails.
    pub fn policy(&self) -> Result<WaitPolicy, SettingsError> {
        self.validate()?;
        Ok(WaitPolicy {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    /// Parses the default wait targets; empty when none are configured.
    ///
    /// # Errors
    ///
    /// Returns the [`TargetError`] of the first invalid entry.
    pub fn targets(&self) -> Result<Vec<WaitTarget>, TargetError> {
        let Some(raw) = self.wait_for.as_deref() else {
            return Ok(Vec::new());
        };
        parse_targets(raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()))
    }
}

/// Errors raised during settings loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SettingsError {
    /// A required value is zero or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Values are present but inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for SettingsError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
