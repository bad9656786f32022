use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{IdempotencyError, Result};
use crate::model::{DUPLICATE_SUBMISSION_MESSAGE, STATUS_DUPLICATE_SUBMISSION, STATUS_OK};

/// Prefix for environment overrides, e.g. `HYENA_IDEMPOTENCY_LOCK_TTL_SECS`.
pub const ENV_PREFIX: &str = "HYENA_IDEMPOTENCY_";

/// What happens to a held lock when the wrapped operation fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Leave the lock held. Later requests with the same key are rejected as
    /// duplicates until the lock is released externally or expires.
    #[default]
    RetainLock,
    /// Release the lock so the caller may retry with the same seq.
    ReleaseLock,
}

impl FromStr for FailurePolicy {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "retain_lock" | "retain" => Ok(Self::RetainLock),
            "release_lock" | "release" => Ok(Self::ReleaseLock),
            other => Err(IdempotencyError::Config(format!(
                "unknown failure policy {other:?}; expected retain_lock or release_lock"
            ))),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetainLock => f.write_str("retain_lock"),
            Self::ReleaseLock => f.write_str("release_lock"),
        }
    }
}

/// Expiry settings for store implementations that support them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Seconds after which an unreleased lock may be re-acquired.
    pub lock_ttl_secs: Option<u64>,
    /// Seconds a committed result stays available for replay.
    pub result_ttl_secs: Option<u64>,
}

impl StoreConfig {
    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl_secs.map(Duration::from_secs)
    }

    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl_secs.map(Duration::from_secs)
    }
}

/// Per-operation settings layered over the global ones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct OperationOverrides {
    pub enabled: Option<bool>,
    pub failure_policy: Option<FailurePolicy>,
}

/// Effective settings for a single operation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationPolicy {
    pub enabled: bool,
    pub failure_policy: FailurePolicy,
}

/// Interceptor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Global switch; when false every request bypasses deduplication.
    pub enabled: bool,
    pub failure_policy: FailurePolicy,
    /// Status placed on duplicate-submission rejections.
    pub duplicate_status: i32,
    /// Message placed on duplicate-submission rejections.
    pub duplicate_message: String,
    pub store: StoreConfig,
    /// Overrides keyed by operation name.
    pub operations: BTreeMap<String, OperationOverrides>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_policy: FailurePolicy::default(),
            duplicate_status: STATUS_DUPLICATE_SUBMISSION,
            duplicate_message: DUPLICATE_SUBMISSION_MESSAGE.to_string(),
            store: StoreConfig::default(),
            operations: BTreeMap::new(),
        }
    }
}

impl IdempotencyConfig {
    /// Resolve the effective policy for `name`, falling back to global settings.
    pub fn policy_for(&self, name: &str) -> OperationPolicy {
        let overrides = self.operations.get(name);
        OperationPolicy {
            enabled: overrides
                .and_then(|o| o.enabled)
                .unwrap_or(self.enabled),
            failure_policy: overrides
                .and_then(|o| o.failure_policy)
                .unwrap_or(self.failure_policy),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.duplicate_status == STATUS_OK {
            return Err(IdempotencyError::Config(
                "duplicate_status must differ from the success status".into(),
            ));
        }
        if self.duplicate_message.trim().is_empty() {
            return Err(IdempotencyError::Config(
                "duplicate_message must not be empty".into(),
            ));
        }
        if self.store.lock_ttl_secs == Some(0) {
            return Err(IdempotencyError::Config(
                "store.lock_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.store.result_ttl_secs == Some(0) {
            return Err(IdempotencyError::Config(
                "store.result_ttl_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse a config document; `.json` files use JSON, anything else TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            IdempotencyError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let format = ConfigFileFormat::from_path(path);
        Self::parse(&contents, format)
            .map_err(|err| IdempotencyError::Config(format!("{}: {err}", path.display())))
    }

    pub fn parse(contents: &str, format: ConfigFileFormat) -> Result<Self> {
        match format {
            ConfigFileFormat::Toml => {
                toml::from_str(contents).map_err(|err| IdempotencyError::Config(err.to_string()))
            }
            ConfigFileFormat::Json => serde_json::from_str(contents)
                .map_err(|err| IdempotencyError::Config(err.to_string())),
        }
    }

    fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match suffix {
                "ENABLED" => self.enabled = parse_env(&name, &value)?,
                "FAILURE_POLICY" => self.failure_policy = value.parse()?,
                "LOCK_TTL_SECS" => self.store.lock_ttl_secs = Some(parse_env(&name, &value)?),
                "RESULT_TTL_SECS" => {
                    self.store.result_ttl_secs = Some(parse_env(&name, &value)?)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(policy) = overrides.failure_policy {
            self.failure_policy = policy;
        }
        if let Some(ttl) = overrides.lock_ttl_secs {
            self.store.lock_ttl_secs = Some(ttl);
        }
        if let Some(ttl) = overrides.result_ttl_secs {
            self.store.result_ttl_secs = Some(ttl);
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| IdempotencyError::Config(format!("{name}={value:?}: {err}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFileFormat {
    Toml,
    Json,
}

impl ConfigFileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Highest-precedence layer, typically populated from CLI flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub enabled: Option<bool>,
    pub failure_policy: Option<FailurePolicy>,
    pub lock_ttl_secs: Option<u64>,
    pub result_ttl_secs: Option<u64>,
}

/// Builds an [`IdempotencyConfig`] from defaults, an optional file, environment
/// variables and CLI overrides, in increasing order of precedence.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    file: Option<PathBuf>,
    env: Vec<(String, String)>,
    overrides: ConfigOverrides,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Use the current process environment as the env layer.
    pub fn with_process_env(self) -> Self {
        self.with_env_vars(std::env::vars())
    }

    pub fn with_env_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(ENV_PREFIX))
            .collect();
        self
    }

    pub fn with_cli_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn load(self) -> Result<IdempotencyConfig> {
        let mut config = match &self.file {
            Some(path) => IdempotencyConfig::from_file(path)?,
            None => IdempotencyConfig::default(),
        };
        config.apply_env(self.env)?;
        config.apply_overrides(&self.overrides);
        config.validate()?;
        Ok(config)
    }
}
