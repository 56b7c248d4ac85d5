//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hap_core::error::{ParseError, Result};
use hap_core::validate_setup_code;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SETUP_CODE: &str = "111-11-111";
pub const DEFAULT_ACCESSORIES_PATH: &str = "/accessories";
pub const DEFAULT_MAX_PAIRING_ATTEMPTS: u32 = 3;

pub const ENV_SETUP_CODE: &str = "HAP_SETUP_CODE";
pub const ENV_PAIRING_FILE: &str = "HAP_PAIRING_FILE";
pub const ENV_TIMEOUT_SECS: &str = "HAP_TIMEOUT_SECS";

/// Controller settings for one accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub setup_code: String,
    pub accessories_path: String,
    #[serde(rename = "response_timeout_secs", with = "secs")]
    pub response_timeout: Duration,
    pub max_pairing_attempts: u32,
    /// Where the pairing record is kept; in memory when unset.
    pub pairing_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            setup_code: DEFAULT_SETUP_CODE.to_string(),
            accessories_path: DEFAULT_ACCESSORIES_PATH.to_string(),
            response_timeout: Duration::from_secs(10),
            max_pairing_attempts: DEFAULT_MAX_PAIRING_ATTEMPTS,
            pairing_file: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overlaid with `HAP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env()
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HAP_SETUP_CODE`, `HAP_PAIRING_FILE` and `HAP_TIMEOUT_SECS` when set.
    pub fn overlay_env(self) -> Result<Self> {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(code) = lookup(ENV_SETUP_CODE) {
            self.setup_code = code;
        }
        if let Some(path) = lookup(ENV_PAIRING_FILE) {
            self.pairing_file = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ParseError::InvalidValue(format!("{}={:?} is not a number of seconds", ENV_TIMEOUT_SECS, secs))
            })?;
            self.response_timeout = Duration::from_secs(secs);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        validate_setup_code(&self.setup_code)?;
        if !self.accessories_path.starts_with('/') {
            return Err(ParseError::InvalidValue(format!(
                "accessories path must start with '/': {:?}",
                self.accessories_path
            ))
            .into());
        }
        if self.max_pairing_attempts == 0 {
            return Err(
                ParseError::InvalidValue("max_pairing_attempts must be at least 1".to_string()).into(),
            );
        }
        if self.response_timeout.is_zero() {
            return Err(ParseError::InvalidValue("response timeout must be non-zero".to_string()).into());
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn setup_code(mut self, code: impl Into<String>) -> Self {
        self.config.setup_code = code.into();
        self
    }

    pub fn accessories_path(mut self, path: impl Into<String>) -> Self {
        self.config.accessories_path = path.into();
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    pub fn max_pairing_attempts(mut self, attempts: u32) -> Self {
        self.config.max_pairing_attempts = attempts;
        self
    }

    pub fn pairing_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pairing_file = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
