//! Agent definitions and runtime settings

use crate::error::{ConfigError, Result};
use crate::topic::TopicSelector;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Environment variable prefix used by [`AgentSettings::load`]
pub const ENV_PREFIX: &str = "AGENTBUS";

/// Static description of an agent: its name and the selectors it listens on
/// and emits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub in_selectors: Vec<TopicSelector>,
    #[serde(default)]
    pub out_selectors: Vec<TopicSelector>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_selectors: Vec::new(),
            out_selectors: Vec::new(),
        }
    }

    pub fn with_in_selector(mut self, selector: TopicSelector) -> Self {
        self.in_selectors.push(selector);
        self
    }

    pub fn with_out_selector(mut self, selector: TopicSelector) -> Self {
        self.out_selectors.push(selector);
        self
    }

    /// True when `selector` equals or lies below one of the out selectors.
    pub fn may_emit(&self, selector: &TopicSelector) -> bool {
        self.out_selectors.iter().any(|out| selector.starts_with(out))
    }
}

/// Limits applied to span recording and export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Character limit of payload-derived attributes
    pub max_attribute_len: usize,
    pub flush_timeout_ms: u64,
    pub max_batch_size: usize,
}

impl TelemetryConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn with_max_attribute_len(mut self, max_attribute_len: usize) -> Self {
        self.max_attribute_len = max_attribute_len;
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_attribute_len: 1024,
            flush_timeout_ms: 5000,
            max_batch_size: 512,
        }
    }
}

/// Per-instance runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub key: String,
    /// Span destination; tracing is disabled when absent.
    #[serde(default)]
    pub tracing_collector_url: Option<String>,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AgentSettings {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tracing_collector_url: None,
            store_url: None,
            telemetry: TelemetryConfig::default(),
        }
    }

    pub fn with_tracing_collector_url(mut self, url: impl Into<String>) -> Self {
        self.tracing_collector_url = Some(url.into());
        self
    }

    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = Some(url.into());
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn tracing_enabled(&self) -> bool {
        self.tracing_collector_url.is_some()
    }

    /// Parses settings from a TOML document.
    #[cfg(feature = "config-support")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| ConfigError::ParsingFailed {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file, overridden by `AGENTBUS__*`
    /// environment variables (`AGENTBUS__TELEMETRY__MAX_ATTRIBUTE_LEN=50`).
    #[cfg(feature = "config-support")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound { path: display }.into());
        }

        let settings: Self = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ConfigError::ParsingFailed {
                path: display,
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects empty keys, zero limits and unparsable URLs.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(ConfigError::MissingRequired { key: "key".to_string() }.into());
        }

        let limits = [
            ("telemetry.max_attribute_len", self.telemetry.max_attribute_len as u64),
            ("telemetry.flush_timeout_ms", self.telemetry.flush_timeout_ms),
            ("telemetry.max_batch_size", self.telemetry.max_batch_size as u64),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    expected: "a positive integer".to_string(),
                }
                .into());
            }
        }

        for (key, value) in [
            ("tracing_collector_url", &self.tracing_collector_url),
            ("store_url", &self.store_url),
        ] {
            if let Some(url) = value {
                Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: url.clone(),
                    expected: format!("a URL ({})", e),
                })?;
            }
        }
        Ok(())
    }
}
