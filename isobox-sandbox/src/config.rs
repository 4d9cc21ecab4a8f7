//! Configuration management for the sandbox loader

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::limits::{CodeLimits, HostLimits};
use crate::Result;

/// Compatibility date handed to execution hosts unless configured
pub const DEFAULT_COMPATIBILITY_DATE: &str = "2025-06-01";

/// Base URL of the named-host management endpoint
pub const DEFAULT_WORKERS_API_URL: &str = "https://workers.isobox.dev";

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Runtime compatibility date, `YYYY-MM-DD`
    pub compatibility_date: String,

    /// Caller code size limits
    pub limits: CodeLimits,

    /// Capture console output when a request does not say otherwise
    pub capture_console: bool,

    /// Remote loader service for one-shot hosts
    pub loader_url: Option<String>,

    /// Named-host management endpoint
    pub workers_api_url: String,

    /// Limits for the in-process V8 host
    pub local: HostLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            compatibility_date: DEFAULT_COMPATIBILITY_DATE.to_string(),
            limits: CodeLimits::default(),
            capture_console: true,
            loader_url: None,
            workers_api_url: DEFAULT_WORKERS_API_URL.to_string(),
            local: HostLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SandboxConfig = toml::from_str(content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        chrono::NaiveDate::parse_from_str(&self.compatibility_date, "%Y-%m-%d").map_err(|e| {
            SandboxError::Config(format!(
                "Invalid compatibility_date '{}': {}",
                self.compatibility_date, e
            ))
        })?;

        if self.limits.max_script_size == 0 || self.limits.max_module_size == 0 {
            return Err(SandboxError::Config(
                "Code size limits must be greater than zero".to_string(),
            ));
        }

        for (key, value) in [
            ("workers_api_url", Some(self.workers_api_url.as_str())),
            ("loader_url", self.loader_url.as_deref()),
        ] {
            if let Some(value) = value {
                url::Url::parse(value).map_err(|e| {
                    SandboxError::Config(format!("Invalid {} '{}': {}", key, value, e))
                })?;
            }
        }

        Ok(())
    }
}
