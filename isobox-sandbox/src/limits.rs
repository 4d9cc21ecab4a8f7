//! Size and resource limits for sandboxed execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum script size in characters
pub const MAX_SCRIPT_SIZE: usize = 1_000_000;

/// Default maximum module size in characters
pub const MAX_MODULE_SIZE: usize = 1_000_000;

/// Size limits applied to caller code before it is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeLimits {
    /// Maximum script length in characters
    pub max_script_size: usize,

    /// Maximum module length in characters
    pub max_module_size: usize,
}

impl Default for CodeLimits {
    fn default() -> Self {
        Self {
            max_script_size: MAX_SCRIPT_SIZE,
            max_module_size: MAX_MODULE_SIZE,
        }
    }
}

impl CodeLimits {
    /// Tighter limits for callers that only expect short snippets
    pub fn strict() -> Self {
        Self {
            max_script_size: 64 * 1024,
            max_module_size: 64 * 1024,
        }
    }
}

/// Resource limits for the in-process V8 host.
///
/// Remote hosts enforce their own quotas; these only apply locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostLimits {
    /// Wall-clock budget for one invocation
    #[serde(with = "humantime_serde")]
    pub max_duration: Option<Duration>,

    /// V8 heap ceiling in bytes
    pub max_heap_bytes: Option<usize>,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_duration: Some(Duration::from_secs(30)), // 30 seconds default
            max_heap_bytes: Some(128 * 1024 * 1024),     // 128 MB default
        }
    }
}

impl HostLimits {
    /// No local limits; rely entirely on the caller
    pub fn unlimited() -> Self {
        Self {
            max_duration: None,
            max_heap_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_code_limits() {
        let limits = CodeLimits::default();
        assert_eq!(limits.max_script_size, 1_000_000);
        assert_eq!(limits.max_module_size, 1_000_000);
    }

    #[test]
    fn test_strict_code_limits() {
        let limits = CodeLimits::strict();
        assert!(limits.max_script_size < MAX_SCRIPT_SIZE);
    }

    #[test]
    fn test_host_limits() {
        let limits = HostLimits::default();
        assert_eq!(limits.max_duration, Some(Duration::from_secs(30)));

        let unlimited = HostLimits::unlimited();
        assert!(unlimited.max_duration.is_none());
        assert!(unlimited.max_heap_bytes.is_none());
    }

    #[test]
    fn test_host_limits_from_toml() {
        let limits: HostLimits = toml::from_str("max_duration = \"5s\"").unwrap();
        assert_eq!(limits.max_duration, Some(Duration::from_secs(5)));
        assert_eq!(limits.max_heap_bytes, Some(128 * 1024 * 1024));
    }
}
