//! Hub configuration.
//!
//! Loaded once at startup from a JSON file (`hub.json` by default),
//! camelCase keys, unknown keys rejected. The core consumes the parsed
//! values; nothing here is reloaded at runtime.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::mcp::ServerInfo;

/// Supported configuration file version.
const CONFIG_VERSION: u32 = 1;

/// Errors while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration file {path} is not valid: {details}")]
    Parse { path: PathBuf, details: String },

    #[error("invalid configuration: {details}")]
    Invalid { details: String },
}

/// Log levels accepted in `logging.level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level hub configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HubConfig {
    /// Configuration format version, must be 1
    pub v: u32,
    pub server_info: ServerInfo,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub prompts: Option<PromptsFileConfig>,
    #[serde(default)]
    pub inspector: Option<InspectorConfig>,
    #[serde(default)]
    pub proxy: Option<ProxyListenConfig>,
    #[serde(default)]
    pub parent_monitor: Option<ParentMonitorConfig>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

/// Logging destinations and level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log file path; stderr is used when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// trace | debug | info | warn | error
    #[serde(default)]
    pub level: Option<String>,
    /// Also copy logs to stderr when a file is configured
    #[serde(default)]
    pub with_stderr: bool,
    /// Append every frame on the primary transport to this file
    #[serde(default)]
    pub protocol_debug_file: Option<PathBuf>,
}

/// Location of the prompts file consumed by the prompts registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptsFileConfig {
    pub file: PathBuf,
}

/// Inspector web UI settings. Recognized for compatibility; the
/// inspector itself is not part of this binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InspectorConfig {
    pub enabled: bool,
    #[serde(default)]
    pub listen_address: String,
}

/// Proxy multiplexer listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyListenConfig {
    pub enabled: bool,
    #[serde(default)]
    pub listen_address: String,
}

/// Orphan detection: shut down when the parent process goes away.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParentMonitorConfig {
    pub enabled: bool,
    #[serde(default = "default_parent_interval")]
    pub interval_seconds: u64,
}

fn default_parent_interval() -> u64 {
    10
}

/// Configuration section of one in-process tool provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: Option<Value>,
}

impl HubConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: HubConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.v != CONFIG_VERSION {
            return Err(ConfigError::Invalid {
                details: format!("unsupported configuration version {}", self.v),
            });
        }
        if self.server_info.name.is_empty() {
            return Err(ConfigError::Invalid {
                details: "serverInfo.name must not be empty".to_string(),
            });
        }
        if let Some(proxy) = &self.proxy {
            if proxy.enabled && proxy.listen_address.is_empty() {
                return Err(ConfigError::Invalid {
                    details: "proxy.listenAddress must be set when proxy is enabled".to_string(),
                });
            }
        }
        if let Some(inspector) = &self.inspector {
            if inspector.enabled && inspector.listen_address.is_empty() {
                return Err(ConfigError::Invalid {
                    details: "inspector.listenAddress must be set when inspector is enabled"
                        .to_string(),
                });
            }
        }
        if let Some(monitor) = &self.parent_monitor {
            if monitor.enabled && monitor.interval_seconds == 0 {
                return Err(ConfigError::Invalid {
                    details: "parentMonitor.intervalSeconds must be at least 1".to_string(),
                });
            }
        }
        if let Some(level) = self.logging.as_ref().and_then(|l| l.level.as_deref()) {
            if !LOG_LEVELS.contains(&level) {
                return Err(ConfigError::Invalid {
                    details: format!(
                        "logging.level '{}' is not one of {}",
                        level,
                        LOG_LEVELS.join(", ")
                    ),
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid {
                    details: format!("duplicate tool configuration '{}'", tool.name),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<HubConfig, String> {
        let config: HubConfig = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    const FULL_CONFIG: &str = r#"{
        "v": 1,
        "serverInfo": {"name": "hub", "version": "0.3.1"},
        "logging": {
            "file": "/tmp/hub.log",
            "level": "debug",
            "withStderr": true,
            "protocolDebugFile": "/tmp/hub-wire.log"
        },
        "prompts": {"file": "/tmp/prompts.json"},
        "inspector": {"enabled": false, "listenAddress": ""},
        "proxy": {"enabled": true, "listenAddress": "127.0.0.1:8090"},
        "parentMonitor": {"enabled": true, "intervalSeconds": 5},
        "tools": [
            {"name": "filesystem", "configuration": {"root": "/data"}},
            {"name": "scratch", "isDisabled": true}
        ]
    }"#;

    #[test]
    fn test_full_config_parses() {
        let config = parse(FULL_CONFIG).unwrap();
        assert_eq!(config.server_info.name, "hub");
        assert_eq!(config.logging.as_ref().unwrap().level.as_deref(), Some("debug"));
        assert!(config.logging.as_ref().unwrap().with_stderr);
        assert_eq!(
            config.proxy.as_ref().unwrap().listen_address,
            "127.0.0.1:8090"
        );
        assert_eq!(config.parent_monitor.as_ref().unwrap().interval_seconds, 5);
        assert_eq!(config.tools.len(), 2);
        assert!(config.tools[1].is_disabled);
    }

    #[test]
    fn test_minimal_config() {
        let config =
            parse(r#"{"v": 1, "serverInfo": {"name": "hub", "version": "0.1.0"}}"#).unwrap();
        assert!(config.proxy.is_none());
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = parse(
            r#"{"v": 1, "serverInfo": {"name": "h", "version": "1"}, "surprise": true}"#,
        );
        assert!(result.unwrap_err().contains("surprise"));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let result = parse(r#"{"v": 2, "serverInfo": {"name": "h", "version": "1"}}"#);
        assert!(result.unwrap_err().contains("version"));
    }

    #[test]
    fn test_proxy_enabled_requires_listen_address() {
        let result = parse(
            r#"{"v": 1, "serverInfo": {"name": "h", "version": "1"},
                "proxy": {"enabled": true}}"#,
        );
        assert!(result.unwrap_err().contains("listenAddress"));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let result = parse(
            r#"{"v": 1, "serverInfo": {"name": "h", "version": "1"},
                "logging": {"level": "loud"}}"#,
        );
        assert!(result.unwrap_err().contains("loud"));
    }

    #[test]
    fn test_duplicate_tool_names_rejected() {
        let result = parse(
            r#"{"v": 1, "serverInfo": {"name": "h", "version": "1"},
                "tools": [{"name": "a"}, {"name": "a"}]}"#,
        );
        assert!(result.unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_parent_monitor_interval_default() {
        let config = parse(
            r#"{"v": 1, "serverInfo": {"name": "h", "version": "1"},
                "parentMonitor": {"enabled": true}}"#,
        )
        .unwrap();
        assert_eq!(config.parent_monitor.unwrap().interval_seconds, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let result = HubConfig::load(Path::new("/nonexistent/hub.json"));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.json");
        std::fs::write(&path, FULL_CONFIG).unwrap();
        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.server_info.version, "0.3.1");
    }
}
