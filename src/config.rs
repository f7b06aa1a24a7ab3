use crate::logging::{get_logger, LogCategory};
use crate::shell::Platform;
use crate::tiers::TierRule;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Dispatcher configuration, stored as JSON in the platform config dir.
///
/// Every field carries a safe default so a partial file still loads; a
/// file that fails validation is replaced by the defaults with a warning
/// rather than aborting the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_gate_url")]
    pub gate_url: String,

    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,

    #[serde(default = "default_shell_timeout_ms")]
    pub shell_timeout_ms: u64,

    /// Answer every confirmation prompt with yes. Off by default; only
    /// scripted use should turn this on.
    #[serde(default)]
    pub assume_yes: bool,

    /// Device registry for `@name` routing: device name to platform.
    #[serde(default)]
    pub devices: HashMap<String, Platform>,

    /// User tier overrides merged over the built-in base rules at boot.
    #[serde(default)]
    pub tier_overrides: Vec<TierRule>,
}

fn default_gate_url() -> String {
    "http://localhost:8900".to_string()
}

fn default_gate_timeout_ms() -> u64 {
    10_000
}

fn default_shell_timeout_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gate_url: default_gate_url(),
            gate_timeout_ms: default_gate_timeout_ms(),
            shell_timeout_ms: default_shell_timeout_ms(),
            assume_yes: false,
            devices: HashMap::new(),
            tier_overrides: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if let Some(path) = &config_path {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(path) {
                    match serde_json::from_str::<Config>(&content) {
                        Ok(config) => {
                            if let Err(e) = config.validate() {
                                eprintln!(
                                    "Warning: Invalid configuration detected: {}. Using safe defaults.",
                                    e
                                );
                                return Self::create_default_config(config_path.clone());
                            }
                            return config;
                        }
                        Err(e) => {
                            eprintln!(
                                "Warning: Failed to parse configuration: {}. Using safe defaults.",
                                e
                            );
                            return Self::create_default_config(config_path.clone());
                        }
                    }
                }
            }
        }

        Self::create_default_config(config_path)
    }

    fn create_default_config(config_path: Option<PathBuf>) -> Self {
        let default_config = Self::default();

        if let Some(path) = config_path {
            if !path.exists() {
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let _ = fs::write(
                    path,
                    serde_json::to_string_pretty(&default_config).unwrap_or_default(),
                );
            }
        }

        default_config
    }

    pub fn validate(&self) -> Result<()> {
        if self.gate_timeout_ms == 0 {
            return Err(anyhow!("gate_timeout_ms must be greater than 0"));
        }
        if self.gate_timeout_ms > 120_000 {
            return Err(anyhow!("gate_timeout_ms cannot exceed 2 minutes (120000ms)"));
        }
        if self.shell_timeout_ms == 0 {
            return Err(anyhow!("shell_timeout_ms must be greater than 0"));
        }
        if self.shell_timeout_ms > 3_600_000 {
            return Err(anyhow!("shell_timeout_ms cannot exceed 1 hour (3600000ms)"));
        }
        if !self.gate_url.starts_with("http://") && !self.gate_url.starts_with("https://") {
            return Err(anyhow!("gate_url must be a valid HTTP/HTTPS URL"));
        }
        for rule in &self.tier_overrides {
            if rule.command.trim().is_empty() {
                return Err(anyhow!("tier override with an empty command name"));
            }
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.validate()?;

        let config_path =
            Self::get_config_path().ok_or_else(|| anyhow!("Could not find config directory"))?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        if let Ok(logger) = get_logger() {
            if let Ok(logger_guard) = logger.lock() {
                let _ = logger_guard.log_info(
                    LogCategory::Configuration,
                    "Configuration saved".to_string(),
                    None,
                );
            }
        }

        Ok(())
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_timeout_ms)
    }

    fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("tiershell");
            path.push("config.json");
            path
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::Tier;

    #[test]
    fn test_defaults_are_safe() {
        let config = Config::default();
        assert!(!config.assume_yes);
        assert_eq!(config.gate_timeout_ms, 10_000);
        assert_eq!(config.shell_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"gate_url":"http://gate.internal:9000"}"#).unwrap();
        assert_eq!(config.gate_url, "http://gate.internal:9000");
        assert_eq!(config.shell_timeout_ms, 30_000);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.gate_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gate_url = "ftp://nope".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tier_overrides.push(TierRule {
            command: "  ".to_string(),
            platform: None,
            tier: Tier::Instant,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_devices_and_overrides_round_trip() {
        let mut config = Config::default();
        config.devices.insert("winbox".to_string(), Platform::PowerShell);
        config.tier_overrides.push(TierRule {
            command: "deploy".to_string(),
            platform: Some(Platform::Bash),
            tier: Tier::AutoCorrectConfirm,
        });

        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, config);
    }
}
