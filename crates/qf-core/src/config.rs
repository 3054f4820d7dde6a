//! Configuration management
//!
//! Settings are read in this order of precedence:
//! 1. Environment variables
//! 2. `qf-bot.toml` configuration file
//! 3. Defaults
//!
//! `${VAR_NAME}` inside the configuration file is expanded from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "qf-bot.toml";

/// How a new device is linked to the account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PairingMode {
    /// Request an 8-character pairing code for the entered number
    #[default]
    Code,
    /// Render the QR payloads emitted by the session layer
    Qr,
}

impl std::fmt::Display for PairingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingMode::Code => f.write_str("pairing code"),
            PairingMode::Qr => f.write_str("QR code"),
        }
    }
}

impl PairingMode {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "qr" | "qrcode" => PairingMode::Qr,
            _ => PairingMode::Code,
        }
    }
}

/// WhatsApp session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Directory holding `creds.json` and the client's session database
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    #[serde(default)]
    pub pairing_mode: PairingMode,

    /// Service worker script the WhatsApp Web client revision is read from
    #[serde(default = "default_version_url")]
    pub version_url: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            auth_dir: default_auth_dir(),
            pairing_mode: PairingMode::default(),
            version_url: default_version_url(),
        }
    }
}

/// Fixed delays and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay between detecting a quoted image and forwarding it
    #[serde(default = "default_forward_delay_ms")]
    pub forward_delay_ms: u64,

    /// Delay between the first `connecting` update and the pairing-code request
    #[serde(default = "default_pairing_request_delay_ms")]
    pub pairing_request_delay_ms: u64,

    /// How long an issued pairing code may stay unused
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    /// Delay before reconnecting after a dropped connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            forward_delay_ms: default_forward_delay_ms(),
            pairing_request_delay_ms: default_pairing_request_delay_ms(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl TimingConfig {
    pub fn forward_delay(&self) -> Duration {
        Duration::from_millis(self.forward_delay_ms)
    }

    pub fn pairing_request_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_request_delay_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Main configuration for qf-bot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_auth_dir() -> String {
    "auth_info".to_string()
}

fn default_version_url() -> String {
    "https://web.whatsapp.com/sw.js".to_string()
}

fn default_forward_delay_ms() -> u64 {
    1000
}

fn default_pairing_request_delay_ms() -> u64 {
    2000
}

fn default_pairing_timeout_secs() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl Config {
    /// Expand `${VAR_NAME}` references from the environment
    ///
    /// Unknown variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Parse TOML content, expanding environment references first
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load a TOML configuration file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// Load from `./qf-bot.toml` if present, otherwise from the environment
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Ok(Self::from_env())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup; unparsable numbers are ignored
    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(dir) = non_empty("WA_AUTH_DIR") {
            self.whatsapp.auth_dir = dir;
        }
        if let Some(mode) = non_empty("WA_PAIRING_MODE") {
            self.whatsapp.pairing_mode = PairingMode::parse(&mode);
        }
        if let Some(url) = non_empty("WA_VERSION_URL") {
            self.whatsapp.version_url = url;
        }

        let millis = |name: &str| non_empty(name).and_then(|v| v.parse::<u64>().ok());
        if let Some(ms) = millis("FORWARD_DELAY_MS") {
            self.timing.forward_delay_ms = ms;
        }
        if let Some(ms) = millis("PAIRING_REQUEST_DELAY_MS") {
            self.timing.pairing_request_delay_ms = ms;
        }
        if let Some(secs) = millis("PAIRING_TIMEOUT_SECS") {
            self.timing.pairing_timeout_secs = secs;
        }
        if let Some(ms) = millis("RECONNECT_DELAY_MS") {
            self.timing.reconnect_delay_ms = ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.whatsapp.auth_dir, "auth_info");
        assert_eq!(config.whatsapp.pairing_mode, PairingMode::Code);
        assert_eq!(config.whatsapp.version_url, "https://web.whatsapp.com/sw.js");
        assert_eq!(config.timing.forward_delay(), Duration::from_secs(1));
        assert_eq!(config.timing.pairing_request_delay(), Duration::from_secs(2));
        assert_eq!(config.timing.pairing_timeout(), Duration::from_secs(60));
        assert_eq!(config.timing.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("QF_BOT_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${QF_BOT_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${QF_BOT_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("QF_BOT_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here $HOME"), "no_vars_here $HOME");
    }

    #[test]
    fn test_toml_parsing() {
        let config = Config::from_toml_str(
            r#"
[whatsapp]
auth_dir = "/var/lib/qf/auth"
pairing_mode = "qr"
version_url = "http://mirror.local/sw.js"

[timing]
forward_delay_ms = 250
pairing_timeout_secs = 90
"#,
        )
        .unwrap();

        assert_eq!(config.whatsapp.auth_dir, "/var/lib/qf/auth");
        assert_eq!(config.whatsapp.pairing_mode, PairingMode::Qr);
        assert_eq!(config.whatsapp.version_url, "http://mirror.local/sw.js");
        assert_eq!(config.timing.forward_delay_ms, 250);
        assert_eq!(config.timing.pairing_timeout_secs, 90);
        assert_eq!(config.timing.reconnect_delay_ms, 5000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str("[timing]\nreconnect_delay_ms = 100\n").unwrap();
        assert_eq!(config.whatsapp.auth_dir, "auth_info");
        assert_eq!(config.timing.reconnect_delay_ms, 100);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml_str("[whatsapp\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WA_VERSION_URL", "http://10.0.0.2/sw.js"),
            ("WA_PAIRING_MODE", "QR"),
            ("FORWARD_DELAY_MS", "1500"),
            ("RECONNECT_DELAY_MS", "not-a-number"),
            ("WA_AUTH_DIR", ""),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.whatsapp.version_url, "http://10.0.0.2/sw.js");
        assert_eq!(config.whatsapp.pairing_mode, PairingMode::Qr);
        assert_eq!(config.timing.forward_delay_ms, 1500);
        assert_eq!(config.timing.reconnect_delay_ms, 5000);
        assert_eq!(config.whatsapp.auth_dir, "auth_info");
    }
}
