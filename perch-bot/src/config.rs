//! Bot configuration, loaded from YAML.
//!
//! ```yaml
//! server: irc.libera.chat:6697
//! nick: perch
//! channels: ["#perch"]
//! owners: ["admin!*@trusted.example"]
//! storage: perch.db
//! plugins:
//!   timezone: {}
//!   ticker:
//!     api_key: XXXX
//!     channels: ["#stocks"]
//!     stocks:
//!       SPY: S&P 500
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use perch_sdk::client::{ConnectConfig, ReconnectConfig, SaslCredentials};
use perch_sdk::irc::is_channel;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default IRC server.
pub const DEFAULT_SERVER: &str = "irc.libera.chat:6697";
/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "perch.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    /// Server address (host:port). Port 6697 is assumed when missing.
    pub server: String,
    /// Use TLS (auto-detected from :6697, but can force).
    pub tls: bool,
    /// Skip TLS certificate verification.
    pub tls_insecure: bool,
    pub nick: String,
    /// Ident; defaults to the nick.
    pub username: Option<String>,
    pub realname: String,
    pub server_password: Option<String>,
    pub sasl: Option<SaslConfig>,
    /// Sent to NickServ with IDENTIFY after registration.
    pub nickserv_password: Option<String>,
    /// Channels to join after every registration.
    pub channels: Vec<String>,
    pub command_prefixes: Vec<String>,
    /// Hostmask globs (`nick!user@host`, `*` and `?`) allowed to run admin commands.
    pub owners: Vec<String>,
    pub join_on_invite: bool,
    pub rejoin_on_kick: bool,
    pub rate_limit: RateLimitConfig,
    pub flood: FloodConfig,
    /// SQLite database for plugin state. In-memory when unset.
    pub storage: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: Option<String>,
    /// Enabled plugins and their settings.
    pub plugins: BTreeMap<String, serde_yaml::Value>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            tls: false,
            tls_insecure: false,
            nick: "perch".to_string(),
            username: None,
            realname: "perch IRC bot".to_string(),
            server_password: None,
            sasl: None,
            nickserv_password: None,
            channels: Vec::new(),
            command_prefixes: vec![".".to_string(), "!".to_string()],
            owners: Vec::new(),
            join_on_invite: false,
            rejoin_on_kick: true,
            rate_limit: RateLimitConfig::default(),
            flood: FloodConfig::default(),
            storage: None,
            log_level: None,
            plugins: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
}

/// Per-nick command rate limit. `commands: 0` disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub commands: u32,
    pub per_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands: 5,
            per_secs: 30,
        }
    }
}

/// Outbound flood control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FloodConfig {
    pub burst: u32,
    pub interval_ms: u64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            burst: 5,
            interval_ms: 700,
        }
    }
}

impl BotConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(text)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Fill in derived values: default port, ident.
    pub fn normalize(&mut self) {
        if !self.server.contains(':') {
            self.server = format!("{}:6697", self.server);
        }
        if self.username.is_none() {
            self.username = Some(self.nick.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nick.is_empty() || self.nick.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("invalid nick '{}'", self.nick)));
        }
        if let Some(bad) = self.channels.iter().find(|c| !is_channel(c)) {
            return Err(ConfigError::Invalid(format!(
                "channel '{bad}' must start with '#' or '&'"
            )));
        }
        if self.command_prefixes.is_empty() || self.command_prefixes.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid(
                "command_prefixes must be a list of non-empty strings".to_string(),
            ));
        }
        if self.rate_limit.commands > 0 && self.rate_limit.per_secs == 0 {
            return Err(ConfigError::Invalid("rate_limit.per_secs must be positive".to_string()));
        }
        for name in self.plugins.keys() {
            if !crate::plugins::NAMES.contains(&name.as_str()) {
                return Err(ConfigError::UnknownPlugin(name.clone()));
            }
        }
        Ok(())
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.server.clone(),
            nick: self.nick.clone(),
            user: self.username.clone().unwrap_or_else(|| self.nick.clone()),
            realname: self.realname.clone(),
            tls: self.tls,
            tls_insecure: self.tls_insecure,
            password: self.server_password.clone(),
            sasl: self.sasl.as_ref().map(|s| SaslCredentials {
                username: s.username.clone(),
                password: s.password.clone(),
            }),
            flood_burst: self.flood.burst,
            flood_interval: Duration::from_millis(self.flood.interval_ms),
            ..Default::default()
        }
    }

    /// Backoff settings. Channels are left empty: the bot joins them itself
    /// once NickServ identification has been sent.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::default()
    }

    /// Deserialize a plugin's section. A missing or empty section yields
    /// the plugin's defaults.
    pub fn plugin_config<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        parse_section(name, self.plugins.get(name))
    }
}

pub fn parse_section<T: DeserializeOwned>(
    name: &str,
    value: Option<&serde_yaml::Value>,
) -> Result<T, ConfigError> {
    let value = match value {
        None | Some(serde_yaml::Value::Null) => serde_yaml::Value::Mapping(Default::default()),
        Some(v) => v.clone(),
    };
    serde_yaml::from_value(value).map_err(|e| ConfigError::plugin(name, e.to_string()))
}
