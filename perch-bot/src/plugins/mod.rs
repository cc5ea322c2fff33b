//! Built-in plugins.

pub mod google;
pub mod ticker;
pub mod timezone;
pub mod urls;
pub mod weather;
pub mod wikipedia;
pub mod youtube;

use std::sync::Arc;

use crate::config::{BotConfig, parse_section};
use crate::error::ConfigError;
use crate::plugin::{Messenger, Plugin};
use crate::store::Store;

/// Names accepted under `plugins:` in the config.
pub const NAMES: &[&str] = &[
    "ticker",
    "timezone",
    "wikipedia",
    "weather",
    "youtube",
    "google",
    "urls",
];

/// Shared services handed to every plugin.
#[derive(Clone)]
pub struct Deps {
    pub messenger: Messenger,
    pub store: Arc<Store>,
    pub http: reqwest::Client,
}

/// Construct every plugin named in the config, sorted by name.
pub fn build_all(config: &BotConfig, deps: &Deps) -> Result<Vec<Arc<dyn Plugin>>, ConfigError> {
    config
        .plugins
        .iter()
        .map(|(name, section)| build(name, Some(section), deps))
        .collect()
}

pub fn build(
    name: &str,
    section: Option<&serde_yaml::Value>,
    deps: &Deps,
) -> Result<Arc<dyn Plugin>, ConfigError> {
    let plugin: Arc<dyn Plugin> = match name {
        "ticker" => Arc::new(ticker::Ticker::new(parse_section(name, section)?, deps)?),
        "timezone" => Arc::new(timezone::Timezone::new(parse_section(name, section)?)),
        "wikipedia" => Arc::new(wikipedia::Wikipedia::new(parse_section(name, section)?, deps)),
        "weather" => Arc::new(weather::Weather::new(parse_section(name, section)?, deps)),
        "youtube" => Arc::new(youtube::YouTube::new(parse_section(name, section)?, deps)?),
        "google" => Arc::new(google::Google::new(parse_section(name, section)?, deps)),
        "urls" => Arc::new(urls::Urls::new(parse_section(name, section)?, deps)?),
        other => return Err(ConfigError::UnknownPlugin(other.to_string())),
    };
    Ok(plugin)
}

#[cfg(test)]
pub(crate) fn test_deps() -> Deps {
    Deps {
        messenger: Messenger::new(),
        store: Arc::new(Store::in_memory().unwrap()),
        http: reqwest::Client::new(),
    }
}
