//! Error types for configuration loading and plugin handlers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("plugin '{plugin}': {message}")]
    Plugin { plugin: String, message: String },
}

impl ConfigError {
    pub fn plugin(plugin: &str, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }
}

/// Failure of a plugin handler.
///
/// `Usage` and `NotFound` are shown to the user; everything else is logged.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    Throttled(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Text to send back to the user, if any.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Usage(m) | Self::NotFound(m) => Some(m),
            _ => None,
        }
    }
}

pub type PluginResult<T = ()> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_usage_and_not_found_reach_users() {
        assert_eq!(
            PluginError::Usage("Usage: .wiki <article>".into()).user_message(),
            Some("Usage: .wiki <article>")
        );
        assert_eq!(PluginError::NotFound("No such zone".into()).user_message(), Some("No such zone"));
        assert!(PluginError::Throttled("slow down".into()).user_message().is_none());
        assert!(PluginError::Other(anyhow::anyhow!("boom")).user_message().is_none());
    }
}
