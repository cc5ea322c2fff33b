//! perch-bot: a plugin-driven IRC bot built on perch-sdk.
//!
//! - `config`: YAML configuration
//! - `bot`: event handling, command dispatch, built-in commands
//! - `plugin`: the plugin API (`Plugin`, `Handler`, `Context`, `Messenger`)
//! - `plugins`: ticker, timezone, wikipedia, weather, youtube, google, urls
//! - `store`: SQLite key-value state for plugins
//! - `http`: shared HTTP and HTML helpers

pub mod bot;
pub mod config;
pub mod error;
pub mod http;
pub mod plugin;
pub mod plugins;
pub mod store;
