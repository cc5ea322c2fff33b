//! perch-sdk: async IRC client.
//!
//! - [`client`]: connection, registration, keepalive, reconnect
//! - [`irc`]: wire format
//! - [`event`]: events delivered to consumers
//! - [`format`]: mIRC formatting codes
//! - [`throttle`]: outbound flood control

pub mod client;
pub mod event;
pub mod format;
pub mod irc;
pub mod throttle;
