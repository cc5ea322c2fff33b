//! Events emitted by the IRC client for the consumer (bot, UI, etc.)

use std::collections::HashMap;

use crate::irc::Source;

#[derive(Debug, Clone)]
pub enum Event {
    /// Successfully connected to the server.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    /// SASL authentication succeeded.
    Authenticated {
        account: String,
    },
    AuthFailed {
        reason: String,
    },

    /// Someone (possibly us) joined a channel.
    Joined {
        channel: String,
        nick: String,
    },

    /// Someone (possibly us) left a channel.
    Parted {
        channel: String,
        nick: String,
        reason: Option<String>,
    },

    /// A PRIVMSG in a channel or private message.
    Message {
        source: Source,
        target: String,
        text: String,
        /// IRCv3 message tags (empty if none).
        tags: HashMap<String, String>,
    },

    /// A NOTICE from a user (server notices arrive as `ServerNotice`).
    Notice {
        source: Source,
        target: String,
        text: String,
    },

    /// A CTCP request (VERSION, PING, ...). ACTION is delivered as `Message`.
    Ctcp {
        source: Source,
        target: String,
        command: String,
        params: String,
    },

    /// Someone was kicked from a channel.
    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// A user changed nick.
    NickChanged {
        old_nick: String,
        new_nick: String,
    },

    /// We were invited to a channel.
    Invited {
        channel: String,
        by: String,
    },

    /// Channel topic changed or received on join.
    TopicChanged {
        channel: String,
        topic: String,
        set_by: Option<String>,
    },

    /// Server sent an error or notice.
    ServerNotice {
        text: String,
    },

    /// Someone quit the server.
    UserQuit {
        nick: String,
        reason: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },

    /// Raw server line (for debugging).
    RawLine(String),
}
