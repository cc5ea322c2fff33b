//! IRC wire format: RFC 1459 lines with IRCv3 message tags.

use std::collections::HashMap;
use std::fmt;

/// Maximum length of a line, excluding tags, including CRLF.
pub const MAX_LINE: usize = 512;
/// Upper bound on a full line including the tag section.
const MAX_LINE_WITH_TAGS: usize = 8191 + MAX_LINE;
/// Bytes reserved for the `:nick!user@host ` prefix the server prepends
/// when relaying our messages.
const PREFIX_RESERVE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line has no command")]
    MissingCommand,
    #[error("line exceeds {0} bytes")]
    TooLong(usize),
}

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 tags (empty if none).
    pub tags: HashMap<String, String>,
    /// Raw prefix without the leading `:`.
    pub prefix: Option<String>,
    /// Uppercased command or three-digit numeric.
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_ascii_uppercase(),
            params,
        }
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE", vec![target.to_string(), text.to_string()])
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", vec![channel.to_string()])
    }

    pub fn part(channel: &str, reason: Option<&str>) -> Self {
        let mut params = vec![channel.to_string()];
        if let Some(r) = reason {
            params.push(r.to_string());
        }
        Self::new("PART", params)
    }

    pub fn quit(reason: Option<&str>) -> Self {
        Self::new("QUIT", reason.map(|r| vec![r.to_string()]).unwrap_or_default())
    }

    pub fn nick(nick: &str) -> Self {
        Self::new("NICK", vec![nick.to_string()])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", vec![token.to_string()])
    }

    /// Parse a raw line, returning `None` for anything malformed.
    pub fn parse(line: &str) -> Option<Self> {
        Self::try_parse(line).ok()
    }

    pub fn try_parse(line: &str) -> Result<Self, ParseError> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if rest.len() > MAX_LINE_WITH_TAGS {
            return Err(ParseError::TooLong(MAX_LINE_WITH_TAGS));
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped
                .split_once(' ')
                .ok_or(ParseError::MissingCommand)?;
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = after.trim_start_matches(' ');
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, after) = stripped
                    .split_once(' ')
                    .ok_or(ParseError::MissingCommand)?;
                rest = after.trim_start_matches(' ');
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.find(" :") {
            Some(i) => (&rest[..i], Some(&rest[i + 2..])),
            None => (rest, None),
        };

        let mut parts = head.split(' ').filter(|s| !s.is_empty());
        let command = parts
            .next()
            .ok_or(ParseError::MissingCommand)?
            .to_ascii_uppercase();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(t) = trailing {
            params.push(t.to_string());
        }

        Ok(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// The parsed sender, if the message carried a prefix.
    pub fn source(&self) -> Option<Source> {
        self.prefix.as_deref().map(Source::parse)
    }

    /// Nick portion of the prefix, or the empty string.
    pub fn source_nick(&self) -> &str {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let v = &self.tags[k];
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={}", escape_tag_value(v))
                    }
                })
                .collect();
            write!(f, "@{} ", rendered.join(";"))?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon = param.is_empty() || param.contains(' ') || param.starts_with(':');
            if i == last && needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// The sender of a message, parsed from `nick!user@host`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Source {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl Source {
    pub fn parse(prefix: &str) -> Self {
        let (nick_user, host) = match prefix.split_once('@') {
            Some((nu, h)) => (nu, Some(h.to_string())),
            None => (prefix, None),
        };
        let (nick, user) = match nick_user.split_once('!') {
            Some((n, u)) => (n, Some(u.to_string())),
            None => (nick_user, None),
        };
        Self {
            nick: nick.to_string(),
            user,
            host,
        }
    }

    /// Render as `nick!user@host`, using `*` for unknown parts.
    pub fn hostmask(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick,
            self.user.as_deref().unwrap_or("*"),
            self.host.as_deref().unwrap_or("*"),
        )
    }

    /// Server prefixes carry no user/host and look like a hostname.
    pub fn is_server(&self) -> bool {
        self.user.is_none() && self.host.is_none() && self.nick.contains('.')
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostmask())
    }
}

/// Channel names start with `#` or `&`.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Largest text payload for `COMMAND target :<text>` that still fits in a
/// single line once the server prepends our prefix.
pub fn max_payload(command: &str, target: &str) -> usize {
    // "COMMAND target :" + CRLF
    let overhead = command.len() + target.len() + 4 + 2;
    MAX_LINE.saturating_sub(overhead + PREFIX_RESERVE).max(16)
}

/// Split text into chunks of at most `max_bytes`, breaking on spaces where
/// possible and never inside a UTF-8 sequence. Embedded newlines always
/// start a new chunk.
pub fn split_message(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(4);
    let mut out = Vec::new();
    for line in text.split(['\r', '\n']).filter(|l| !l.is_empty()) {
        let mut rest = line;
        while rest.len() > max_bytes {
            let mut cut = max_bytes;
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let at_space = rest.as_bytes()[cut] == b' ';
            if !at_space
                && let Some(space) = rest[..cut].rfind(' ')
                && space > 0
            {
                cut = space;
            }
            out.push(rest[..cut].to_string());
            rest = rest[cut..].trim_start_matches(' ');
        }
        if !rest.is_empty() {
            out.push(rest.to_string());
        }
    }
    out
}

/// Client-to-client protocol framing inside PRIVMSG/NOTICE bodies.
pub mod ctcp {
    pub const DELIM: char = '\x01';

    /// Split a CTCP body into (uppercased command, params).
    pub fn parse(text: &str) -> Option<(String, String)> {
        let inner = text.strip_prefix(DELIM)?;
        let inner = inner.strip_suffix(DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }
        let (command, params) = inner.split_once(' ').unwrap_or((inner, ""));
        Some((command.to_ascii_uppercase(), params.to_string()))
    }

    pub fn encode(command: &str, params: &str) -> String {
        if params.is_empty() {
            format!("{DELIM}{command}{DELIM}")
        } else {
            format!("{DELIM}{command} {params}{DELIM}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_prefix() {
        let msg = Message::parse(":alice!al@example.com PRIVMSG #rust :hello there\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!al@example.com"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#rust", "hello there"]);
        assert_eq!(msg.source_nick(), "alice");
    }

    #[test]
    fn parses_tags_with_escapes() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z;note=a\\sb\\:c;flag :srv NOTICE * :hi").unwrap();
        assert_eq!(msg.tags["time"], "2024-01-01T00:00:00Z");
        assert_eq!(msg.tags["note"], "a b;c");
        assert_eq!(msg.tags["flag"], "");
        assert_eq!(msg.command, "NOTICE");
    }

    #[test]
    fn parses_numeric_without_trailing() {
        let msg = Message::parse(":irc.example.net 433 * perch").unwrap();
        assert_eq!(msg.command, "433");
        assert_eq!(msg.params, vec!["*", "perch"]);
    }

    #[test]
    fn trailing_may_contain_colons() {
        let msg = Message::parse("PRIVMSG #a ::) hi: there").unwrap();
        assert_eq!(msg.params[1], ":) hi: there");
    }

    #[test]
    fn lowercase_command_is_normalized() {
        let msg = Message::parse("ping :token").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["token"]);
    }

    #[test]
    fn rejects_empty_and_prefix_only() {
        assert_eq!(Message::try_parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::try_parse(":prefix"), Err(ParseError::MissingCommand));
        assert_eq!(Message::try_parse("@a=b"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn display_adds_colon_only_when_needed() {
        assert_eq!(Message::join("#rust").to_string(), "JOIN #rust");
        assert_eq!(Message::privmsg("#rust", "hi there").to_string(), "PRIVMSG #rust :hi there");
        assert_eq!(Message::privmsg("#rust", ":)").to_string(), "PRIVMSG #rust ::)");
        assert_eq!(Message::quit(None).to_string(), "QUIT");
    }

    #[test]
    fn display_escapes_tags() {
        let mut msg = Message::privmsg("#a", "x");
        msg.tags.insert("+note".to_string(), "a b".to_string());
        assert_eq!(msg.to_string(), "@+note=a\\sb PRIVMSG #a x");
    }

    #[test]
    fn source_parsing() {
        let s = Source::parse("bob!~bob@host.example");
        assert_eq!(s.nick, "bob");
        assert_eq!(s.user.as_deref(), Some("~bob"));
        assert_eq!(s.host.as_deref(), Some("host.example"));
        assert_eq!(s.hostmask(), "bob!~bob@host.example");
        assert!(!s.is_server());

        let server = Source::parse("irc.example.net");
        assert!(server.is_server());
        assert_eq!(server.hostmask(), "irc.example.net!*@*");
    }

    #[test]
    fn split_respects_word_and_char_boundaries() {
        let chunks = split_message("aaaa bbbb cccc", 9);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc"]);

        let chunks = split_message("ééééé", 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), "ééééé");

        assert_eq!(split_message("one\ntwo", 100), vec!["one", "two"]);
        assert!(split_message("", 100).is_empty());
    }

    #[test]
    fn max_payload_leaves_room_for_prefix() {
        let n = max_payload("PRIVMSG", "#rust");
        assert!(n + "PRIVMSG #rust :".len() + 2 + 100 <= MAX_LINE);
    }

    #[test]
    fn ctcp_roundtrip() {
        assert_eq!(
            ctcp::parse("\x01PING 12345\x01"),
            Some(("PING".to_string(), "12345".to_string()))
        );
        assert_eq!(ctcp::parse("\x01version\x01"), Some(("VERSION".to_string(), String::new())));
        assert_eq!(ctcp::parse("plain text"), None);
        assert_eq!(ctcp::encode("VERSION", "perch"), "\x01VERSION perch\x01");
    }
}
