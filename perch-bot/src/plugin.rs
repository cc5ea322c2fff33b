//! Plugin API.
//!
//! A plugin declares [`Handler`]s (command names or regexes) and receives a
//! [`Context`] for every matching message. Plugins that talk on their own
//! schedule keep a [`Messenger`], which survives reconnects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use perch_sdk::client::ClientHandle;
use perch_sdk::event::Event;
use perch_sdk::irc::Source;
use regex::Regex;

use crate::error::PluginResult;

/// What makes a handler fire.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// First word after a command prefix, e.g. `.time` or `perch: time`.
    Command(Vec<&'static str>),
    /// Any message whose text matches.
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct Handler {
    /// Passed back to [`Plugin::handle`].
    pub id: &'static str,
    pub trigger: Trigger,
    /// One-line usage shown by `help`.
    pub help: &'static str,
}

impl Handler {
    pub fn command(id: &'static str, names: &[&'static str], help: &'static str) -> Self {
        Self {
            id,
            trigger: Trigger::Command(names.to_vec()),
            help,
        }
    }

    pub fn regex(id: &'static str, regex: Regex, help: &'static str) -> Self {
        Self {
            id,
            trigger: Trigger::Regex(regex),
            help,
        }
    }

    /// Command names, empty for regex handlers.
    pub fn names(&self) -> &[&'static str] {
        match &self.trigger {
            Trigger::Command(names) => names,
            Trigger::Regex(_) => &[],
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once when the plugin is registered.
    fn handlers(&self) -> Vec<Handler>;

    /// Run the handler `id` for a matching message.
    async fn handle(&self, id: &str, ctx: &Context) -> PluginResult;

    /// Every IRC event, after the bot's own processing.
    async fn on_event(&self, _event: &Event) -> PluginResult {
        Ok(())
    }

    /// Start background work (timers, pollers).
    async fn start(&self) {}

    /// Stop background work before shutdown.
    async fn close(&self) {}
}

/// Delay between the lines of one [`Messenger::say`].
pub const LINE_PAUSE: Duration = Duration::from_millis(500);
const MAX_LINE_LEN: usize = 400;

/// Sends messages through whichever connection is current.
#[derive(Clone, Default)]
pub struct Messenger {
    handle: Arc<RwLock<Option<ClientHandle>>>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a (new) connection.
    pub fn attach(&self, handle: ClientHandle) {
        *self.handle.write() = Some(handle);
    }

    pub fn detach(&self) {
        *self.handle.write() = None;
    }

    pub fn handle(&self) -> Option<ClientHandle> {
        self.handle.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle().is_some_and(|h| h.is_connected())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> anyhow::Result<()> {
        match self.handle() {
            Some(h) => h.privmsg(target, text).await,
            None => {
                tracing::warn!(target, "Not connected, dropping message");
                Ok(())
            }
        }
    }

    pub async fn notice(&self, target: &str, text: &str) -> anyhow::Result<()> {
        match self.handle() {
            Some(h) => h.notice(target, text).await,
            None => {
                tracing::warn!(target, "Not connected, dropping notice");
                Ok(())
            }
        }
    }

    /// Post multi-line text, one IRC line per input line, wrapped at word
    /// boundaries, with [`LINE_PAUSE`] between lines.
    pub async fn say(&self, target: &str, text: &str) -> anyhow::Result<()> {
        for (i, line) in wrap_lines(text, MAX_LINE_LEN).into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(LINE_PAUSE).await;
            }
            self.privmsg(target, &line).await?;
        }
        Ok(())
    }

    /// Send the same text to several channels.
    pub async fn broadcast(&self, channels: &[String], text: &str) -> anyhow::Result<()> {
        for channel in channels {
            self.privmsg(channel, text).await?;
        }
        Ok(())
    }
}

/// Wrap text into lines of max_len, breaking on word boundaries.
pub fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.len() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

/// A message that matched a handler.
#[derive(Clone)]
pub struct Context {
    pub source: Source,
    /// Where the message was sent (channel or our nick).
    pub target: String,
    /// Where replies go: the channel, or the sender for private messages.
    pub reply_target: String,
    pub text: String,
    /// Lowercased command word, when the message was a command.
    pub command: Option<String>,
    /// Whitespace-split arguments after the command word.
    pub args: Vec<String>,
    /// Raw argument text after the command word.
    pub rest: String,
    /// Regex capture groups (index 0 is the whole match).
    pub captures: Vec<Option<String>>,
    pub is_private: bool,
    pub messenger: Messenger,
}

impl Context {
    pub fn nick(&self) -> &str {
        &self.source.nick
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }

    pub fn args_str(&self) -> &str {
        &self.rest
    }

    pub fn capture(&self, i: usize) -> Option<&str> {
        self.captures.get(i).and_then(|c| c.as_deref())
    }

    pub async fn reply(&self, text: &str) -> anyhow::Result<()> {
        self.messenger.privmsg(&self.reply_target, text).await
    }

    /// Reply addressed to the sender (`nick: text`) in channels.
    pub async fn reply_to(&self, text: &str) -> anyhow::Result<()> {
        if self.is_private {
            self.reply(text).await
        } else {
            self.reply(&format!("{}: {text}", self.source.nick)).await
        }
    }

    /// Private notice to the sender.
    pub async fn notice(&self, text: &str) -> anyhow::Result<()> {
        self.messenger.notice(&self.source.nick, text).await
    }

    /// Multi-line reply through [`Messenger::say`].
    pub async fn say(&self, text: &str) -> anyhow::Result<()> {
        self.messenger.say(&self.reply_target, text).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn wrap_breaks_long_lines() {
        let text = "aaa bbb ccc ddd";
        assert_eq!(wrap_lines(text, 7), vec!["aaa bbb", "ccc ddd"]);
        assert_eq!(wrap_lines("one\ntwo", 100), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn reply_goes_to_channel_and_reply_to_addresses_sender() {
        let (messenger, mut rx) = messenger();
        let ctx = context(&messenger, "alice!a@host", ".time utc");
        ctx.reply("hello").await.unwrap();
        ctx.reply_to("hi").await.unwrap();
        assert_eq!(
            sent(&mut rx),
            vec![
                ("#test".to_string(), "hello".to_string()),
                ("#test".to_string(), "alice: hi".to_string()),
            ]
        );
        assert_eq!(ctx.command.as_deref(), Some("time"));
        assert_eq!(ctx.arg(0), Some("utc"));
    }

    #[tokio::test]
    async fn detached_messenger_drops_silently() {
        let messenger = Messenger::new();
        assert!(!messenger.is_connected());
        messenger.privmsg("#test", "nobody hears this").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn say_pauses_between_wrapped_lines() {
        let (messenger, mut rx) = messenger();
        let started = tokio::time::Instant::now();
        messenger.say("#test", "one\ntwo\nthree").await.unwrap();
        assert_eq!(started.elapsed(), LINE_PAUSE * 2);
        let lines: Vec<String> = sent(&mut rx).into_iter().map(|(_, l)| l).collect();
        assert_eq!(lines, vec!["one", "two", "three"]);

        let started = tokio::time::Instant::now();
        messenger.say("#test", "single").await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_channel() {
        let (messenger, mut rx) = messenger();
        let channels = vec!["#a".to_string(), "#b".to_string()];
        messenger.broadcast(&channels, "tick").await.unwrap();
        let targets: Vec<String> = sent(&mut rx).into_iter().map(|(t, _)| t).collect();
        assert_eq!(targets, vec!["#a", "#b"]);
    }
}
