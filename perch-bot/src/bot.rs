//! Event handling and command dispatch.
//!
//! The bot owns the plugin list and turns client events into plugin calls:
//! commands and regex triggers run as spawned tasks, every event is also
//! offered to each enabled plugin's `on_event`. A handful of built-in
//! commands (help, plugins, and owner-only administration) are handled here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use perch_sdk::client::ClientHandle;
use perch_sdk::event::Event;
use perch_sdk::irc::{Source, is_channel};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::BotConfig;
use crate::plugin::{Context, Handler, Messenger, Plugin, Trigger};

pub const VERSION_REPLY: &str = concat!("perch ", env!("CARGO_PKG_VERSION"), " (Rust IRC bot)");
const CTCP_SUPPORTED: &str = "ACTION CLIENTINFO PING TIME VERSION";

const BUILTINS: &[(&str, &str, bool)] = &[
    ("help", "help [command] - list commands or show usage", false),
    ("plugins", "plugins - list plugins and whether they are enabled", false),
    ("join", "join <channel> - join a channel", true),
    ("part", "part [channel] - leave a channel", true),
    ("say", "say <target> <text> - send a message", true),
    ("quit", "quit [message] - disconnect and exit", true),
    ("enable", "enable <plugin> - turn a plugin on", true),
    ("disable", "disable <plugin> - turn a plugin off", true),
];

struct Loaded {
    plugin: Arc<dyn Plugin>,
    handlers: Vec<Handler>,
}

pub struct Bot {
    prefixes: Vec<String>,
    owners: Vec<String>,
    channels: Vec<String>,
    nickserv_password: Option<String>,
    join_on_invite: bool,
    rejoin_on_kick: bool,
    plugins: Vec<Loaded>,
    enabled: RwLock<HashSet<&'static str>>,
    nick: RwLock<String>,
    messenger: Messenger,
    limiter: RateLimiter,
}

impl Bot {
    pub fn new(config: &BotConfig, messenger: Messenger) -> Self {
        Self {
            prefixes: config.command_prefixes.clone(),
            owners: config.owners.iter().map(|o| o.to_lowercase()).collect(),
            channels: config.channels.clone(),
            nickserv_password: config.nickserv_password.clone(),
            join_on_invite: config.join_on_invite,
            rejoin_on_kick: config.rejoin_on_kick,
            plugins: Vec::new(),
            enabled: RwLock::new(HashSet::new()),
            nick: RwLock::new(config.nick.clone()),
            messenger,
            limiter: RateLimiter::new(
                config.rate_limit.commands,
                Duration::from_secs(config.rate_limit.per_secs),
            ),
        }
    }

    /// Add a plugin. Plugins start enabled.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let handlers = plugin.handlers();
        tracing::info!(plugin = plugin.name(), handlers = handlers.len(), "Plugin registered");
        self.enabled.write().insert(plugin.name());
        self.plugins.push(Loaded { plugin, handlers });
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn nick(&self) -> String {
        self.nick.read().clone()
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|l| l.plugin.name()).collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.read().contains(name)
    }

    /// Start every plugin's background work.
    pub async fn start(&self) {
        for loaded in &self.plugins {
            loaded.plugin.start().await;
        }
    }

    /// Stop every plugin's background work.
    pub async fn shutdown(&self) {
        for loaded in &self.plugins {
            tracing::debug!(plugin = loaded.plugin.name(), "Closing plugin");
            loaded.plugin.close().await;
        }
    }

    pub async fn handle_event(&self, handle: &ClientHandle, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Connected => {
                self.messenger.attach(handle.clone());
            }
            Event::Registered { nick } => {
                tracing::info!(nick = %nick, "Registered");
                self.messenger.attach(handle.clone());
                *self.nick.write() = nick.clone();
                if let Some(password) = &self.nickserv_password {
                    handle.privmsg("NickServ", &format!("IDENTIFY {password}")).await?;
                }
                for channel in &self.channels {
                    handle.join(channel).await?;
                }
            }
            Event::NickChanged { old_nick, new_nick } => {
                let mut nick = self.nick.write();
                if nick.eq_ignore_ascii_case(old_nick) {
                    tracing::info!(old = %old_nick, new = %new_nick, "Our nick changed");
                    *nick = new_nick.clone();
                }
            }
            Event::Invited { channel, by } => {
                tracing::info!(channel = %channel, by = %by, "Invited");
                if self.join_on_invite {
                    handle.join(channel).await?;
                }
            }
            Event::Kicked {
                channel,
                nick,
                by,
                reason,
            } if self.is_me(nick) => {
                tracing::warn!(channel = %channel, by = %by, reason = %reason, "Kicked");
                if self.rejoin_on_kick {
                    handle.join(channel).await?;
                }
            }
            Event::Ctcp {
                source,
                command,
                params,
                ..
            } => {
                self.reply_ctcp(handle, source, command, params).await?;
            }
            Event::Message {
                source,
                target,
                text,
                ..
            } => {
                // Handlers run detached so slow HTTP calls never stall the loop.
                drop(self.handle_message(source, target, text).await);
            }
            Event::AuthFailed { reason } => {
                tracing::warn!(reason = %reason, "SASL authentication failed");
            }
            Event::Disconnected { reason } => {
                tracing::info!(reason = %reason, "Disconnected");
                self.messenger.detach();
            }
            _ => {}
        }

        for loaded in self.enabled_plugins() {
            if let Err(e) = loaded.plugin.on_event(event).await {
                tracing::error!(plugin = loaded.plugin.name(), error = %e, "Plugin event handler failed");
            }
        }
        Ok(())
    }

    async fn reply_ctcp(
        &self,
        handle: &ClientHandle,
        source: &Source,
        command: &str,
        params: &str,
    ) -> anyhow::Result<()> {
        let reply = match command {
            "VERSION" => VERSION_REPLY.to_string(),
            "PING" => params.to_string(),
            "TIME" => chrono::Utc::now().to_rfc2822(),
            "CLIENTINFO" => CTCP_SUPPORTED.to_string(),
            _ => {
                tracing::debug!(command, from = %source.nick, "Ignoring CTCP request");
                return Ok(());
            }
        };
        handle.ctcp_reply(&source.nick, command, &reply).await
    }

    /// Dispatch a PRIVMSG. Returns the spawned handler tasks.
    pub async fn handle_message(
        &self,
        source: &Source,
        target: &str,
        text: &str,
    ) -> Vec<JoinHandle<()>> {
        if self.is_me(&source.nick) || source.is_server() {
            return Vec::new();
        }
        let is_private = !is_channel(target);
        let nick = self.nick();
        let command = parse_command(text, &self.prefixes, &nick, is_private);

        let (name, rest) = command.clone().unwrap_or_default();
        let base = Context {
            source: source.clone(),
            target: target.to_string(),
            reply_target: if is_private {
                source.nick.clone()
            } else {
                target.to_string()
            },
            text: text.to_string(),
            command: command.as_ref().map(|(c, _)| c.clone()),
            args: rest.split_whitespace().map(str::to_string).collect(),
            rest,
            captures: Vec::new(),
            is_private,
            messenger: self.messenger.clone(),
        };

        let builtin = command.is_some() && BUILTINS.iter().any(|(b, _, _)| *b == name);
        let matches = if builtin { Vec::new() } else { self.matching(&base) };
        if !builtin && matches.is_empty() {
            return Vec::new();
        }

        let owner = self.is_owner(source);
        if !owner && !self.limiter.check(&source.nick) {
            tracing::debug!(nick = %source.nick, "Rate limited");
            return Vec::new();
        }

        if builtin {
            if let Err(e) = self.run_builtin(&name, owner, &base).await {
                tracing::error!(command = %name, error = %e, "Built-in command failed");
            }
            return Vec::new();
        }

        matches
            .into_iter()
            .map(|(plugin, id, ctx)| {
                tokio::spawn(async move {
                    tracing::debug!(plugin = plugin.name(), handler = id, nick = %ctx.source.nick, "Dispatching");
                    if let Err(e) = plugin.handle(id, &ctx).await {
                        match e.user_message() {
                            Some(msg) => {
                                let _ = ctx.reply_to(msg).await;
                            }
                            None => tracing::error!(
                                plugin = plugin.name(),
                                handler = id,
                                error = %e,
                                "Handler failed"
                            ),
                        }
                    }
                })
            })
            .collect()
    }

    fn matching(&self, base: &Context) -> Vec<(Arc<dyn Plugin>, &'static str, Context)> {
        let mut out = Vec::new();
        for loaded in self.enabled_plugins() {
            for handler in &loaded.handlers {
                let ctx = match &handler.trigger {
                    Trigger::Command(names) => match &base.command {
                        Some(cmd) if names.iter().any(|n| n == cmd) => base.clone(),
                        _ => continue,
                    },
                    Trigger::Regex(re) => match re.captures(&base.text) {
                        Some(caps) => {
                            let mut ctx = base.clone();
                            ctx.captures = caps
                                .iter()
                                .map(|m| m.map(|m| m.as_str().to_string()))
                                .collect();
                            ctx
                        }
                        None => continue,
                    },
                };
                out.push((loaded.plugin.clone(), handler.id, ctx));
            }
        }
        out
    }

    async fn run_builtin(&self, name: &str, owner: bool, ctx: &Context) -> anyhow::Result<()> {
        let admin = BUILTINS.iter().any(|(b, _, a)| *b == name && *a);
        if admin && !owner {
            tracing::warn!(command = name, who = %ctx.source, "Refused admin command");
            return ctx.reply_to("You are not allowed to do that.").await;
        }
        let prefix = self.prefixes.first().map(String::as_str).unwrap_or(".");

        match name {
            "help" => match ctx.arg(0) {
                None => {
                    let mut names: Vec<&str> = BUILTINS
                        .iter()
                        .filter(|(_, _, a)| !*a || owner)
                        .map(|(b, _, _)| *b)
                        .collect();
                    for loaded in self.enabled_plugins() {
                        names.extend(loaded.handlers.iter().filter_map(|h| h.names().first().copied()));
                    }
                    let list: Vec<String> = names.iter().map(|n| format!("{prefix}{n}")).collect();
                    ctx.say(&format!("Commands: {}", list.join(", "))).await
                }
                Some(wanted) => {
                    let wanted = wanted.trim_start_matches(|c: char| prefix.contains(c)).to_lowercase();
                    let help = BUILTINS
                        .iter()
                        .find(|(b, _, _)| *b == wanted)
                        .map(|(_, h, _)| *h)
                        .or_else(|| {
                            self.enabled_plugins()
                                .flat_map(|l| l.handlers.iter())
                                .find(|h| h.names().contains(&wanted.as_str()))
                                .map(|h| h.help)
                        });
                    match help {
                        Some(help) => ctx.reply(&format!("{prefix}{help}")).await,
                        None => ctx.reply_to(&format!("No help for '{wanted}'")).await,
                    }
                }
            },
            "plugins" => {
                let list: Vec<String> = self
                    .plugins
                    .iter()
                    .map(|l| {
                        let name = l.plugin.name();
                        if self.is_enabled(name) {
                            name.to_string()
                        } else {
                            format!("{name} (disabled)")
                        }
                    })
                    .collect();
                if list.is_empty() {
                    ctx.reply("No plugins loaded").await
                } else {
                    ctx.reply(&format!("Plugins: {}", list.join(", "))).await
                }
            }
            "join" => match ctx.arg(0).filter(|c| is_channel(c)) {
                Some(channel) => self.with_handle(|h| async move { h.join(channel).await }).await,
                None => ctx.reply_to("Usage: join <channel>").await,
            },
            "part" => {
                let channel = ctx
                    .arg(0)
                    .filter(|c| is_channel(c))
                    .or((!ctx.is_private).then_some(ctx.target.as_str()));
                match channel {
                    Some(channel) => {
                        self.with_handle(|h| async move { h.part(channel, None).await })
                            .await
                    }
                    None => ctx.reply_to("Usage: part <channel>").await,
                }
            }
            "say" => match ctx.args_str().split_once(char::is_whitespace) {
                Some((target, text)) if !text.trim().is_empty() => {
                    self.messenger.privmsg(target, text.trim()).await
                }
                _ => ctx.reply_to("Usage: say <target> <text>").await,
            },
            "quit" => {
                tracing::info!(by = %ctx.source, "Quit requested");
                self.shutdown().await;
                let message = Some(ctx.args_str()).filter(|m| !m.is_empty());
                self.with_handle(|h| async move { h.quit(message).await }).await
            }
            "enable" | "disable" => {
                let Some(wanted) = ctx.arg(0) else {
                    return ctx.reply_to(&format!("Usage: {name} <plugin>")).await;
                };
                let Some(plugin) = self.plugins.iter().map(|l| l.plugin.name()).find(|n| *n == wanted) else {
                    return ctx.reply_to(&format!("No plugin named '{wanted}'")).await;
                };
                if name == "enable" {
                    self.enabled.write().insert(plugin);
                } else {
                    self.enabled.write().remove(plugin);
                }
                tracing::info!(plugin, by = %ctx.source, "Plugin {name}d");
                ctx.reply_to(&format!("{plugin} {name}d")).await
            }
            _ => Ok(()),
        }
    }

    async fn with_handle<F, Fut>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(ClientHandle) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        match self.messenger.handle() {
            Some(h) => f(h).await,
            None => {
                tracing::warn!("Not connected, ignoring command");
                Ok(())
            }
        }
    }

    fn enabled_plugins(&self) -> impl Iterator<Item = &Loaded> {
        let enabled = self.enabled.read().clone();
        self.plugins
            .iter()
            .filter(move |l| enabled.contains(l.plugin.name()))
    }

    fn is_me(&self, nick: &str) -> bool {
        self.nick.read().eq_ignore_ascii_case(nick)
    }

    pub fn is_owner(&self, source: &Source) -> bool {
        let mask = source.hostmask().to_lowercase();
        self.owners.iter().any(|pattern| glob_match(pattern, &mask))
    }
}

/// Split a message into a lowercased command word and the rest.
///
/// Commands start with one of `prefixes`, or address the bot
/// (`perch: cmd`, `perch, cmd`). In private messages the first word is
/// always the command.
pub fn parse_command(
    text: &str,
    prefixes: &[String],
    nick: &str,
    is_private: bool,
) -> Option<(String, String)> {
    let text = text.trim();
    let body = if let Some(rest) = prefixes.iter().find_map(|p| text.strip_prefix(p.as_str())) {
        rest
    } else if let Some(rest) = strip_addressed(text, nick) {
        rest.trim_start()
    } else if is_private {
        text
    } else {
        return None;
    };
    let (cmd, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    if cmd.is_empty() {
        return None;
    }
    Some((cmd.to_lowercase(), rest.trim().to_string()))
}

fn strip_addressed<'a>(text: &'a str, nick: &str) -> Option<&'a str> {
    let head = text.get(..nick.len())?;
    if !head.eq_ignore_ascii_case(nick) {
        return None;
    }
    let rest = &text[nick.len()..];
    rest.strip_prefix(':').or_else(|| rest.strip_prefix(','))
}

/// Glob with `*` (any run) and `?` (one char). Compares chars exactly;
/// callers lowercase both sides for case-insensitive matching.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Sliding-window limit on commands per nick.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `max == 0` disables limiting.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a command from `nick`; false when over the limit.
    pub fn check(&self, nick: &str) -> bool {
        if self.max == 0 {
            return true;
        }
        let now = Instant::now();
        let mut hits = self.hits.lock();
        hits.retain(|_, queue| {
            while queue.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                queue.pop_front();
            }
            !queue.is_empty()
        });
        let queue = hits.entry(nick.to_lowercase()).or_default();
        if queue.len() >= self.max as usize {
            return false;
        }
        queue.push_back(now);
        true
    }
}
