#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use perch_bot::bot::Bot;
use perch_bot::config::BotConfig;
use perch_bot::plugin::{Messenger, Plugin};
use perch_bot::plugins::Deps;
use perch_bot::store::Store;
use perch_sdk::client::{ClientHandle, Command};
use perch_sdk::irc::Source;
use tokio::sync::mpsc;

/// A bot wired to a command receiver instead of a server.
pub struct Harness {
    pub bot: Bot,
    pub deps: Deps,
    rx: mpsc::Receiver<Command>,
}

impl Harness {
    pub fn new() -> Self {
        let (handle, rx) = ClientHandle::channel(256);
        let messenger = Messenger::new();
        messenger.attach(handle);
        let deps = Deps {
            messenger: messenger.clone(),
            store: Arc::new(Store::in_memory().unwrap()),
            http: perch_bot::http::build_client(Duration::from_secs(5)).unwrap(),
        };
        let config = BotConfig::from_yaml("nick: perch\nrate_limit: {commands: 0}\n").unwrap();
        let bot = Bot::new(&config, messenger);
        Self { bot, deps, rx }
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.bot.register(plugin);
    }

    /// Deliver a message and wait for every handler it triggered.
    pub async fn say(&mut self, from: &str, target: &str, text: &str) -> Vec<(String, String)> {
        for task in self.bot.handle_message(&Source::parse(from), target, text).await {
            task.await.unwrap();
        }
        self.drain()
    }

    /// Messages sent so far as (target, text).
    pub fn drain(&mut self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            if let Command::Privmsg { target, text } | Command::Notice { target, text } = cmd {
                out.push((target, text));
            }
        }
        out
    }
}

pub fn yaml(text: &str) -> serde_yaml::Value {
    serde_yaml::from_str(text).unwrap()
}

pub fn texts(sent: Vec<(String, String)>) -> Vec<String> {
    sent.into_iter().map(|(_, text)| text).collect()
}
