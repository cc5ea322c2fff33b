//! Stock ticker and prediction game.
//!
//! Every quarter hour while the US market is open, posts the daily change
//! of the configured symbols. Users can `!check` a symbol and `!predict`
//! where it will be at the next opening or closing bell; predictions are
//! resolved a minute after each bell.

pub mod alphavantage;
pub mod market;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use perch_sdk::format::{bold, colorize_percentage};
use perch_sdk::irc::Source;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};

use self::alphavantage::AlphaVantage;
use super::Deps;
use crate::error::{ConfigError, PluginError, PluginResult};
use crate::plugin::{Context, Handler, Messenger, Plugin};
use crate::store::Store;

const NAME: &str = "ticker";
const MAX_STOCKS: usize = 5;
const STORE_KEY: &str = "predictions";

static CHECK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:<(.+?)>\s+)?!check ([A-Za-z]+)$").unwrap());
static PREDICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:<(.+?)>\s+)?!predict ([A-Za-z]+) ([-+])?(\d+(?:\.\d+)?)%$").unwrap()
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TickerConfig {
    pub api_key: Option<String>,
    pub channels: Vec<String>,
    /// `SYMBOL: Display name`, in ticker order.
    pub stocks: serde_yaml::Mapping,
    pub relay_bots: Vec<RelayBot>,
    pub api_url: String,
    pub retry_wait_secs: u64,
    pub max_tries: u32,
    /// Wait after a bell before resolving predictions.
    pub settle_secs: u64,
    /// Pause between symbols while resolving predictions.
    pub resolve_pause_secs: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            channels: Vec::new(),
            stocks: serde_yaml::Mapping::new(),
            relay_bots: Vec::new(),
            api_url: alphavantage::DEFAULT_API_URL.to_string(),
            retry_wait_secs: 15,
            max_tries: 3,
            settle_secs: 60,
            resolve_pause_secs: 15,
        }
    }
}

/// A bot that relays messages from another network as `<nick> text`.
/// Unset fields match anything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayBot {
    pub nick: Option<String>,
    pub user: Option<String>,
    pub vhost: Option<String>,
}

impl RelayBot {
    fn matches(&self, source: &Source) -> bool {
        self.nick.as_ref().is_none_or(|n| *n == source.nick)
            && self.user.as_ref().is_none_or(|u| Some(u) == source.user.as_ref())
            && self.vhost.as_ref().is_none_or(|h| Some(h) == source.host.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub set_at: DateTime<Utc>,
    /// Open or close the prediction was made against.
    pub base: f64,
    pub prediction: f64,
}

/// symbol -> nick -> prediction
pub type Predictions = BTreeMap<String, BTreeMap<String, Prediction>>;

pub struct Ticker {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    channels: Vec<String>,
    stocks: Vec<(String, String)>,
    relay_bots: Vec<RelayBot>,
    api: AlphaVantage,
    settle: Duration,
    resolve_pause: Duration,
    predictions: Mutex<Predictions>,
    store: Arc<Store>,
    messenger: Messenger,
}

impl Ticker {
    pub fn new(config: TickerConfig, deps: &Deps) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::plugin(NAME, "missing required api_key"))?;
        if config.stocks.len() > MAX_STOCKS {
            return Err(ConfigError::plugin(
                NAME,
                format!("no more than {MAX_STOCKS} stocks may be configured"),
            ));
        }
        let stocks = config
            .stocks
            .iter()
            .map(|(symbol, name)| match (symbol.as_str(), name.as_str()) {
                (Some(s), Some(n)) => Ok((s.to_uppercase(), n.to_string())),
                _ => Err(ConfigError::plugin(NAME, "stocks must map symbols to names")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if config.channels.is_empty() {
            tracing::warn!("No channels for ticker defined in config, ticker will be disabled");
        }
        if stocks.is_empty() {
            tracing::warn!("No stocks for ticker defined in config, ticker will be disabled");
        }

        let predictions = match deps.store.get_json::<Predictions>(NAME, STORE_KEY) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable saved predictions");
                Predictions::new()
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                channels: config.channels,
                stocks,
                relay_bots: config.relay_bots,
                api: AlphaVantage::new(
                    deps.http.clone(),
                    config.api_url,
                    api_key,
                    Duration::from_secs(config.retry_wait_secs),
                    config.max_tries,
                ),
                settle: Duration::from_secs(config.settle_secs),
                resolve_pause: Duration::from_secs(config.resolve_pause_secs),
                predictions: Mutex::new(predictions),
                store: deps.store.clone(),
                messenger: deps.messenger.clone(),
            }),
            scheduler: Mutex::new(None),
        })
    }

    pub fn predictions(&self) -> Predictions {
        self.inner.predictions.lock().clone()
    }

    /// Post the daily change of every configured symbol.
    pub async fn send_ticker(&self) {
        self.inner.send_ticker().await
    }

    /// Announce results for all pending predictions, then clear them.
    pub async fn resolve_predictions(&self, now: DateTime<Tz>) {
        self.inner.resolve_predictions(now).await
    }
}

#[async_trait]
impl Plugin for Ticker {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handlers(&self) -> Vec<Handler> {
        vec![
            Handler::regex("check", CHECK.clone(), "!check <symbol> - current value and daily change"),
            Handler::regex(
                "predict",
                PREDICT.clone(),
                "!predict <symbol> [+-]<n>% - guess the next open or close",
            ),
        ]
    }

    async fn handle(&self, id: &str, ctx: &Context) -> PluginResult {
        match id {
            "check" => self.inner.check(ctx).await,
            "predict" => self.inner.predict(ctx).await,
            _ => Ok(()),
        }
    }

    async fn start(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(run_scheduler(inner));
        if let Some(old) = self.scheduler.lock().replace(task) {
            old.abort();
        }
    }

    async fn close(&self) {
        if let Some(task) = self.scheduler.lock().take() {
            task.abort();
        }
    }
}

async fn run_scheduler(inner: Arc<Inner>) {
    let mut resolutions = JoinSet::new();
    loop {
        let wait = market::until_next_tick(&market::now());
        tracing::debug!(secs = wait.as_secs(), "Next ticker tick");
        tokio::time::sleep(wait).await;

        let now = market::now();
        if market::is_open(&now) && !inner.channels.is_empty() && !inner.stocks.is_empty() {
            inner.send_ticker().await;
        }

        if market::is_opening_bell(&now) || market::is_closing_bell(&now) {
            let inner = inner.clone();
            resolutions.spawn(async move {
                // Stay clear of the 5 calls per minute limit after the ticker.
                tokio::time::sleep(inner.settle).await;
                inner.resolve_predictions(market::now()).await;
            });
        }
        while resolutions.try_join_next().is_some() {}
    }
}

impl Inner {
    /// The nick to credit: the sender, or the relayed nick when the sender
    /// is a known relay bot. `None` for relay-style messages from anyone else.
    fn attributed_nick(&self, ctx: &Context) -> Option<String> {
        match ctx.capture(1) {
            Some(relayed) => self
                .relay_bots
                .iter()
                .any(|bot| bot.matches(&ctx.source))
                .then(|| relayed.to_string()),
            None => Some(ctx.nick().to_string()),
        }
    }

    async fn check(&self, ctx: &Context) -> PluginResult {
        let Some(nick) = self.attributed_nick(ctx) else {
            return Ok(());
        };
        let symbol = ctx.capture(2).unwrap_or_default().to_uppercase();
        match self.api.daily(&symbol, market::now().date_naive()).await {
            Ok(quote) => {
                ctx.reply(&format!(
                    "Symbol: {} | Current: {} | Daily Change: {}",
                    bold(&symbol),
                    quote.current,
                    colorize_percentage(quote.percentage)
                ))
                .await?
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Error looking up symbol");
                ctx.reply(&format!("{nick}: Is your symbol correct?")).await?
            }
        }
        Ok(())
    }

    async fn predict(&self, ctx: &Context) -> PluginResult {
        let Some(nick) = self.attributed_nick(ctx) else {
            return Ok(());
        };
        let symbol = ctx.capture(2).unwrap_or_default().to_uppercase();
        let negative = ctx.capture(3) == Some("-");
        let percent: f64 = ctx
            .capture(4)
            .unwrap_or_default()
            .parse()
            .map_err(|_| PluginError::Usage("Usage: !predict <symbol> [+-]<n>%".to_string()))?;

        let now = market::now();
        let quote = match self.api.daily(&symbol, now.date_naive()).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Error looking up symbol for prediction");
                ctx.reply(&format!("{nick}: Is your symbol correct?")).await?;
                return Ok(());
            }
        };
        let open = market::is_open(&now);
        let base = if open { quote.open } else { quote.close };
        let prediction = predicted_value(base, percent, negative);

        let old = self.save_prediction(
            &symbol,
            &nick,
            Prediction {
                set_at: Utc::now(),
                base,
                prediction,
            },
        );
        let replaces = old
            .map(|old| {
                format!(
                    " (replaces old prediction of {:.2} ({}) set at {})",
                    old.prediction,
                    colorize_percentage(market::delta(old.prediction, old.base)),
                    format_time(&old.set_at),
                )
            })
            .unwrap_or_default();

        ctx.reply(&format!(
            "Prediction by {nick} for {} at market {}: {prediction:.2} ({}){replaces}",
            bold(&symbol),
            if open { "close" } else { "open" },
            colorize_percentage(market::delta(prediction, base)),
        ))
        .await?;
        Ok(())
    }

    /// Store a prediction, returning the one it replaces.
    fn save_prediction(&self, symbol: &str, nick: &str, prediction: Prediction) -> Option<Prediction> {
        let mut predictions = self.predictions.lock();
        let old = predictions
            .entry(symbol.to_string())
            .or_default()
            .insert(nick.to_string(), prediction);
        self.persist(&predictions);
        old
    }

    fn persist(&self, predictions: &Predictions) {
        if let Err(e) = self.store.set_json(NAME, STORE_KEY, predictions) {
            tracing::error!(error = %e, "Failed to save predictions");
        }
    }

    async fn broadcast(&self, text: &str) {
        if let Err(e) = self.messenger.broadcast(&self.channels, text).await {
            tracing::error!(error = %e, "Failed to send ticker message");
        }
    }

    async fn send_ticker(&self) {
        let today = market::now().date_naive();
        let lookups = self.stocks.iter().map(|(symbol, _)| self.api.daily(symbol, today));
        let results = futures::future::join_all(lookups).await;

        let parts: Vec<String> = self
            .stocks
            .iter()
            .zip(results)
            .filter_map(|((symbol, name), result)| match result {
                Ok(quote) => Some(format!(
                    "{name} ({}): {}",
                    bold(symbol),
                    colorize_percentage(quote.percentage)
                )),
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Error fetching symbol for ticker, skipping");
                    None
                }
            })
            .collect();

        if parts.is_empty() {
            return;
        }
        self.broadcast(&parts.join(" | ")).await;
    }

    async fn resolve_predictions(&self, now: DateTime<Tz>) {
        let open = market::is_open(&now);
        let pending = self.predictions.lock().clone();

        for (symbol, by_nick) in &pending {
            if by_nick.is_empty() {
                continue;
            }
            let quote = match self.api.daily(symbol, now.date_naive()).await {
                Ok(quote) => quote,
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Failed to fetch symbol, skipping predictions");
                    self.broadcast(&format!("Error with predictions for symbol {symbol}."))
                        .await;
                    continue;
                }
            };
            let actual = if open { quote.open } else { quote.close };

            for (nick, p) in by_nick {
                self.broadcast(&format!(
                    "Prediction by {nick} for {}: {:.2} ({}). Actual value at {}: {actual:.2} ({}). Prediction set at {}.",
                    bold(symbol),
                    p.prediction,
                    colorize_percentage(market::delta(p.prediction, p.base)),
                    if open { "open" } else { "close" },
                    colorize_percentage(market::delta(actual, p.base)),
                    format_time(&p.set_at),
                ))
                .await;
            }

            if let Some((nick, closest)) = closest_guess(by_nick, actual) {
                self.broadcast(&format!(
                    "{nick} had the closest guess for {} out of {} predictions with a prediction of {:.2} ({}).",
                    bold(symbol),
                    by_nick.len(),
                    closest.prediction,
                    colorize_percentage(market::delta(closest.prediction, actual)),
                ))
                .await;
            }

            tokio::time::sleep(self.resolve_pause).await;
        }

        let mut predictions = self.predictions.lock();
        predictions.clear();
        self.persist(&predictions);
    }
}

/// `base` moved by `percent` percent, down when `negative`.
pub fn predicted_value(base: f64, percent: f64, negative: bool) -> f64 {
    let change = base * percent / 100.0;
    if negative { base - change } else { base + change }
}

fn closest_guess(
    by_nick: &BTreeMap<String, Prediction>,
    actual: f64,
) -> Option<(&String, &Prediction)> {
    by_nick.iter().min_by(|(_, a), (_, b)| {
        (actual - a.prediction)
            .abs()
            .total_cmp(&(actual - b.prediction).abs())
    })
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.with_timezone(&market::MARKET_TZ)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}
