//! `weather [location]`: current conditions from wttr.in.
//! `setw <location>` remembers a default location per nick.

use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;

use super::Deps;
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Context, Handler, Plugin};
use crate::store::Store;

const NAME: &str = "weather";
const LOCATION: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'+')
    .remove(b',')
    .remove(b'-')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub api_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_url: "https://wttr.in".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    current_condition: Vec<Condition>,
    #[serde(default)]
    nearest_area: Vec<Area>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Condition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(rename = "temp_F")]
    temp_f: String,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    #[serde(rename = "FeelsLikeF")]
    feels_like_f: String,
    humidity: String,
    #[serde(default)]
    weather_desc: Vec<Text>,
    windspeed_kmph: String,
    #[serde(rename = "winddir16Point")]
    wind_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Area {
    #[serde(default)]
    area_name: Vec<Text>,
    #[serde(default)]
    region: Vec<Text>,
    #[serde(default)]
    country: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct Text {
    value: String,
}

fn first(texts: &[Text]) -> Option<&str> {
    texts
        .first()
        .map(|t| t.value.trim())
        .filter(|v| !v.is_empty())
}

pub struct Weather {
    api_url: String,
    http: reqwest::Client,
    store: Arc<Store>,
}

impl Weather {
    pub fn new(config: WeatherConfig, deps: &Deps) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http: deps.http.clone(),
            store: deps.store.clone(),
        }
    }

    pub async fn lookup(&self, location: &str) -> PluginResult<String> {
        let query = location.trim().replace(' ', "+");
        let url = format!(
            "{}/{}?format=j1",
            self.api_url,
            utf8_percent_encode(&query, LOCATION)
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), location, "Weather lookup failed");
            return Err(not_found(location));
        }
        let report: Report = resp.json().await?;
        format_report(&report).ok_or_else(|| not_found(location))
    }

    fn saved_location(&self, nick: &str) -> anyhow::Result<Option<String>> {
        self.store.get(NAME, &nick.to_lowercase())
    }
}

fn not_found(location: &str) -> PluginError {
    PluginError::NotFound(format!("Couldn't find weather for '{location}'"))
}

fn format_report(report: &Report) -> Option<String> {
    let current = report.current_condition.first()?;
    let place = report
        .nearest_area
        .first()
        .map(|area| {
            [first(&area.area_name), first(&area.region), first(&area.country)]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    let description = first(&current.weather_desc).unwrap_or("Unknown");

    Some(format!(
        "[ {place} ] {description} | {}°C ({}°F), feels like {}°C ({}°F) | Humidity {}% | Wind {} km/h {}",
        current.temp_c,
        current.temp_f,
        current.feels_like_c,
        current.feels_like_f,
        current.humidity,
        current.windspeed_kmph,
        current.wind_dir,
    ))
}

#[async_trait]
impl Plugin for Weather {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handlers(&self) -> Vec<Handler> {
        vec![
            Handler::command("weather", &["weather", "we"], "weather [location] - current conditions"),
            Handler::command("setw", &["setw"], "setw <location> - remember your default location"),
        ]
    }

    async fn handle(&self, id: &str, ctx: &Context) -> PluginResult {
        match id {
            "setw" => {
                let location = ctx.args_str();
                if location.is_empty() {
                    return Err(PluginError::Usage("Usage: setw <location>".to_string()));
                }
                self.store.set(NAME, &ctx.nick().to_lowercase(), location)?;
                ctx.reply_to(&format!("Your default location is now '{location}'"))
                    .await?;
            }
            _ => {
                let location = match ctx.args_str() {
                    "" => self.saved_location(ctx.nick())?.ok_or_else(|| {
                        PluginError::Usage(
                            "Usage: weather <location> (or set a default with setw <location>)"
                                .to_string(),
                        )
                    })?,
                    given => given.to_string(),
                };
                let reply = self.lookup(&location).await?;
                ctx.reply(&reply).await?;
            }
        }
        Ok(())
    }
}
