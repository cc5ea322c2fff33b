//! `time [zone]`: current time in an IANA zone or at a fixed UTC offset.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::{TZ_VARIANTS, Tz};
use regex::Regex;
use serde::Deserialize;

use crate::error::{PluginError, PluginResult};
use crate::plugin::{Context, Handler, Plugin};

static OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:utc|gmt)?\s*([+-])(\d{1,2})(?::?(\d{2}))?$").unwrap()
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimezoneConfig {
    /// Zone used when none is given.
    pub default_zone: String,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            default_zone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Zone {
    /// Look up a zone: a UTC offset, an exact IANA name (any case), or a
    /// unique city suffix such as `tokyo` or `new york`.
    pub fn resolve(query: &str) -> Result<Self, PluginError> {
        let query = query.trim();
        if let Some(caps) = OFFSET.captures(query) {
            let hours: i32 = caps[2].parse().unwrap_or(0);
            let minutes: i32 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let secs = (hours * 3600 + minutes * 60) * if &caps[1] == "-" { -1 } else { 1 };
            return FixedOffset::east_opt(secs)
                .filter(|_| hours <= 14 && minutes < 60)
                .map(Zone::Fixed)
                .ok_or_else(|| PluginError::NotFound(format!("Invalid UTC offset '{query}'")));
        }
        if query.eq_ignore_ascii_case("utc") || query.eq_ignore_ascii_case("gmt") {
            return Ok(Zone::Named(Tz::UTC));
        }

        let wanted = query.replace(' ', "_");
        if let Some(tz) = TZ_VARIANTS.iter().find(|tz| tz.name().eq_ignore_ascii_case(&wanted)) {
            return Ok(Zone::Named(*tz));
        }

        let suffix = format!("/{}", wanted.to_lowercase());
        let matches: Vec<Tz> = TZ_VARIANTS
            .iter()
            .filter(|tz| tz.name().to_lowercase().ends_with(&suffix))
            .copied()
            .collect();
        match matches.as_slice() {
            [tz] => Ok(Zone::Named(*tz)),
            [] => Err(PluginError::NotFound(format!("Unknown time zone '{query}'"))),
            many => {
                let names: Vec<&str> = many.iter().take(5).map(|tz| tz.name()).collect();
                Err(PluginError::NotFound(format!(
                    "Ambiguous time zone '{query}': {}",
                    names.join(", ")
                )))
            }
        }
    }

    /// e.g. `Asia/Tokyo: Wed 2024-03-06 21:30:00 JST (UTC+09:00)`
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        match self {
            Zone::Named(tz) => {
                let local = now.with_timezone(tz);
                format!(
                    "{}: {} (UTC{})",
                    tz.name(),
                    local.format("%a %Y-%m-%d %H:%M:%S %Z"),
                    local.format("%:z")
                )
            }
            Zone::Fixed(offset) => {
                let local = now.with_timezone(offset);
                format!("UTC{}: {}", local.format("%:z"), local.format("%a %Y-%m-%d %H:%M:%S"))
            }
        }
    }
}

pub struct Timezone {
    default_zone: String,
}

impl Timezone {
    pub fn new(config: TimezoneConfig) -> Self {
        Self {
            default_zone: config.default_zone,
        }
    }
}

#[async_trait]
impl Plugin for Timezone {
    fn name(&self) -> &'static str {
        "timezone"
    }

    fn handlers(&self) -> Vec<Handler> {
        vec![Handler::command(
            "time",
            &["time", "tz"],
            "time [zone] - current time in a zone (Europe/Paris, tokyo, UTC+5)",
        )]
    }

    async fn handle(&self, _id: &str, ctx: &Context) -> PluginResult {
        let query = match ctx.args_str() {
            "" => self.default_zone.as_str(),
            q => q,
        };
        let zone = Zone::resolve(query)?;
        ctx.reply(&zone.describe(Utc::now())).await?;
        Ok(())
    }
}
