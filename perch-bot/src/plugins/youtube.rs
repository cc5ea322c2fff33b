//! `youtube <query>`: top YouTube search hit, via the Data API v3.
//! Also describes YouTube links posted in channels.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::Deps;
use crate::error::{ConfigError, PluginError, PluginResult};
use crate::plugin::{Context, Handler, Plugin};

const NAME: &str = "youtube";

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:\S*?&)?v=|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .unwrap()
});
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").unwrap()
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YouTubeConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    /// Describe YouTube links seen in messages.
    pub follow_links: bool,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://www.googleapis.com/youtube/v3".to_string(),
            follow_links: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: Snippet,
    #[serde(default)]
    statistics: Statistics,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

pub struct YouTube {
    api_key: String,
    api_url: String,
    follow_links: bool,
    http: reqwest::Client,
}

impl YouTube {
    pub fn new(config: YouTubeConfig, deps: &Deps) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::plugin(NAME, "missing required api_key"))?;
        Ok(Self {
            api_key,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            follow_links: config.follow_links,
            http: deps.http.clone(),
        })
    }

    async fn search(&self, query: &str) -> PluginResult<String> {
        let found: Items<SearchItem> = self
            .http
            .get(format!("{}/search", self.api_url))
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", "1"),
                ("q", query),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        found
            .items
            .into_iter()
            .find_map(|item| item.id.video_id)
            .ok_or_else(|| PluginError::NotFound(format!("No YouTube results for '{query}'")))
    }

    async fn video(&self, id: &str) -> PluginResult<Video> {
        let found: Items<Video> = self
            .http
            .get(format!("{}/videos", self.api_url))
            .query(&[
                ("part", "snippet,statistics,contentDetails"),
                ("id", id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        found
            .items
            .into_iter()
            .next()
            .ok_or_else(|| PluginError::NotFound(format!("No YouTube video with id {id}")))
    }

    /// Search and describe the top hit.
    pub async fn lookup(&self, query: &str) -> PluginResult<String> {
        let id = self.search(query).await?;
        Ok(describe(&self.video(&id).await?))
    }

    pub async fn describe_id(&self, id: &str) -> PluginResult<String> {
        Ok(describe(&self.video(id).await?))
    }
}

fn describe(video: &Video) -> String {
    let mut parts = vec![
        format!("[ YouTube ] {}", video.snippet.title),
        format!("Uploaded by {}", video.snippet.channel_title),
    ];
    if let Some(details) = &video.content_details {
        parts.push(format_duration(&details.duration));
    }
    if let Some(views) = video.statistics.view_count.as_deref().and_then(|v| v.parse::<u64>().ok()) {
        parts.push(format!("{} views", thousands(views)));
    }
    parts.push(format!("https://youtu.be/{}", video.id));
    parts.join(" | ")
}

/// ISO 8601 duration (`PT1H2M3S`) as `1:02:03`. Zero length means a live
/// stream.
pub fn format_duration(iso: &str) -> String {
    let Some(caps) = DURATION.captures(iso) else {
        return iso.to_string();
    };
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
    let hours = num(1) * 24 + num(2);
    let (minutes, seconds) = (num(3), num(4));
    if hours == 0 && minutes == 0 && seconds == 0 {
        "LIVE".to_string()
    } else if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// `1234567` as `1,234,567`.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl Plugin for YouTube {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handlers(&self) -> Vec<Handler> {
        let mut handlers = vec![Handler::command(
            "search",
            &["youtube", "yt"],
            "youtube <query> - top YouTube result",
        )];
        if self.follow_links {
            handlers.push(Handler::regex("link", LINK.clone(), "YouTube links are described"));
        }
        handlers
    }

    async fn handle(&self, id: &str, ctx: &Context) -> PluginResult {
        let reply = match id {
            "search" => {
                if ctx.args_str().is_empty() {
                    return Err(PluginError::Usage("Usage: youtube <query>".to_string()));
                }
                self.lookup(ctx.args_str()).await?
            }
            "link" => {
                if ctx.command.is_some() {
                    // `.yt <link>` is answered by the search command.
                    return Ok(());
                }
                let Some(video_id) = ctx.capture(1) else {
                    return Ok(());
                };
                self.describe_id(video_id).await?
            }
            _ => return Ok(()),
        };
        ctx.reply(&reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::test_deps;

    #[test]
    fn durations() {
        assert_eq!(format_duration("PT3M33S"), "3:33");
        assert_eq!(format_duration("PT1H2M3S"), "1:02:03");
        assert_eq!(format_duration("PT45S"), "0:45");
        assert_eq!(format_duration("PT2H"), "2:00:00");
        assert_eq!(format_duration("P1DT1M"), "24:01:00");
        assert_eq!(format_duration("P0D"), "LIVE");
        assert_eq!(format_duration("garbage"), "garbage");
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn link_forms() {
        let id = |s: &str| LINK.captures(s).map(|c| c[1].to_string());
        assert_eq!(id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            id("look https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=3").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(id("https://youtu.be/dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(id("https://m.youtube.com/shorts/abcdefghijk").as_deref(), Some("abcdefghijk"));
        assert_eq!(id("https://youtube.com/channel/xyz"), None);
    }

    #[test]
    fn describes_video() {
        let video: Video = serde_json::from_value(serde_json::json!({
            "id": "dQw4w9WgXcQ",
            "snippet": {"title": "Never Gonna Give You Up", "channelTitle": "Rick Astley"},
            "statistics": {"viewCount": "1234567"},
            "contentDetails": {"duration": "PT3M33S"}
        }))
        .unwrap();
        assert_eq!(
            describe(&video),
            "[ YouTube ] Never Gonna Give You Up | Uploaded by Rick Astley | 3:33 | 1,234,567 views | https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn requires_api_key() {
        assert!(YouTube::new(YouTubeConfig::default(), &test_deps()).is_err());
    }
}
