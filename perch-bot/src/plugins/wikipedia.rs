//! `wiki <article>`: article summaries from the Wikipedia REST API.
//! Also summarizes Wikipedia links posted in channels.

use std::sync::LazyLock;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use perch_sdk::format::bold;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;

use super::Deps;
use crate::error::{PluginError, PluginResult};
use crate::http::{collapse_whitespace, truncate};
use crate::plugin::{Context, Handler, Plugin};

const TITLE_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-').remove(b'.');

static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://([a-z]{2,3}(?:-[a-z]+)?)\.(?:m\.)?wikipedia\.org/wiki/([^\s#?<>]+)")
        .unwrap()
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WikipediaConfig {
    pub language: String,
    /// REST API base; defaults to `https://{language}.wikipedia.org/api/rest_v1`.
    pub api_url: Option<String>,
    pub max_description_length: usize,
    /// Summarize Wikipedia links seen in messages.
    pub follow_links: bool,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            api_url: None,
            max_description_length: 250,
            follow_links: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(rename = "type", default)]
    kind: String,
    title: String,
    #[serde(default)]
    extract: String,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: PageUrl,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

pub struct Wikipedia {
    config: WikipediaConfig,
    http: reqwest::Client,
}

impl Wikipedia {
    pub fn new(config: WikipediaConfig, deps: &Deps) -> Self {
        Self {
            config,
            http: deps.http.clone(),
        }
    }

    fn api_base(&self, language: &str) -> String {
        match &self.config.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{language}.wikipedia.org/api/rest_v1"),
        }
    }

    /// Fetch and format the summary for `title`.
    pub async fn lookup(&self, language: &str, title: &str) -> PluginResult<String> {
        let title = title.trim().replace(' ', "_");
        let url = format!(
            "{}/page/summary/{}",
            self.api_base(language),
            utf8_percent_encode(&title, TITLE_SEGMENT)
        );
        tracing::debug!(url = %url, "Wikipedia lookup");

        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(PluginError::NotFound(format!(
                "No Wikipedia article found for '{}'",
                title.replace('_', " ")
            )));
        }
        let summary: Summary = resp.error_for_status()?.json().await?;
        Ok(self.format_summary(&summary, language))
    }

    fn format_summary(&self, summary: &Summary, language: &str) -> String {
        let url = summary
            .content_urls
            .as_ref()
            .map(|u| u.desktop.page.clone())
            .unwrap_or_else(|| {
                format!(
                    "https://{language}.wikipedia.org/wiki/{}",
                    utf8_percent_encode(&summary.title.replace(' ', "_"), TITLE_SEGMENT)
                )
            });
        let description = if summary.kind == "disambiguation" {
            "may refer to several articles".to_string()
        } else {
            truncate(
                &collapse_whitespace(&summary.extract),
                self.config.max_description_length,
            )
        };
        if description.is_empty() {
            format!("Wikipedia: {} - {url}", bold(&summary.title))
        } else {
            format!("Wikipedia: {} - {description} - {url}", bold(&summary.title))
        }
    }
}

#[async_trait]
impl Plugin for Wikipedia {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    fn handlers(&self) -> Vec<Handler> {
        let mut handlers = vec![Handler::command(
            "wiki",
            &["wiki", "w"],
            "wiki <article> - summary of a Wikipedia article",
        )];
        if self.config.follow_links {
            handlers.push(Handler::regex("link", LINK.clone(), "Wikipedia links are summarized"));
        }
        handlers
    }

    async fn handle(&self, id: &str, ctx: &Context) -> PluginResult {
        let reply = match id {
            "wiki" => {
                if ctx.args_str().is_empty() {
                    return Err(PluginError::Usage("Usage: wiki <article>".to_string()));
                }
                self.lookup(&self.config.language, ctx.args_str()).await?
            }
            "link" => {
                if ctx.command.is_some() {
                    // `.wiki <link>` and friends are answered by the command.
                    return Ok(());
                }
                let language = ctx.capture(1).unwrap_or("en").to_string();
                let raw = ctx.capture(2).unwrap_or_default();
                let title = percent_decode_str(raw).decode_utf8_lossy().into_owned();
                self.lookup(&language, &title).await?
            }
            _ => return Ok(()),
        };
        ctx.reply(&reply).await?;
        Ok(())
    }
}
