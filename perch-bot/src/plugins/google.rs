//! `google <query>`: top result links scraped from a search results page.

use std::sync::LazyLock;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use serde::Deserialize;

use super::Deps;
use crate::error::{PluginError, PluginResult};
use crate::http::{decode_html_entities, fetch_html};
use crate::plugin::{Context, Handler, Plugin};

/// Results pages are larger than article heads.
const MAX_PAGE_BYTES: usize = 1024 * 1024;

static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="/url\?(?:[^"]*?&(?:amp;)?)?q=([^"&]+)"#).unwrap()
});
static DIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="(https?://[^"]+)""#).unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleConfig {
    pub search_url: String,
    pub max_results: usize,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            search_url: "https://www.google.com/search".to_string(),
            max_results: 3,
        }
    }
}

pub struct Google {
    config: GoogleConfig,
    http: reqwest::Client,
}

impl Google {
    pub fn new(config: GoogleConfig, deps: &Deps) -> Self {
        Self {
            config,
            http: deps.http.clone(),
        }
    }

    pub async fn search(&self, query: &str) -> PluginResult<Vec<String>> {
        let url = format!(
            "{}?q={}&num={}&hl=en",
            self.config.search_url,
            utf8_percent_encode(query, NON_ALPHANUMERIC),
            self.config.max_results.max(1) + 2,
        );
        let html = fetch_html(&self.http, &url, MAX_PAGE_BYTES).await?;
        Ok(extract_results(&html, self.config.max_results))
    }
}

/// Result links in page order: `/url?q=` redirect targets, or plain
/// external links when the page has none.
pub fn extract_results(html: &str, max: usize) -> Vec<String> {
    let redirects: Vec<String> = REDIRECT
        .captures_iter(html)
        .map(|c| percent_decode_str(&c[1]).decode_utf8_lossy().into_owned())
        .collect();
    let candidates = if redirects.is_empty() {
        DIRECT
            .captures_iter(html)
            .map(|c| decode_html_entities(&c[1]))
            .collect()
    } else {
        redirects
    };

    let mut results: Vec<String> = Vec::new();
    for link in candidates {
        if results.len() >= max {
            break;
        }
        let Ok(parsed) = url::Url::parse(&link) else {
            continue;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            continue;
        }
        if parsed.host_str().is_none_or(is_google_host) {
            continue;
        }
        if !results.contains(&link) {
            results.push(link);
        }
    }
    results
}

fn is_google_host(host: &str) -> bool {
    let host = host.trim_start_matches("www.");
    host.starts_with("google.")
        || host.contains(".google.")
        || host.ends_with("gstatic.com")
        || host.ends_with("googleusercontent.com")
}

#[async_trait]
impl Plugin for Google {
    fn name(&self) -> &'static str {
        "google"
    }

    fn handlers(&self) -> Vec<Handler> {
        vec![Handler::command("search", &["google", "g"], "google <query> - top search results")]
    }

    async fn handle(&self, _id: &str, ctx: &Context) -> PluginResult {
        let query = ctx.args_str();
        if query.is_empty() {
            return Err(PluginError::Usage("Usage: google <query>".to_string()));
        }
        let results = self.search(query).await?;
        if results.is_empty() {
            ctx.reply(&format!("No results found for \"{query}\"")).await?;
        } else {
            ctx.reply(&format!("Google results for \"{query}\": {}", results.join(" | ")))
                .await?;
        }
        Ok(())
    }
}
