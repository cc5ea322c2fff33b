//! Page titles for links posted in channels.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use url::{Host, Url};

use super::Deps;
use crate::error::{ConfigError, PluginError, PluginResult};
use crate::http::{MAX_HTML_BYTES, USER_AGENT, extract_title, fetch_html, truncate};

const MAX_REDIRECTS: usize = 5;
use crate::plugin::{Context, Handler, Plugin};

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrlsConfig {
    pub max_urls: usize,
    /// Hosts (and their subdomains) other plugins already describe.
    pub ignored_hosts: Vec<String>,
    pub timeout_secs: u64,
    pub max_title_length: usize,
    /// Fetch links that point at loopback, private or link-local addresses.
    pub allow_private_hosts: bool,
}

impl Default for UrlsConfig {
    fn default() -> Self {
        Self {
            max_urls: 2,
            ignored_hosts: vec![
                "youtube.com".to_string(),
                "youtu.be".to_string(),
                "wikipedia.org".to_string(),
            ],
            timeout_secs: 5,
            max_title_length: 200,
            allow_private_hosts: false,
        }
    }
}

pub struct Urls {
    config: UrlsConfig,
    http: reqwest::Client,
}

impl Urls {
    pub fn new(config: UrlsConfig, _deps: &Deps) -> Result<Self, ConfigError> {
        let allow_private = config.allow_private_hosts;
        let redirects = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !allow_private && attempt.url().host().is_some_and(|h| !is_public_host(&h)) {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirects)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::plugin("urls", e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Links in `text` worth fetching, in order, at most `max_urls`.
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in URL.find_iter(text) {
            if out.len() >= self.config.max_urls {
                break;
            }
            let link = m
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '>']);
            let Ok(parsed) = url::Url::parse(link) else {
                continue;
            };
            let Some(host) = parsed.host_str() else {
                continue;
            };
            if self.is_ignored(host) || out.iter().any(|l| l == link) {
                continue;
            }
            out.push(link.to_string());
        }
        out
    }

    fn is_ignored(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.config.ignored_hosts.iter().any(|ignored| {
            let ignored = ignored.to_ascii_lowercase();
            host == ignored || host.ends_with(&format!(".{ignored}"))
        })
    }

    pub async fn title(&self, link: &str) -> PluginResult<Option<String>> {
        if !self.config.allow_private_hosts {
            ensure_public(&Url::parse(link).map_err(|e| anyhow!("bad url {link}: {e}"))?).await?;
        }
        let html = fetch_html(&self.http, link, MAX_HTML_BYTES).await?;
        Ok(extract_title(&html).map(|t| truncate(&t, self.config.max_title_length)))
    }
}

/// Reject links whose host is, or resolves to, a non-public address.
async fn ensure_public(link: &Url) -> PluginResult {
    let host = link.host().ok_or_else(|| anyhow!("no host in {link}"))?;
    let addrs: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => {
            let port = link.port_or_known_default().unwrap_or(80);
            tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| anyhow!("cannot resolve {domain}: {e}"))?
                .map(|sa| sa.ip())
                .collect()
        }
    };
    match addrs.into_iter().find(|ip| !is_public_ip(*ip)) {
        Some(ip) => Err(PluginError::Other(anyhow!("refusing to fetch {link}: {ip} is not public"))),
        None => Ok(()),
    }
}

/// Redirect targets are checked without a DNS lookup.
fn is_public_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => {
            let d = d.to_ascii_lowercase();
            d != "localhost" && !d.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_public_ip(IpAddr::V4(*ip)),
        Host::Ipv6(ip) => is_public_ip(IpAddr::V6(*ip)),
    }
}

pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || a == 0
                || (a == 100 && (b & 0xc0) == 64))
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_ip(IpAddr::V4(v4)),
            None => {
                let first = v6.segments()[0];
                !(v6.is_loopback()
                    || v6.is_unspecified()
                    || (first & 0xfe00) == 0xfc00
                    || (first & 0xffc0) == 0xfe80)
            }
        },
    }
}

#[async_trait]
impl Plugin for Urls {
    fn name(&self) -> &'static str {
        "urls"
    }

    fn handlers(&self) -> Vec<Handler> {
        vec![Handler::regex("title", URL.clone(), "Links posted in channels get their page title")]
    }

    async fn handle(&self, _id: &str, ctx: &Context) -> PluginResult {
        if ctx.is_private || ctx.command.is_some() {
            return Ok(());
        }
        for link in self.candidates(&ctx.text) {
            match self.title(&link).await {
                Ok(Some(title)) => ctx.reply(&format!("^ {title}")).await?,
                Ok(None) => tracing::debug!(url = %link, "No title"),
                Err(e) => tracing::debug!(url = %link, error = %e, "Title fetch failed"),
            }
        }
        Ok(())
    }
}
