//! Shared HTTP plumbing for plugins: client construction, bounded HTML
//! fetching, and title scraping.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::PluginError;

pub const USER_AGENT: &str = concat!("perch/", env!("CARGO_PKG_VERSION"), " (IRC bot)");

/// Largest HTML body we read when scraping.
pub const MAX_HTML_BYTES: usize = 256 * 1024;

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static OG_TITLE: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r#"(?i)<meta[^>]*(?:property|name)=["']og:title["'][^>]*content=["']([^"']*)["']"#).unwrap(),
        Regex::new(r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*(?:property|name)=["']og:title["']"#).unwrap(),
    ]
});
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[a-zA-Z]{2,8});").unwrap());

/// Build the HTTP client plugins share.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(USER_AGENT)
        .build()
}

/// Fetch a page, rejecting non-HTML responses and reading at most
/// `max_bytes` of the body.
pub async fn fetch_html(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<String, PluginError> {
    let mut resp = client.get(url).send().await?.error_for_status()?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
        return Err(PluginError::Other(anyhow::anyhow!(
            "not an HTML page ({content_type})"
        )));
    }

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = max_bytes.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= max_bytes {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Page title: `og:title` when present, otherwise `<title>`.
pub fn extract_title(html: &str) -> Option<String> {
    let raw = OG_TITLE
        .iter()
        .find_map(|re| re.captures(html))
        .or_else(|| TITLE_TAG.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())?;
    let title = collapse_whitespace(&decode_html_entities(raw));
    (!title.is_empty()).then_some(title)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_html_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(entity)
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "laquo" => '«',
        "raquo" => '»',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        _ => return None,
    })
}

/// Shorten to at most `max_chars` characters, ending with `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
