mod common;

use httpmock::prelude::*;
use perch_bot::plugins;
use serde_json::json;

use common::{Harness, texts, yaml};

fn harness_with(name: &str, section: &str) -> Harness {
    let mut h = Harness::new();
    let plugin = plugins::build(name, Some(&yaml(section)), &h.deps).unwrap();
    h.register(plugin);
    h
}

#[tokio::test]
async fn wiki_command_and_links() {
    let server = MockServer::start_async().await;
    let summary = server
        .mock_async(|when, then| {
            when.method(GET).path("/page/summary/Ferris");
            then.status(200).json_body(json!({
                "type": "standard",
                "title": "Ferris",
                "extract": "Ferris is   the unofficial\nmascot of Rust.",
                "content_urls": {"desktop": {"page": "https://en.wikipedia.org/wiki/Ferris"}}
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/page/summary/no_such_page");
            then.status(404).json_body(json!({"type": "not_found"}));
        })
        .await;

    let mut h = harness_with("wikipedia", &format!("api_url: {}\n", server.base_url()));
    let expected = "Wikipedia: \x02Ferris\x02 - Ferris is the unofficial mascot of Rust. - https://en.wikipedia.org/wiki/Ferris";

    assert_eq!(texts(h.say("alice!a@h", "#chan", ".wiki Ferris").await), vec![expected]);
    assert_eq!(
        texts(h.say("alice!a@h", "#chan", "see https://en.wikipedia.org/wiki/Ferris for more").await),
        vec![expected]
    );
    assert_eq!(
        texts(h.say("alice!a@h", "#chan", ".wiki no such page").await),
        vec!["alice: No Wikipedia article found for 'no such page'"]
    );
    assert_eq!(
        texts(h.say("alice!a@h", "#chan", ".wiki").await),
        vec!["alice: Usage: wiki <article>"]
    );
    summary.assert_hits_async(2).await;
}

#[tokio::test]
async fn weather_uses_saved_location() {
    let server = MockServer::start_async().await;
    let london = server
        .mock_async(|when, then| {
            when.method(GET).path("/London").query_param("format", "j1");
            then.status(200).json_body(json!({
                "current_condition": [{
                    "temp_C": "12", "temp_F": "54", "FeelsLikeC": "10", "FeelsLikeF": "50",
                    "humidity": "80", "weatherDesc": [{"value": "Light rain"}],
                    "windspeedKmph": "15", "winddir16Point": "SW"
                }],
                "nearest_area": [{
                    "areaName": [{"value": "London"}],
                    "region": [{"value": "City of London, Greater London"}],
                    "country": [{"value": "United Kingdom"}]
                }]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/Atlantis");
            then.status(404).body("Unknown location");
        })
        .await;

    let mut h = harness_with("weather", &format!("api_url: {}\n", server.base_url()));
    let report = "[ London, City of London, Greater London, United Kingdom ] Light rain | 12°C (54°F), feels like 10°C (50°F) | Humidity 80% | Wind 15 km/h SW";

    assert_eq!(
        texts(h.say("bob!b@h", "#chan", ".we").await),
        vec!["bob: Usage: weather <location> (or set a default with setw <location>)"]
    );
    assert_eq!(
        texts(h.say("bob!b@h", "#chan", ".setw London").await),
        vec!["bob: Your default location is now 'London'"]
    );
    assert_eq!(texts(h.say("Bob!b@h", "#chan", ".we").await), vec![report]);
    assert_eq!(texts(h.say("carol!c@h", "#chan", ".weather London").await), vec![report]);
    assert_eq!(
        texts(h.say("carol!c@h", "#chan", ".weather Atlantis").await),
        vec!["carol: Couldn't find weather for 'Atlantis'"]
    );
    london.assert_hits_async(2).await;
}

#[tokio::test]
async fn youtube_search_and_links() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("q", "never gonna")
                .query_param("type", "video")
                .query_param("key", "secret");
            then.status(200).json_body(json!({
                "items": [{"id": {"kind": "youtube#video", "videoId": "dQw4w9WgXcQ"}}]
            }));
        })
        .await;
    let videos = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/videos")
                .query_param("id", "dQw4w9WgXcQ")
                .query_param("key", "secret");
            then.status(200).json_body(json!({
                "items": [{
                    "id": "dQw4w9WgXcQ",
                    "snippet": {"title": "Never Gonna Give You Up", "channelTitle": "Rick Astley"},
                    "statistics": {"viewCount": "1500000000"},
                    "contentDetails": {"duration": "PT3M33S"}
                }]
            }));
        })
        .await;

    let mut h = harness_with(
        "youtube",
        &format!("api_key: secret\napi_url: {}\n", server.base_url()),
    );
    let expected = "[ YouTube ] Never Gonna Give You Up | Uploaded by Rick Astley | 3:33 | 1,500,000,000 views | https://youtu.be/dQw4w9WgXcQ";

    assert_eq!(texts(h.say("dave!d@h", "#chan", ".yt never gonna").await), vec![expected]);
    assert_eq!(
        texts(h.say("dave!d@h", "#chan", "classic https://www.youtube.com/watch?v=dQw4w9WgXcQ").await),
        vec![expected]
    );
    search.assert_hits_async(1).await;
    videos.assert_hits_async(2).await;
}

#[tokio::test]
async fn youtube_command_with_a_link_answers_once() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("q", "https://youtu.be/dQw4w9WgXcQ");
            then.status(200).json_body(json!({
                "items": [{"id": {"kind": "youtube#video", "videoId": "dQw4w9WgXcQ"}}]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/videos").query_param("id", "dQw4w9WgXcQ");
            then.status(200).json_body(json!({
                "items": [{
                    "id": "dQw4w9WgXcQ",
                    "snippet": {"title": "T", "channelTitle": "C"},
                    "statistics": {"viewCount": "1"},
                    "contentDetails": {"duration": "PT3M33S"}
                }]
            }));
        })
        .await;

    let mut h = harness_with(
        "youtube",
        &format!("api_key: secret\napi_url: {}\n", server.base_url()),
    );
    assert_eq!(
        texts(h.say("dave!d@h", "#chan", ".yt https://youtu.be/dQw4w9WgXcQ").await),
        vec!["[ YouTube ] T | Uploaded by C | 3:33 | 1 views | https://youtu.be/dQw4w9WgXcQ"]
    );
}

#[tokio::test]
async fn google_lists_result_links() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/search").query_param("q", "rust lang");
            then.status(200)
                .header("content-type", "text/html; charset=UTF-8")
                .body(
                    r#"<html><body>
                    <a href="/url?q=https://www.rust-lang.org/&amp;sa=U">Rust</a>
                    <a href="/url?q=https://support.google.com/&amp;sa=U">Help</a>
                    <a href="/url?q=https://doc.rust-lang.org/book/&amp;sa=U">Book</a>
                    </body></html>"#,
                );
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/search").query_param("q", "zzzz");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html><body>nothing</body></html>");
        })
        .await;

    let mut h = harness_with("google", &format!("search_url: {}\n", server.url("/search")));
    assert_eq!(
        texts(h.say("erin!e@h", "#chan", ".g rust lang").await),
        vec!["Google results for \"rust lang\": https://www.rust-lang.org/ | https://doc.rust-lang.org/book/"]
    );
    assert_eq!(
        texts(h.say("erin!e@h", "#chan", ".google zzzz").await),
        vec!["No results found for \"zzzz\""]
    );
}

#[tokio::test]
async fn link_titles_for_html_pages_only() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/article");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html><head><title>\n  Borrowing &amp; Ownership\n</title></head></html>");
        })
        .await;
    let data = server
        .mock_async(|when, then| {
            when.method(GET).path("/data.json");
            then.status(200).json_body(json!({"title": "not a page"}));
        })
        .await;

    let mut h = harness_with("urls", "max_urls: 2\nallow_private_hosts: true\n");
    let article = server.url("/article");

    assert_eq!(
        texts(h.say("frank!f@h", "#chan", &format!("read this: {article}.")).await),
        vec!["^ Borrowing & Ownership"]
    );
    assert!(h.say("frank!f@h", "#chan", &server.url("/data.json")).await.is_empty());
    data.assert_hits_async(1).await;

    // Private messages are left alone.
    assert!(h.say("frank!f@h", "perch", &article).await.is_empty());
}

#[tokio::test]
async fn link_titles_skip_private_hosts_by_default() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/admin");
            then.status(200)
                .header("content-type", "text/html")
                .body("<title>Router admin</title>");
        })
        .await;

    let mut h = harness_with("urls", "max_urls: 2\n");
    assert!(h.say("mallory!m@h", "#chan", &server.url("/admin")).await.is_empty());
    page.assert_hits_async(0).await;
}

#[tokio::test]
async fn time_command_resolves_zones() {
    let mut h = harness_with("timezone", "default_zone: Asia/Tokyo\n");

    let default = texts(h.say("gina!g@h", "#chan", ".time").await);
    assert_eq!(default.len(), 1);
    assert!(default[0].starts_with("Asia/Tokyo: "), "{default:?}");
    assert!(default[0].ends_with("JST (UTC+09:00)"), "{default:?}");

    let fixed = texts(h.say("gina!g@h", "#chan", ".tz UTC-03:30").await);
    assert!(fixed[0].starts_with("UTC-03:30: "), "{fixed:?}");

    assert_eq!(
        texts(h.say("gina!g@h", "#chan", ".tz Mars/Olympus").await),
        vec!["gina: Unknown time zone 'Mars/Olympus'"]
    );
}
