mod common;

use std::sync::Arc;

use chrono::{Duration as Days, NaiveDate};
use httpmock::prelude::*;
use perch_bot::plugins::ticker::{Ticker, TickerConfig, market};
use serde_json::{Value, json};

use common::{Harness, texts, yaml};

fn bar(open: f64, close: f64) -> Value {
    json!({
        "1. open": format!("{open:.4}"),
        "2. high": format!("{:.4}", open.max(close)),
        "3. low": format!("{:.4}", open.min(close)),
        "4. close": format!("{close:.4}"),
        "5. volume": "123456"
    })
}

/// Daily series with bars for today and yesterday (market time).
fn series(today: (f64, f64), yesterday_close: f64) -> Value {
    let day = market::now().date_naive();
    let fmt = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
    json!({
        "Meta Data": {"1. Information": "Daily Prices"},
        "Time Series (Daily)": {
            fmt(day): bar(today.0, today.1),
            fmt(day - Days::days(1)): bar(yesterday_close, yesterday_close),
        }
    })
}

fn ticker(server: &MockServer, h: &Harness, extra: &str) -> Arc<Ticker> {
    let config: TickerConfig = serde_yaml::from_value(yaml(&format!(
        "api_key: demo\napi_url: {}\nretry_wait_secs: 0\nresolve_pause_secs: 0\nchannels: ['#stocks']\n{extra}",
        server.url("/query")
    )))
    .unwrap();
    Arc::new(Ticker::new(config, &h.deps).unwrap())
}

#[tokio::test]
async fn check_reports_current_value_and_change() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/query")
                .query_param("function", "TIME_SERIES_DAILY")
                .query_param("symbol", "QQQ")
                .query_param("outputsize", "compact")
                .query_param("apikey", "demo")
                .query_param("datatype", "json");
            then.status(200).json_body(series((100.0, 105.0), 100.0));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(&server, &h, "");
    h.register(t);

    let replies = texts(h.say("alice!a@h", "#chan", "!check qqq").await);
    assert_eq!(
        replies,
        vec!["Symbol: \x02QQQ\x02 | Current: 105 | Daily Change: \x03095.00%\x03"]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn throttled_requests_are_retried_then_reported() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/query");
            then.status(200).json_body(json!({
                "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
            }));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(&server, &h, "max_tries: 3\n");
    h.register(t);

    let replies = texts(h.say("alice!a@h", "#chan", "!check SPY").await);
    assert_eq!(replies, vec!["alice: Is your symbol correct?"]);
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn relayed_check_is_attributed_to_the_relayed_nick() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/query");
            then.status(200).json_body(json!({"Error Message": "Invalid API call."}));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(&server, &h, "relay_bots: [{nick: bridge}]\n");
    h.register(t);

    let replies = texts(h.say("bridge!b@h", "#chan", "<carol> !check ZZZZ").await);
    assert_eq!(replies, vec!["carol: Is your symbol correct?"]);

    // Same message from a non-relay is ignored.
    assert!(h.say("mallory!m@h", "#chan", "<carol> !check ZZZZ").await.is_empty());
}

#[tokio::test]
async fn predictions_are_recorded_replaced_and_resolved() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/query").query_param("symbol", "SPY");
            then.status(200).json_body(series((100.0, 100.0), 100.0));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(&server, &h, "");
    h.register(t.clone());

    let first = texts(h.say("alice!a@h", "#chan", "!predict spy +4%").await);
    assert_eq!(first.len(), 1);
    assert!(first[0].starts_with("Prediction by alice for \x02SPY\x02 at market "), "{first:?}");
    assert!(first[0].ends_with(": 104.00 (\x03094.00%\x03)"), "{first:?}");

    let second = texts(h.say("alice!a@h", "#chan", "!predict SPY +5%").await);
    assert!(second[0].contains(": 105.00 (\x03095.00%\x03) (replaces old prediction of 104.00 (\x03094.00%\x03) set at "));

    h.say("bob!b@h", "#chan", "!predict SPY -1%").await;
    assert_eq!(t.predictions()["SPY"].len(), 2);

    t.resolve_predictions(market::now()).await;
    let announced = h.drain();
    assert!(announced.iter().all(|(target, _)| target == "#stocks"));
    let lines = texts(announced);
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines[0].starts_with("Prediction by alice for \x02SPY\x02: 105.00 (\x03095.00%\x03). Actual value at "));
    assert!(lines[1].starts_with("Prediction by bob for \x02SPY\x02: 99.00 (\x0304-1.00%\x03)."));
    assert_eq!(
        lines[2],
        "bob had the closest guess for \x02SPY\x02 out of 2 predictions with a prediction of 99.00 (\x0304-1.00%\x03)."
    );
    assert!(t.predictions().is_empty());
}

#[tokio::test]
async fn failed_resolution_is_announced() {
    let server = MockServer::start_async().await;
    let mut spy = server
        .mock_async(|when, then| {
            when.method(GET).path("/query").query_param("symbol", "SPY");
            then.status(200).json_body(series((100.0, 100.0), 100.0));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(&server, &h, "max_tries: 1\n");
    h.register(t.clone());
    h.say("alice!a@h", "#chan", "!predict SPY 1%").await;
    h.say("alice!a@h", "#chan", "!predict NOPE 1%").await;
    h.drain();
    assert_eq!(t.predictions().len(), 1, "unknown symbols are not recorded");

    spy.delete_async().await;
    t.resolve_predictions(market::now()).await;
    assert_eq!(texts(h.drain()), vec!["Error with predictions for symbol SPY."]);
    assert!(t.predictions().is_empty());
}

#[tokio::test]
async fn ticker_line_keeps_config_order_and_skips_failures() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/query").query_param("symbol", "QQQ");
            then.status(200).json_body(series((100.0, 105.0), 100.0));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/query").query_param("symbol", "DIA");
            then.status(200).json_body(series((100.0, 98.0), 100.0));
        })
        .await;

    let mut h = Harness::new();
    let t = ticker(
        &server,
        &h,
        "max_tries: 1\nstocks:\n  QQQ: Nasdaq\n  BAD: Broken\n  DIA: Dow\n",
    );
    t.send_ticker().await;
    assert_eq!(
        h.drain(),
        vec![(
            "#stocks".to_string(),
            "Nasdaq (\x02QQQ\x02): \x03095.00%\x03 | Dow (\x02DIA\x02): \x0304-2.00%\x03".to_string()
        )]
    );
}
