//! Alpha Vantage daily time series client.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{PluginError, PluginResult};

pub const DEFAULT_API_URL: &str = "https://www.alphavantage.co/query";

/// Days searched backwards for a trading day (weekends, holidays).
const LOOKBACK_DAYS: u32 = 5;

/// Daily values keyed by field name (`open`, `high`, `low`, `close`, `volume`).
pub type TimeSeries = BTreeMap<NaiveDate, HashMap<String, f64>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyQuote {
    pub current: f64,
    pub open: f64,
    pub close: f64,
    /// Change of today's close against the previous trading day's close.
    pub percentage: f64,
}

#[derive(Clone)]
pub struct AlphaVantage {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    retry_wait: Duration,
    max_tries: u32,
}

impl AlphaVantage {
    pub fn new(
        client: reqwest::Client,
        api_url: String,
        api_key: String,
        retry_wait: Duration,
        max_tries: u32,
    ) -> Self {
        Self {
            client,
            api_url,
            api_key,
            retry_wait,
            max_tries: max_tries.max(1),
        }
    }

    /// Quote for the latest trading day on or before `today`.
    pub async fn daily(&self, symbol: &str, today: NaiveDate) -> PluginResult<DailyQuote> {
        let series = self.time_series_daily(symbol).await?;
        quote_from_series(&series, today)
    }

    pub async fn time_series_daily(&self, symbol: &str) -> PluginResult<TimeSeries> {
        let body = self
            .request(
                "TIME_SERIES_DAILY",
                &[("symbol", symbol), ("outputsize", "compact")],
            )
            .await?;
        parse_time_series(&body)
    }

    /// Call the API, retrying failed or throttled requests.
    pub async fn request(&self, function: &str, params: &[(&str, &str)]) -> PluginResult<Value> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("function", function));
        query.push(("apikey", self.api_key.as_str()));
        query.push(("datatype", "json"));

        let mut tries_remaining = self.max_tries;
        loop {
            tries_remaining -= 1;
            match self.request_once(&query).await {
                Ok(body) => return Ok(body),
                Err(e) if tries_remaining == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        function,
                        error = %e,
                        tries_remaining,
                        "Alpha Vantage request failed"
                    );
                    tokio::time::sleep(self.retry_wait).await;
                }
            }
        }
    }

    async fn request_once(&self, query: &[(&str, &str)]) -> PluginResult<Value> {
        let body: Value = self
            .client
            .get(&self.api_url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_throttled(&body)?;
        Ok(body)
    }
}

fn check_throttled(body: &Value) -> PluginResult {
    if let Some(note) = body.get("Note").and_then(Value::as_str)
        && note.contains("call frequency")
    {
        return Err(PluginError::Throttled(note.to_string()));
    }
    if let Some(info) = body.get("Information").and_then(Value::as_str)
        && info.to_lowercase().contains("rate limit")
    {
        return Err(PluginError::Throttled(info.to_string()));
    }
    Ok(())
}

/// Extract `Time Series (Daily)`, stripping the `"4. "` style key prefixes.
pub fn parse_time_series(body: &Value) -> PluginResult<TimeSeries> {
    let days = body
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("Response missing expected 'Time Series (Daily)' key: {body}"))?;

    let mut series = TimeSeries::new();
    for (date, values) in days {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| anyhow!("bad date '{date}': {e}"))?;
        let Some(values) = values.as_object() else {
            continue;
        };
        let mut fields = HashMap::new();
        for (key, value) in values {
            let name = key.split_once(". ").map_or(key.as_str(), |(_, name)| name);
            let number = value
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| value.as_f64())
                .ok_or_else(|| anyhow!("bad value for {date} {key}: {value}"))?;
            fields.insert(name.to_string(), number);
        }
        series.insert(date, fields);
    }
    Ok(series)
}

/// Pick "today" (the latest trading day on or before `today`) and the
/// trading day before it.
pub fn quote_from_series(series: &TimeSeries, today: NaiveDate) -> PluginResult<DailyQuote> {
    let current_day = find_day(series, today)?;
    let previous_day = current_day
        .pred_opt()
        .ok_or_else(|| anyhow!("date out of range"))
        .and_then(|d| find_day(series, d))?;

    let current = &series[&current_day];
    let previous = &series[&previous_day];
    let field = |values: &HashMap<String, f64>, day: NaiveDate, name: &str| {
        values
            .get(name)
            .copied()
            .ok_or_else(|| PluginError::Other(anyhow!("no '{name}' value for {day}")))
    };

    let close = field(current, current_day, "close")?;
    let open = field(current, current_day, "open")?;
    let previous_close = field(previous, previous_day, "close")?;
    Ok(DailyQuote {
        current: close,
        open,
        close,
        percentage: super::market::delta(close, previous_close),
    })
}

fn find_day(series: &TimeSeries, start: NaiveDate) -> Result<NaiveDate, anyhow::Error> {
    let mut day = start;
    for _ in 0..LOOKBACK_DAYS {
        if series.contains_key(&day) {
            return Ok(day);
        }
        day = day.pred_opt().ok_or_else(|| anyhow!("date out of range"))?;
    }
    if series.contains_key(&day) {
        Ok(day)
    } else {
        Err(anyhow!("Can't find data as far back as {day}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Meta Data": {"2. Symbol": "SPY"},
            "Time Series (Daily)": {
                "2024-03-08": {"1. open": "100.0", "2. high": "110.0", "3. low": "99.0", "4. close": "105.0", "5. volume": "1000"},
                "2024-03-07": {"1. open": "98.0", "2. high": "101.0", "3. low": "97.0", "4. close": "100.0", "5. volume": "900"},
                "2024-03-01": {"1. open": "90.0", "2. high": "91.0", "3. low": "89.0", "4. close": "90.0", "5. volume": "800"}
            }
        })
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn strips_key_prefixes() {
        let series = parse_time_series(&sample()).unwrap();
        let day = &series[&date("2024-03-08")];
        assert_eq!(day["open"], 100.0);
        assert_eq!(day["close"], 105.0);
        assert_eq!(day["volume"], 1000.0);
    }

    #[test]
    fn quote_on_trading_day() {
        let series = parse_time_series(&sample()).unwrap();
        let quote = quote_from_series(&series, date("2024-03-08")).unwrap();
        assert_eq!(quote.current, 105.0);
        assert_eq!(quote.open, 100.0);
        assert!((quote.percentage - 5.0).abs() < 1e-9);
    }

    #[test]
    fn weekend_walks_back_to_friday() {
        let series = parse_time_series(&sample()).unwrap();
        let quote = quote_from_series(&series, date("2024-03-10")).unwrap();
        assert_eq!(quote.close, 105.0);
    }

    #[test]
    fn previous_day_may_be_several_days_back() {
        let series = parse_time_series(&sample()).unwrap();
        // 03-07 pairs with 03-01, six days earlier but within the lookback.
        let quote = quote_from_series(&series, date("2024-03-07")).unwrap();
        assert!((quote.percentage - (100.0 / 90.0 * 100.0 - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn gives_up_beyond_lookback() {
        let series = parse_time_series(&sample()).unwrap();
        assert!(quote_from_series(&series, date("2024-03-20")).is_err());
    }

    #[test]
    fn missing_series_is_an_error() {
        let err = parse_time_series(&json!({"Error Message": "Invalid API call."})).unwrap_err();
        assert!(err.to_string().contains("Time Series (Daily)"));
    }

    #[test]
    fn detects_throttling() {
        let note = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."});
        assert!(matches!(check_throttled(&note), Err(PluginError::Throttled(_))));
        let info = json!({"Information": "Our standard API rate limit is 25 requests per day."});
        assert!(matches!(check_throttled(&info), Err(PluginError::Throttled(_))));
        assert!(check_throttled(&sample()).is_ok());
    }
}
