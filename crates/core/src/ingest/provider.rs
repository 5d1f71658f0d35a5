use crate::config::Settings;
use crate::ingest::types::{BarPair, Lookup, RawBar, SessionStamp};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RANGE: &str = "10d";
const DEFAULT_REQ_DELAY_MS: u64 = 250;
const MAX_BACKOFF_SECS: u64 = 32;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Source of recent daily bars.
#[async_trait::async_trait]
pub trait BarProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Recent daily bars in chronological order. An empty vec means "no data".
    async fn fetch_recent_bars(&self, ticker: &str) -> Result<Vec<RawBar>>;
}

/// Best-effort display names.
#[async_trait::async_trait]
pub trait NameResolver: Send + Sync {
    /// Short display name, or an empty string when nothing is known.
    async fn resolve_name(&self, ticker: &str) -> Result<String>;
}

/// Resolver that never knows anything; every ticker falls back to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNames;

#[async_trait::async_trait]
impl NameResolver for NoNames {
    async fn resolve_name(&self, _ticker: &str) -> Result<String> {
        Ok(String::new())
    }
}

pub async fn fetch_bar_pair(provider: &dyn BarProvider, ticker: &str) -> Lookup<BarPair> {
    match provider.fetch_recent_bars(ticker).await {
        Ok(bars) => match BarPair::from_recent(bars) {
            Some(pair) => Lookup::Found(pair),
            None => Lookup::Empty,
        },
        Err(err) => Lookup::Failed(err),
    }
}

pub async fn lookup_name(names: &dyn NameResolver, ticker: &str) -> Lookup<String> {
    match names.resolve_name(ticker).await {
        Ok(name) => {
            let name = name.trim();
            if name.is_empty() {
                Lookup::Empty
            } else {
                Lookup::Found(name.to_string())
            }
        }
        Err(err) => Lookup::Failed(err),
    }
}

/// Daily bars and names from a Yahoo-style `v8/finance/chart` endpoint.
///
/// Names seen in a bar response are remembered, so resolving a ticker that was just fetched
/// costs no extra request.
#[derive(Debug, Clone)]
pub struct ChartApiProvider {
    http: reqwest::Client,
    base_url: String,
    range: String,
    retries: u32,
    req_delay: Duration,
    names: Arc<Mutex<HashMap<String, String>>>,
}

impl ChartApiProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .market_data_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("MARKET_DATA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("MARKET_DATA_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let req_delay_ms = std::env::var("MARKET_DATA_REQ_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQ_DELAY_MS);

        let range = std::env::var("MARKET_DATA_RANGE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RANGE.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            range,
            retries,
            req_delay: Duration::from_millis(req_delay_ms),
            names: Arc::default(),
        })
    }

    /// Pause the orchestrator should take between tickers.
    pub fn req_delay(&self) -> Duration {
        self.req_delay
    }

    fn remember_name(&self, ticker: &str, name: String) {
        if let Ok(mut names) = self.names.lock() {
            names.insert(ticker.to_string(), name);
        }
    }

    fn cached_name(&self, ticker: &str) -> Option<String> {
        self.names.lock().ok()?.get(ticker).cloned()
    }

    fn url(&self, ticker: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(self.base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid MARKET_DATA_BASE_URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("MARKET_DATA_BASE_URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", ticker]);
        Ok(url)
    }

    async fn fetch_chart(&self, ticker: &str, range: &str) -> Result<ChartResult> {
        let url = self.url(ticker)?;
        let params = [("range", range), ("interval", "1d"), ("events", "history")];

        let mut attempt: u32 = 0;
        let body = loop {
            attempt += 1;

            let res = self.http.get(url.clone()).query(&params).send().await;
            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err).context("chart request failed");
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, %ticker, error = %err, "chart request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res.text().await.context("failed to read chart response")?;

            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < self.retries {
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(attempt, ?backoff, %ticker, http_status = %status, "chart HTTP error; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                anyhow::bail!("chart HTTP {status}: {text}");
            }

            break serde_json::from_str::<ChartResponse>(&text)
                .with_context(|| format!("failed to parse chart response: {text}"))?;
        };

        if let Some(err) = body.chart.error {
            anyhow::bail!("chart error {}: {}", err.code, err.description);
        }

        body.chart
            .result
            .and_then(|r| r.into_iter().next())
            .context("chart response has no result")
    }
}

#[async_trait::async_trait]
impl BarProvider for ChartApiProvider {
    fn provider_name(&self) -> &'static str {
        "chart_api"
    }

    async fn fetch_recent_bars(&self, ticker: &str) -> Result<Vec<RawBar>> {
        let result = self.fetch_chart(ticker, &self.range).await?;
        self.remember_name(ticker, result.meta.display_name());
        Ok(result.into_bars())
    }
}

#[async_trait::async_trait]
impl NameResolver for ChartApiProvider {
    async fn resolve_name(&self, ticker: &str) -> Result<String> {
        if let Some(name) = self.cached_name(ticker) {
            return Ok(name);
        }
        let result = self.fetch_chart(ticker, "1d").await?;
        let name = result.meta.display_name();
        self.remember_name(ticker, name.clone());
        Ok(name)
    }
}

/// 1s, 2s, 4s, ... capped at `MAX_BACKOFF_SECS`.
fn retry_backoff(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SECS.ilog2());
    Duration::from_secs((1u64 << shift).min(MAX_BACKOFF_SECS))
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    long_name: Option<String>,
    #[serde(default)]
    exchange_timezone_name: Option<String>,
    #[serde(default)]
    gmtoffset: Option<i32>,
}

impl ChartMeta {
    fn display_name(&self) -> String {
        [self.short_name.as_deref(), self.long_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    fn session_stamp(&self, unix_secs: i64) -> Option<SessionStamp> {
        let utc: DateTime<Utc> = Utc.timestamp_opt(unix_secs, 0).single()?;

        if let Some(tz) = self
            .exchange_timezone_name
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
        {
            return Some(SessionStamp::Zoned(utc.with_timezone(&tz).fixed_offset()));
        }

        let offset = FixedOffset::east_opt(self.gmtoffset.unwrap_or(0))?;
        Some(SessionStamp::Zoned(utc.with_timezone(&offset)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResult {
    fn into_bars(self) -> Vec<RawBar> {
        let quote = self.indicators.quote.into_iter().next().unwrap_or_default();
        let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

        let mut bars = Vec::with_capacity(self.timestamp.len());
        for (i, ts) in self.timestamp.iter().copied().enumerate() {
            let Some(session) = self.meta.session_stamp(ts) else {
                continue;
            };
            bars.push(RawBar {
                session,
                open: at(&quote.open, i),
                high: at(&quote.high, i),
                low: at(&quote.low, i),
                close: at(&quote.close, i),
                volume: at(&quote.volume, i),
            });
        }
        bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn sample_chart() -> serde_json::Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "D05.SI",
                        "shortName": "  DBS Group Holdings  ",
                        "longName": "DBS Group Holdings Ltd",
                        "exchangeTimezoneName": "Asia/Singapore",
                        "gmtoffset": 28800
                    },
                    "timestamp": [1769994000, 1770080400, 1770166800],
                    "indicators": {
                        "quote": [{
                            "open": [50.1, 50.5, null],
                            "high": [50.9, 51.2, null],
                            "low": [49.8, 50.2, null],
                            "close": [50.4, 51.0, null],
                            "volume": [1200000, 1500000, null]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn parses_chart_into_bars() {
        let parsed: ChartResponse = serde_json::from_value(sample_chart()).unwrap();
        let result = parsed.chart.result.unwrap().into_iter().next().unwrap();
        assert_eq!(result.meta.display_name(), "DBS Group Holdings");

        let bars = result.into_bars();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].close, Some(51.0));
        assert_eq!(bars[2].close, None);

        // 1770080400 = 2026-02-03 01:00 UTC = 09:00 SGT
        match bars[1].session {
            SessionStamp::Zoned(ts) => {
                assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(2026, 2, 3).unwrap());
                assert_eq!(ts.offset().local_minus_utc(), 8 * 3600);
            }
            SessionStamp::Naive(_) => panic!("expected zoned stamp"),
        }

        let pair = BarPair::from_recent(bars).unwrap();
        assert_eq!(pair.current.close, Some(51.0));
        assert_eq!(pair.previous.unwrap().close, Some(50.4));
    }

    #[test]
    fn falls_back_to_gmtoffset_when_zone_unknown() {
        let meta = ChartMeta {
            exchange_timezone_name: Some("Not/AZone".to_string()),
            gmtoffset: Some(-5 * 3600),
            ..ChartMeta::default()
        };
        match meta.session_stamp(0).unwrap() {
            SessionStamp::Zoned(ts) => assert_eq!(ts.offset().local_minus_utc(), -5 * 3600),
            SessionStamp::Naive(_) => panic!("expected zoned stamp"),
        }
    }

    #[test]
    fn name_falls_back_to_long_name() {
        let meta = ChartMeta {
            short_name: Some("   ".to_string()),
            long_name: Some("Long Name".to_string()),
            ..ChartMeta::default()
        };
        assert_eq!(meta.display_name(), "Long Name");
        assert_eq!(ChartMeta::default().display_name(), "");
    }

    #[test]
    fn parses_chart_error_envelope() {
        let v = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let parsed: ChartResponse = serde_json::from_value(v).unwrap();
        assert!(parsed.chart.result.is_none());
        assert_eq!(parsed.chart.error.unwrap().code, "Not Found");
    }

    #[test]
    fn builds_chart_url_with_encoded_ticker() {
        let provider = ChartApiProvider::from_settings(&Settings {
            market_data_base_url: Some("https://example.test/".to_string()),
            ..Settings::default()
        })
        .unwrap();
        let url = provider.url("BRK B").unwrap();
        assert_eq!(url.as_str(), "https://example.test/v8/finance/chart/BRK%20B");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(2));
        assert_eq!(retry_backoff(4), Duration::from_secs(8));
        assert_eq!(retry_backoff(6), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(retry_backoff(100), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(retry_backoff(u32::MAX), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[tokio::test]
    async fn resolves_name_seen_in_bar_response_without_request() {
        // Unroutable base URL: any request would fail the lookup.
        let provider = ChartApiProvider::from_settings(&Settings {
            market_data_base_url: Some("http://127.0.0.1:1".to_string()),
            ..Settings::default()
        })
        .unwrap();
        let parsed: ChartResponse = serde_json::from_value(sample_chart()).unwrap();
        let meta = &parsed.chart.result.unwrap()[0].meta;
        provider.remember_name("D05.SI", meta.display_name());

        match lookup_name(&provider, "D05.SI").await {
            Lookup::Found(name) => assert_eq!(name, "DBS Group Holdings"),
            other => panic!("expected cached name, got {other:?}"),
        }
    }

    struct FailingNames;

    #[async_trait::async_trait]
    impl NameResolver for FailingNames {
        async fn resolve_name(&self, _ticker: &str) -> Result<String> {
            anyhow::bail!("lookup service unavailable")
        }
    }

    #[tokio::test]
    async fn lookup_name_turns_errors_into_values() {
        assert!(matches!(lookup_name(&FailingNames, "AAA").await, Lookup::Failed(_)));
        assert!(matches!(lookup_name(&NoNames, "AAA").await, Lookup::Empty));
    }
}
