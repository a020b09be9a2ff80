use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use crate::completion::response_json_or_error;
use crate::config::EngineConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub as_of: Option<String>,
}

/// Market-data boundary: a price for the ticker, or an error meaning the
/// data is unavailable.
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;
    fn quote(&self, ticker: &str) -> Result<Quote>;
}

pub struct AlphaVantageQuotes {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl AlphaVantageQuotes {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build market-data HTTP client")?;
        Ok(Self {
            api_base: config.quotes_api_base.clone(),
            api_key: config.quotes_api_key.clone(),
            http,
        })
    }
}

impl QuoteSource for AlphaVantageQuotes {
    fn name(&self) -> &str {
        "alphavantage"
    }

    fn quote(&self, ticker: &str) -> Result<Quote> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("ALPHAVANTAGE_API_KEY is not set");
        };
        let endpoint = format!("{}/query", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", ticker),
                ("apikey", api_key),
            ])
            .send()
            // The query string carries the API key.
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("alphavantage request for {ticker} failed"))?;
        let parsed = response_json_or_error("alphavantage", response)?;
        parse_global_quote(ticker, &parsed)
    }
}

pub(crate) fn parse_global_quote(ticker: &str, payload: &Value) -> Result<Quote> {
    for key in ["Note", "Information", "Error Message"] {
        if let Some(message) = payload.get(key).and_then(Value::as_str) {
            bail!("alphavantage: {message}");
        }
    }
    let Some(quote) = payload.get("Global Quote").and_then(Value::as_object) else {
        bail!("alphavantage response has no Global Quote for {ticker}");
    };
    let Some(raw_price) = quote.get("05. price").and_then(Value::as_str) else {
        bail!("no quote available for {ticker}");
    };
    let price = raw_price
        .trim()
        .parse::<f64>()
        .with_context(|| format!("alphavantage returned invalid price '{raw_price}'"))?;
    if !price.is_finite() {
        bail!("no quote available for {ticker}");
    }
    Ok(Quote {
        ticker: quote
            .get("01. symbol")
            .and_then(Value::as_str)
            .unwrap_or(ticker)
            .to_string(),
        price,
        as_of: quote
            .get("07. latest trading day")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Fixed price table, for offline sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticQuotes {
    prices: BTreeMap<String, f64>,
}

impl StaticQuotes {
    pub fn new<'a>(prices: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|(ticker, price)| (ticker.to_ascii_uppercase(), price))
                .collect(),
        }
    }

    /// Loads a `{"AAPL": 189.84, ...}` object.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let parsed: BTreeMap<String, f64> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a ticker-to-price object", path.display()))?;
        Ok(Self::new(
            parsed
                .iter()
                .map(|(ticker, price)| (ticker.as_str(), *price)),
        ))
    }
}

impl QuoteSource for StaticQuotes {
    fn name(&self) -> &str {
        "static"
    }

    fn quote(&self, ticker: &str) -> Result<Quote> {
        let key = ticker.to_ascii_uppercase();
        let Some(price) = self.prices.get(&key) else {
            bail!("no quote available for {key}");
        };
        Ok(Quote {
            ticker: key,
            price: *price,
            as_of: None,
        })
    }
}
