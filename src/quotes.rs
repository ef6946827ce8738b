use crate::storage_utils::QuoteConfig;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// One daily bar as returned by a price source. `close` is `None` when the
/// provider sent a null or empty value for that session.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteResult {
    pub symbol: String,
    /// Session of `last_close`.
    pub session: NaiveDate,
    pub previous_close: f64,
    pub last_close: f64,
    pub pct_change: f64,
}

/// Why a symbol produced no quote for this run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QuoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("symbol not found")]
    NotFound,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("need at least 2 sessions with a valid close, got {0}")]
    InsufficientData(usize),

    #[error("no session on {0}")]
    NoSession(NaiveDate),
}

impl QuoteError {
    /// Only transport-level failures are worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuoteError::Network(_) | QuoteError::RateLimited)
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Daily bars for `symbol` between `start` and `end` (both inclusive),
    /// oldest first.
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, QuoteError>;
}

// --- Yahoo chart payload ---

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Deserialize, Debug)]
struct ChartQuote {
    #[serde(default)]
    close: Vec<LenientPrice>,
}

#[derive(Deserialize, Debug)]
struct LenientPrice(#[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, null, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Turns a chart payload into dated bars. Timestamps are shifted by the
/// exchange's GMT offset before taking the calendar date.
fn parse_chart(body: &[u8]) -> Result<Vec<PriceBar>, QuoteError> {
    let response: ChartResponse =
        serde_json::from_slice(body).map_err(|e| QuoteError::Malformed(e.to_string()))?;

    if let Some(err) = response.chart.error {
        if err.code.eq_ignore_ascii_case("Not Found") {
            return Err(QuoteError::NotFound);
        }
        return Err(QuoteError::Malformed(format!("{}: {}", err.code, err.description)));
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| QuoteError::Malformed("empty chart result".to_string()))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let offset = result.meta.gmtoffset;
    let bars = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(&ts, LenientPrice(close))| {
            DateTime::from_timestamp(ts + offset, 0).map(|dt| PriceBar {
                date: dt.date_naive(),
                close,
            })
        })
        .collect();

    Ok(bars)
}

/// Yahoo Finance v8 chart endpoint, daily interval.
pub struct YahooChartSource {
    client: Client,
}

impl YahooChartSource {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriceSource for YahooChartSource {
    async fn daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, QuoteError> {
        // period2 is exclusive, so ask up to the start of the following day.
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp());
        let period2 = end
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc().timestamp());
        let (Some(period1), Some(period2)) = (period1, period2) else {
            return Err(QuoteError::Malformed(format!("invalid window {start}..{end}")));
        };

        let url = format!("{}/{}", CHART_URL, symbol);
        let query = [
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", "1d".to_string()),
        ];

        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| QuoteError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => {
                return Err(QuoteError::RateLimited);
            }
            StatusCode::NOT_FOUND => return Err(QuoteError::NotFound),
            status if !status.is_success() => {
                return Err(QuoteError::Network(format!("HTTP {}", status)));
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| QuoteError::Network(e.to_string()))?;
        parse_chart(&body)
    }
}

/// Picks the closes of the last two sessions on or before `as_of`.
///
/// Bars sharing a date collapse to the last one given for that date (the
/// chart API can append the live session as an extra row). With
/// `require_session` the last valid close must be dated exactly `as_of`;
/// a symbol that did not trade that day yields `NoSession`.
pub fn quote_from_bars(
    symbol: &str,
    bars: &[PriceBar],
    as_of: NaiveDate,
    require_session: bool,
) -> Result<QuoteResult, QuoteError> {
    let sessions: BTreeMap<NaiveDate, f64> = bars
        .iter()
        .filter(|b| b.date <= as_of)
        .filter_map(|b| match b.close {
            Some(c) if c.is_finite() && c > 0.0 => Some((b.date, c)),
            _ => None,
        })
        .collect();

    let mut latest = sessions.iter().rev();
    let (Some((&session, &last_close)), Some((_, &previous_close))) = (latest.next(), latest.next())
    else {
        return Err(QuoteError::InsufficientData(sessions.len()));
    };

    if require_session && session != as_of {
        return Err(QuoteError::NoSession(as_of));
    }

    Ok(QuoteResult {
        symbol: symbol.to_string(),
        session,
        previous_close,
        last_close,
        pct_change: (last_close - previous_close) / previous_close * 100.0,
    })
}

/// Every symbol of a batch ends up in exactly one of the two lists.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<QuoteResult>,
    pub failures: Vec<(String, QuoteError)>,
}

pub struct QuoteFetcher<S: PriceSource> {
    source: S,
    lookback_days: u64,
    request_delay: Duration,
    retry_once: bool,
}

impl<S: PriceSource> QuoteFetcher<S> {
    pub fn new(source: S, config: &QuoteConfig) -> Self {
        Self {
            source,
            // Two bars need at least two calendar days.
            lookback_days: config.lookback_days.max(2),
            request_delay: Duration::from_millis(config.request_delay_ms),
            retry_once: config.retry_once,
        }
    }

    pub async fn fetch_quote(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        require_session: bool,
    ) -> Result<QuoteResult, QuoteError> {
        let start = as_of
            .checked_sub_days(Days::new(self.lookback_days))
            .unwrap_or(NaiveDate::MIN);

        let mut bars = self.source.daily_bars(symbol, start, as_of).await;
        if let Err(e) = &bars {
            if self.retry_once && e.is_transient() {
                debug!("{}: {} - retrying once", symbol, e);
                tokio::time::sleep(self.request_delay).await;
                bars = self.source.daily_bars(symbol, start, as_of).await;
            }
        }

        quote_from_bars(symbol, &bars?, as_of, require_session)
    }

    /// Fetches every symbol in order, sleeping `request_delay` between
    /// requests. Failures are logged and collected, never propagated.
    pub async fn fetch_batch(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        require_session: bool,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.fetch_quote(symbol, as_of, require_session).await {
                Ok(quote) => {
                    debug!(
                        "{}: {:.2} -> {:.2} on {} ({:+.2}%)",
                        symbol, quote.previous_close, quote.last_close, quote.session, quote.pct_change
                    );
                    outcome.results.push(quote);
                }
                Err(e) => {
                    warn!("{}: skipped ({})", symbol, e);
                    outcome.failures.push((symbol.clone(), e));
                }
            }

            let processed = i + 1;
            if processed % 50 == 0 {
                info!(
                    "Processed {}/{} stocks... ({} successful)",
                    processed,
                    symbols.len(),
                    outcome.results.len()
                );
            }
        }

        info!(
            "Successfully processed {} out of {} stocks",
            outcome.results.len(),
            symbols.len()
        );
        outcome
    }
}
