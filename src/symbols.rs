use crate::error::{Result, TrackerError};
use crate::storage_utils::SymbolConfig;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

fn ticker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9&.\-]+$").expect("static regex"))
}

/// Sector used when the constituent list has no industry for a symbol.
pub const OTHER_SECTOR: &str = "Other";

/// One member of the tracked universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constituent {
    pub symbol: String,
    pub sector: String,
}

impl Constituent {
    pub fn new(symbol: impl Into<String>, sector: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sector: sector.into(),
        }
    }
}

pub fn symbols_of(universe: &[Constituent]) -> Vec<String> {
    universe.iter().map(|c| c.symbol.clone()).collect()
}

/// Extracts tickers from the index constituent CSV (`Symbol` column, any
/// case), appending `suffix`. The optional `Industry` column becomes the
/// sector. Invalid and duplicate rows are skipped.
pub fn parse_symbol_csv(body: &[u8], suffix: &str) -> Result<Vec<Constituent>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers = reader.headers()?.clone();
    let column_of = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let symbol_column = column_of("symbol")
        .ok_or_else(|| TrackerError::SourceUnavailable("no Symbol column".to_string()))?;
    let industry_column = column_of("industry");

    let mut seen = HashSet::new();
    let mut universe = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(raw) = record.get(symbol_column) else {
            continue;
        };
        let ticker = raw.to_ascii_uppercase();
        if ticker.is_empty() || !ticker_pattern().is_match(&ticker) {
            continue;
        }
        if !seen.insert(ticker.clone()) {
            continue;
        }
        let sector = industry_column
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .unwrap_or(OTHER_SECTOR);
        universe.push(Constituent::new(format!("{}{}", ticker, suffix), sector));
    }

    if universe.is_empty() {
        return Err(TrackerError::SourceUnavailable(
            "symbol list is empty".to_string(),
        ));
    }
    Ok(universe)
}

/// The configured fallback tickers. No industry data ships with them, so
/// they all land in `OTHER_SECTOR`.
pub fn fallback_universe(config: &SymbolConfig) -> Vec<Constituent> {
    config
        .fallback
        .iter()
        .map(|s| Constituent::new(format!("{}{}", s, config.suffix), OTHER_SECTOR))
        .collect()
}

pub struct SymbolSource {
    client: Client,
    config: SymbolConfig,
}

impl SymbolSource {
    pub fn new(config: SymbolConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_remote(&self) -> Result<Vec<Constituent>> {
        let response = self
            .client
            .get(&self.config.list_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TrackerError::SourceUnavailable(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| TrackerError::SourceUnavailable(e.to_string()))?;

        parse_symbol_csv(&body, &self.config.suffix)
    }

    /// Remote constituent list, or the static fallback on any failure.
    /// Never empty as long as the fallback list is not.
    pub async fn get_symbols(&self) -> Vec<Constituent> {
        info!("Fetching stock list from {}", self.config.list_url);
        match self.fetch_remote().await {
            Ok(universe) => {
                let sectors: HashSet<&str> = universe.iter().map(|c| c.sector.as_str()).collect();
                info!(
                    "Found {} stocks across {} sectors",
                    universe.len(),
                    sectors.len()
                );
                universe
            }
            Err(e) => {
                let fallback = fallback_universe(&self.config);
                warn!("{} - using {} fallback stocks", e, fallback.len());
                fallback
            }
        }
    }
}
