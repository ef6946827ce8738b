//! The fetch -> classify -> aggregate -> persist pass, run once per
//! invocation.

use crate::aggregate::{DailyAggregateRecord, DailyDetailRecord, aggregate};
use crate::backfill;
use crate::history::HistoryStore;
use crate::quotes::{PriceSource, QuoteError, QuoteFetcher, YahooChartSource};
use crate::sectors::{SectorRecord, aggregate_sectors};
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use crate::symbols::{Constituent, SymbolSource, symbols_of};
use anyhow::Result;
use chrono::{Local, NaiveDate};
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct DailyRun {
    pub record: DailyAggregateRecord,
    pub details: Vec<DailyDetailRecord>,
    pub sectors: Vec<SectorRecord>,
    pub failures: Vec<(String, QuoteError)>,
    pub symbols_requested: usize,
}

/// Storage directory next to the binary.
pub async fn open_storage() -> Result<AsyncStorageManager> {
    AsyncStorageManager::new_relative("storage").await
}

pub fn history_store(storage: &AsyncStorageManager, config: &AppConfig) -> HistoryStore {
    HistoryStore::new(storage.clone(), config.history.clone())
}

fn quote_fetcher(config: &AppConfig) -> Result<QuoteFetcher<YahooChartSource>> {
    let source = YahooChartSource::new(Duration::from_secs(config.quotes.timeout_secs))?;
    Ok(QuoteFetcher::new(source, &config.quotes))
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Tracks `date` for `universe` and persists the result: the history row,
/// the detail file and the sector rows, each replacing any earlier run for
/// the same date. The history is read before any quote is requested, so
/// a corrupt log aborts the run early.
pub async fn track_day<S: PriceSource>(
    store: &HistoryStore,
    fetcher: &QuoteFetcher<S>,
    universe: &[Constituent],
    date: NaiveDate,
) -> Result<DailyRun> {
    let existing = store.load_all().await?;
    store.load_sectors().await?;
    info!("History has {} day(s)", existing.len());

    let symbols = symbols_of(universe);
    info!("Processing {} stocks for {}", symbols.len(), date);
    let outcome = fetcher.fetch_batch(&symbols, date, false).await;

    let (record, details) = aggregate(&outcome.results, date);
    let sectors = aggregate_sectors(&details, universe, date);

    store.upsert(record.clone()).await?;
    store.save_details(date, &details).await?;
    store.upsert_sectors(date, sectors.clone()).await?;

    Ok(DailyRun {
        record,
        details,
        sectors,
        failures: outcome.failures,
        symbols_requested: symbols.len(),
    })
}

pub async fn run_daily_tracking(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    date: NaiveDate,
) -> Result<DailyRun> {
    let store = history_store(storage, config);
    let universe = SymbolSource::new(config.symbols.clone())?.get_symbols().await;
    let fetcher = quote_fetcher(config)?;
    track_day(&store, &fetcher, &universe, date).await
}

/// Recomputes `days` and upserts them in one write per file. Detail files
/// are left alone; they belong to live runs.
pub async fn backfill_days<S: PriceSource>(
    store: &HistoryStore,
    fetcher: &QuoteFetcher<S>,
    universe: &[Constituent],
    days: &[NaiveDate],
    day_delay: Duration,
) -> Result<Vec<DailyAggregateRecord>> {
    store.load_all().await?;
    store.load_sectors().await?;

    let collected = backfill::collect(fetcher, universe, days, day_delay).await;

    let records: Vec<DailyAggregateRecord> = collected.iter().map(|d| d.record.clone()).collect();
    store.upsert_many(records.iter().cloned()).await?;
    store
        .replace_sector_days(collected.into_iter().map(|d| (d.record.date, d.sectors)))
        .await?;
    Ok(records)
}

/// Backfills the last `days_back` trading days ending at `end`.
pub async fn run_backfill(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    end: NaiveDate,
    days_back: u32,
) -> Result<Vec<DailyAggregateRecord>> {
    let store = history_store(storage, config);

    let days = backfill::trading_days(end, days_back);
    let (Some(first), Some(last)) = (days.first(), days.last()) else {
        println!("No trading days in the last {} day(s)", days_back);
        return Ok(Vec::new());
    };
    println!("Found {} trading days to process", days.len());
    println!("Date range: {} to {}", first, last);

    let universe = SymbolSource::new(config.symbols.clone())?.get_symbols().await;
    let fetcher = quote_fetcher(config)?;
    let day_delay = Duration::from_millis(config.backfill.day_delay_ms);

    backfill_days(&store, &fetcher, &universe, &days, day_delay).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::movement::Bucket;
    use crate::quotes::PriceBar;
    use crate::storage_utils::{HistoryConfig, QuoteConfig};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Same bars for every request of a symbol; unknown symbols fail.
    struct FixedSource {
        bars: HashMap<String, Vec<PriceBar>>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedSource {
        /// Every symbol closes at 100 on 03-05 and at `100 + pct` on 03-06.
        fn new(moves: &[(&str, f64)], calls: Arc<AtomicUsize>) -> Self {
            let bars = moves
                .iter()
                .map(|(symbol, pct)| {
                    let bars = vec![
                        PriceBar {
                            date: d(2024, 3, 5),
                            close: Some(100.0),
                        },
                        PriceBar {
                            date: d(2024, 3, 6),
                            close: Some(100.0 + pct),
                        },
                    ];
                    (symbol.to_string(), bars)
                })
                .collect();
            Self { bars, calls }
        }
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        async fn daily_bars(
            &self,
            symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PriceBar>, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bars.get(symbol).cloned().ok_or(QuoteError::NotFound)
        }
    }

    fn counted_fetcher(moves: &[(&str, f64)], calls: Arc<AtomicUsize>) -> QuoteFetcher<FixedSource> {
        let config = QuoteConfig {
            request_delay_ms: 0,
            ..QuoteConfig::default()
        };
        QuoteFetcher::new(FixedSource::new(moves, calls), &config)
    }

    fn fetcher(moves: &[(&str, f64)]) -> QuoteFetcher<FixedSource> {
        counted_fetcher(moves, Arc::new(AtomicUsize::new(0)))
    }

    fn universe() -> Vec<Constituent> {
        vec![
            Constituent::new("AAA.NS", "IT"),
            Constituent::new("BBB.NS", "IT"),
            Constituent::new("CCC.NS", "Banks"),
            Constituent::new("DDD.NS", "Banks"),
        ]
    }

    async fn store() -> (TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        (dir, HistoryStore::new(storage, HistoryConfig::default()))
    }

    #[tokio::test]
    async fn test_track_day_persists_record_details_and_sectors() {
        let (_dir, store) = store().await;
        let fetcher = fetcher(&[("AAA.NS", 16.0), ("BBB.NS", 4.0), ("CCC.NS", -1.0), ("DDD.NS", -12.0)]);
        let date = d(2024, 3, 6);

        let run = track_day(&store, &fetcher, &universe(), date).await.unwrap();
        assert_eq!(run.symbols_requested, 4);
        assert!(run.failures.is_empty());
        assert_eq!(run.record.gainers(), 2);
        assert_eq!(run.record.losers(), 1);

        assert_eq!(store.load_all().await.unwrap(), vec![run.record.clone()]);
        let details = store.load_details(date).await.unwrap().unwrap();
        assert_eq!(details.len(), 4);
        assert_eq!(details[0].bucket, Bucket::Up15Plus);

        let sectors = store.load_sectors().await.unwrap();
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].sector, "Banks");
        assert_eq!((sectors[0].down_3_plus, sectors[0].neutral), (1, 1));
        assert_eq!(sectors[1].sector, "IT");
        assert_eq!(sectors[1].breadth, 100.0);
    }

    #[tokio::test]
    async fn test_failed_rerun_replaces_every_file() {
        let (_dir, store) = store().await;
        let date = d(2024, 3, 6);
        let good = fetcher(&[("AAA.NS", 16.0), ("CCC.NS", -4.0)]);
        track_day(&store, &good, &universe(), date).await.unwrap();

        let broken = fetcher(&[]);
        let run = track_day(&store, &broken, &universe(), date).await.unwrap();
        assert_eq!(run.failures.len(), 4);

        assert_eq!(
            store.load_all().await.unwrap(),
            vec![DailyAggregateRecord::empty(date)]
        );
        assert_eq!(store.load_details(date).await.unwrap(), Some(Vec::new()));
        assert!(store.load_sectors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_history_aborts_before_fetching() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("stock_movements_history.csv"), "date,up_15_plus\nnope,1\n")
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = counted_fetcher(&[("AAA.NS", 5.0)], calls.clone());

        let err = track_day(&store, &fetcher, &universe(), d(2024, 3, 6))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::CorruptHistory { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("stock_details_2024-03-06.csv").exists());
    }

    #[tokio::test]
    async fn test_backfill_days_upserts_history_and_sectors() {
        let (dir, store) = store().await;
        let fetcher = fetcher(&[("AAA.NS", 6.0), ("CCC.NS", -6.0)]);
        let days = vec![d(2024, 3, 5), d(2024, 3, 6)];

        let records = backfill_days(&store, &fetcher, &universe(), &days, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        // Only 03-06 has a session with a prior close.
        assert_eq!(records[0].total(), 0);
        assert_eq!((records[1].up_5_10, records[1].down_5_10), (1, 1));

        assert_eq!(store.load_all().await.unwrap(), records);
        let sectors = store.load_sectors().await.unwrap();
        assert_eq!(sectors.len(), 2);
        assert!(sectors.iter().all(|r| r.date == d(2024, 3, 6)));
        assert!(!dir.path().join("stock_details_2024-03-06.csv").exists());
    }
}
