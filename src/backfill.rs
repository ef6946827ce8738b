use crate::aggregate::{DailyAggregateRecord, aggregate};
use crate::metrics::breadth;
use crate::quotes::{PriceSource, QuoteFetcher};
use crate::sectors::{SectorRecord, aggregate_sectors};
use crate::symbols::{Constituent, symbols_of};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::time::Duration;
use tracing::info;

/// Weekdays in the `days_back` calendar days before `end` plus `end`
/// itself, oldest first. Exchange holidays are not known here.
pub fn trading_days(end: NaiveDate, days_back: u32) -> Vec<NaiveDate> {
    (0..=days_back as u64)
        .rev()
        .filter_map(|i| end.checked_sub_days(Days::new(i)))
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

pub struct BackfilledDay {
    pub record: DailyAggregateRecord,
    pub sectors: Vec<SectorRecord>,
}

/// Rebuilds one aggregate per trading day. Only symbols with a close on
/// the day itself are counted, so a holiday comes out as an all-zero row.
pub async fn collect<S: PriceSource>(
    fetcher: &QuoteFetcher<S>,
    universe: &[Constituent],
    days: &[NaiveDate],
    day_delay: Duration,
) -> Vec<BackfilledDay> {
    let symbols = symbols_of(universe);
    let mut collected = Vec::with_capacity(days.len());

    for (idx, date) in days.iter().enumerate() {
        if idx > 0 && !day_delay.is_zero() {
            tokio::time::sleep(day_delay).await;
        }
        println!(
            "\n[{}/{}] Processing {}...",
            idx + 1,
            days.len(),
            date.format("%Y-%m-%d (%A)")
        );

        let outcome = fetcher.fetch_batch(&symbols, *date, true).await;
        let (record, details) = aggregate(&outcome.results, *date);
        let sectors = aggregate_sectors(&details, universe, *date);

        info!(
            "{}: gainers {} | losers {} | breadth {:.1}%",
            date,
            record.gainers(),
            record.losers(),
            breadth(&record)
        );
        collected.push(BackfilledDay { record, sectors });
    }

    collected
}
