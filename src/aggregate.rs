use crate::movement::{Bucket, classify};
use crate::quotes::QuoteResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One row of the history log. Field order is the CSV column order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DailyAggregateRecord {
    pub date: NaiveDate,
    pub up_15_plus: u32,
    pub up_10_15: u32,
    pub up_5_10: u32,
    pub up_3_5: u32,
    pub down_3_5: u32,
    pub down_5_10: u32,
    pub down_10_15: u32,
    pub down_15_plus: u32,
    pub neutral: u32,
}

impl DailyAggregateRecord {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            up_15_plus: 0,
            up_10_15: 0,
            up_5_10: 0,
            up_3_5: 0,
            down_3_5: 0,
            down_5_10: 0,
            down_10_15: 0,
            down_15_plus: 0,
            neutral: 0,
        }
    }

    pub fn count(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::Up15Plus => self.up_15_plus,
            Bucket::Up10To15 => self.up_10_15,
            Bucket::Up5To10 => self.up_5_10,
            Bucket::Up3To5 => self.up_3_5,
            Bucket::Neutral => self.neutral,
            Bucket::Down3To5 => self.down_3_5,
            Bucket::Down5To10 => self.down_5_10,
            Bucket::Down10To15 => self.down_10_15,
            Bucket::Down15Plus => self.down_15_plus,
        }
    }

    fn count_mut(&mut self, bucket: Bucket) -> &mut u32 {
        match bucket {
            Bucket::Up15Plus => &mut self.up_15_plus,
            Bucket::Up10To15 => &mut self.up_10_15,
            Bucket::Up5To10 => &mut self.up_5_10,
            Bucket::Up3To5 => &mut self.up_3_5,
            Bucket::Neutral => &mut self.neutral,
            Bucket::Down3To5 => &mut self.down_3_5,
            Bucket::Down5To10 => &mut self.down_5_10,
            Bucket::Down10To15 => &mut self.down_10_15,
            Bucket::Down15Plus => &mut self.down_15_plus,
        }
    }

    /// Stocks up 3% or more.
    pub fn gainers(&self) -> u32 {
        self.up_3_5 + self.up_5_10 + self.up_10_15 + self.up_15_plus
    }

    /// Stocks down 3% or more.
    pub fn losers(&self) -> u32 {
        self.down_3_5 + self.down_5_10 + self.down_10_15 + self.down_15_plus
    }

    pub fn total_movers(&self) -> u32 {
        self.gainers() + self.losers()
    }

    pub fn total(&self) -> u32 {
        self.total_movers() + self.neutral
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DailyDetailRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub pct_change: f64,
    pub bucket: Bucket,
}

/// Classifies every quote and tallies the buckets for `date`.
///
/// An empty batch is still a record: all counts zero. Details come back
/// ordered by `pct_change`, biggest gainer first.
pub fn aggregate(
    results: &[QuoteResult],
    date: NaiveDate,
) -> (DailyAggregateRecord, Vec<DailyDetailRecord>) {
    let mut record = DailyAggregateRecord::empty(date);
    let mut details = Vec::with_capacity(results.len());

    for quote in results {
        let bucket = classify(quote.pct_change);
        *record.count_mut(bucket) += 1;
        details.push(DailyDetailRecord {
            date,
            symbol: quote.symbol.clone(),
            pct_change: quote.pct_change,
            bucket,
        });
    }

    if results.is_empty() {
        warn!("No valid quotes for {} - recording an all-zero day", date);
    }

    details.sort_by(|a, b| b.pct_change.total_cmp(&a.pct_change));

    (record, details)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str, pct_change: f64) -> QuoteResult {
        QuoteResult {
            symbol: symbol.to_string(),
            session: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            previous_close: 100.0,
            last_close: 100.0 + pct_change,
            pct_change,
        }
    }

    #[test]
    fn test_simple_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let quotes = vec![
            quote("AAA", 16.0),
            quote("BBB", 4.0),
            quote("CCC", -1.0),
            quote("DDD", -12.0),
        ];

        let (record, details) = aggregate(&quotes, date);

        assert_eq!(record.up_15_plus, 1);
        assert_eq!(record.up_3_5, 1);
        assert_eq!(record.neutral, 1);
        assert_eq!(record.down_10_15, 1);
        assert_eq!(record.up_10_15 + record.up_5_10, 0);
        assert_eq!(record.down_3_5 + record.down_5_10 + record.down_15_plus, 0);
        assert_eq!(record.gainers(), 2);
        assert_eq!(record.losers(), 1);

        assert_eq!(details.len(), 4);
        assert_eq!(details[0].symbol, "AAA");
        assert_eq!(details[0].bucket, Bucket::Up15Plus);
        assert_eq!(details[3].symbol, "DDD");
        assert_eq!(details[3].bucket, Bucket::Down10To15);
    }

    #[test]
    fn test_empty_batch_is_all_zero() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let (record, details) = aggregate(&[], date);
        assert_eq!(record, DailyAggregateRecord::empty(date));
        assert_eq!(record.total(), 0);
        assert!(details.is_empty());
    }

    #[test]
    fn test_total_matches_input_count() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let quotes: Vec<QuoteResult> = (-40..=40)
            .map(|i| quote(&format!("S{i}"), i as f64 * 0.5))
            .collect();

        let (record, details) = aggregate(&quotes, date);
        assert_eq!(record.total() as usize, quotes.len());
        assert_eq!(details.len(), quotes.len());
        let per_bucket: u32 = Bucket::ALL.iter().map(|b| record.count(*b)).sum();
        assert_eq!(per_bucket, record.total());
    }
}
