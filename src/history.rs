use crate::aggregate::{DailyAggregateRecord, DailyDetailRecord};
use crate::error::{Result, TrackerError};
use crate::movement::Bucket;
use crate::sectors::SectorRecord;
use crate::storage_utils::{AsyncStorageManager, HistoryConfig};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Row of a per-day detail file. The date lives in the file name.
#[derive(Serialize, Deserialize, Debug)]
struct DetailRow {
    symbol: String,
    pct_change: f64,
    bucket: Bucket,
}

/// Date-keyed history log backed by a CSV file in the storage directory.
///
/// At most one record per date; `load_all` always returns ascending dates.
/// Runs are expected to be serialized by the caller, nothing here locks.
pub struct HistoryStore {
    storage: AsyncStorageManager,
    config: HistoryConfig,
}

impl HistoryStore {
    pub fn new(storage: AsyncStorageManager, config: HistoryConfig) -> Self {
        Self { storage, config }
    }

    fn corrupt(&self, file: &str, reason: impl ToString) -> TrackerError {
        TrackerError::CorruptHistory {
            path: self.storage.path(file),
            reason: reason.to_string(),
        }
    }

    async fn write_rows<T: Serialize>(&self, file: &str, rows: impl Iterator<Item = T>) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        self.storage.write_atomic(file, &bytes).await?;
        Ok(())
    }

    async fn load_map(&self) -> Result<BTreeMap<NaiveDate, DailyAggregateRecord>> {
        let Some(bytes) = self.storage.read_optional(&self.config.file).await? else {
            debug!("{} not found, starting with empty history", self.config.file);
            return Ok(BTreeMap::new());
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());

        let mut records = BTreeMap::new();
        for row in reader.deserialize::<DailyAggregateRecord>() {
            let record = row.map_err(|e| self.corrupt(&self.config.file, e))?;
            let date = record.date;
            if records.insert(date, record).is_some() {
                return Err(self.corrupt(&self.config.file, format!("duplicate row for {}", date)));
            }
        }
        Ok(records)
    }

    /// All records, oldest first. A missing file is an empty history; a
    /// malformed one is `CorruptHistory`.
    pub async fn load_all(&self) -> Result<Vec<DailyAggregateRecord>> {
        Ok(self.load_map().await?.into_values().collect())
    }

    /// Inserts `record` or replaces the existing row for its date.
    pub async fn upsert(&self, record: DailyAggregateRecord) -> Result<()> {
        self.upsert_many(std::iter::once(record)).await
    }

    /// One read and one write for a whole batch. The existing file is only
    /// replaced after it has been read back successfully.
    pub async fn upsert_many<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = DailyAggregateRecord>,
    {
        let mut existing = self.load_map().await?;
        let mut written = 0;
        for record in records {
            if existing.insert(record.date, record).is_some() {
                debug!("Replacing existing history row");
            }
            written += 1;
        }
        self.write_rows(&self.config.file, existing.values()).await?;
        info!(
            "Saved {} row(s) to {} ({} days total)",
            written,
            self.config.file,
            existing.len()
        );
        Ok(())
    }

    pub fn details_file_name(&self, date: NaiveDate) -> String {
        format!("{}_{}.csv", self.config.details_prefix, date.format("%Y-%m-%d"))
    }

    /// Writes the per-symbol detail file for `date`, replacing any earlier
    /// run for the same date. Percentages are rounded to two decimals.
    /// An empty `details` still writes the file (header only) so a rerun
    /// never leaves an earlier run's rows behind.
    pub async fn save_details(&self, date: NaiveDate, details: &[DailyDetailRecord]) -> Result<()> {
        let file_name = self.details_file_name(date);
        let rows = details.iter().map(|detail| DetailRow {
            symbol: detail.symbol.clone(),
            pct_change: (detail.pct_change * 100.0).round() / 100.0,
            bucket: detail.bucket,
        });
        if details.is_empty() {
            // csv only emits the header with the first serialized row.
            self.storage
                .write_atomic(&file_name, b"symbol,pct_change,bucket\n")
                .await?;
        } else {
            self.write_rows(&file_name, rows).await?;
        }
        info!("Detailed stock data saved to {}", file_name);
        Ok(())
    }

    pub async fn load_details(&self, date: NaiveDate) -> Result<Option<Vec<DailyDetailRecord>>> {
        let Some(bytes) = self.storage.read_optional(&self.details_file_name(date)).await? else {
            return Ok(None);
        };

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let mut details = Vec::new();
        for row in reader.deserialize::<DetailRow>() {
            let row = row?;
            details.push(DailyDetailRecord {
                date,
                symbol: row.symbol,
                pct_change: row.pct_change,
                bucket: row.bucket,
            });
        }
        Ok(Some(details))
    }

    /// Sector rows ordered by date, then sector. Same corruption rules as
    /// the main log: unreadable rows or a repeated (date, sector) pair.
    pub async fn load_sectors(&self) -> Result<Vec<SectorRecord>> {
        let file = &self.config.sector_file;
        let Some(bytes) = self.storage.read_optional(file).await? else {
            return Ok(Vec::new());
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());
        let mut rows = BTreeMap::new();
        for row in reader.deserialize::<SectorRecord>() {
            let row = row.map_err(|e| self.corrupt(file, e))?;
            let key = (row.date, row.sector.clone());
            if rows.insert(key, row).is_some() {
                return Err(self.corrupt(file, "duplicate sector row"));
            }
        }
        Ok(rows.into_values().collect())
    }

    /// Replaces every sector row of each given date with the new set. A
    /// date given with no rows just loses its old ones.
    pub async fn replace_sector_days<I>(&self, days: I) -> Result<()>
    where
        I: IntoIterator<Item = (NaiveDate, Vec<SectorRecord>)>,
    {
        let mut rows = self.load_sectors().await?;
        for (date, new_rows) in days {
            rows.retain(|r| r.date != date);
            rows.extend(new_rows.into_iter().map(|r| SectorRecord { date, ..r }));
        }
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.sector.cmp(&b.sector)));

        self.write_rows(&self.config.sector_file, rows.iter()).await?;
        info!("Sector data saved to {}", self.config.sector_file);
        Ok(())
    }

    pub async fn upsert_sectors(&self, date: NaiveDate, rows: Vec<SectorRecord>) -> Result<()> {
        self.replace_sector_days(std::iter::once((date, rows))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn record(date: NaiveDate, up: u32, down: u32) -> DailyAggregateRecord {
        DailyAggregateRecord {
            up_3_5: up,
            down_3_5: down,
            neutral: 7,
            ..DailyAggregateRecord::empty(date)
        }
    }

    async fn store() -> (TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        (dir, HistoryStore::new(storage, HistoryConfig::default()))
    }

    #[tokio::test]
    async fn test_absent_file_loads_empty() {
        let (_dir, store) = store().await;
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_dir, store) = store().await;
        let original = DailyAggregateRecord {
            date: d(2024, 3, 6),
            up_15_plus: 1,
            up_10_15: 2,
            up_5_10: 3,
            up_3_5: 4,
            down_3_5: 5,
            down_5_10: 6,
            down_10_15: 7,
            down_15_plus: 8,
            neutral: 9,
        };
        store.upsert(original.clone()).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_date() {
        let (_dir, store) = store().await;
        store.upsert(record(d(2024, 3, 6), 3, 1)).await.unwrap();
        store.upsert(record(d(2024, 3, 6), 3, 1)).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all, vec![record(d(2024, 3, 6), 3, 1)]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_date() {
        let (_dir, store) = store().await;
        store.upsert(record(d(2024, 3, 5), 1, 1)).await.unwrap();
        store.upsert(record(d(2024, 3, 6), 3, 1)).await.unwrap();
        store.upsert(record(d(2024, 3, 5), 9, 0)).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record(d(2024, 3, 5), 9, 0));
        assert_eq!(all[1], record(d(2024, 3, 6), 3, 1));
    }

    #[tokio::test]
    async fn test_load_sorted_regardless_of_insertion_order() {
        let (_dir, store) = store().await;
        for day in [8, 4, 6, 5, 7] {
            store.upsert(record(d(2024, 3, day), day, 0)).await.unwrap();
        }
        let dates: Vec<u32> = store
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.up_3_5)
            .collect();
        assert_eq!(dates, vec![4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_unsorted_file_on_disk_loads_sorted() {
        let (dir, store) = store().await;
        std::fs::write(
            dir.path().join("stock_movements_history.csv"),
            "date,up_15_plus,up_10_15,up_5_10,up_3_5,down_3_5,down_5_10,down_10_15,down_15_plus,neutral\n\
             2024-03-07,0,0,0,2,0,0,0,0,1\n\
             2024-03-05,0,0,0,1,0,0,0,0,1\n",
        )
        .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all[0].date, d(2024, 3, 5));
        assert_eq!(all[1].date, d(2024, 3, 7));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported_and_left_untouched() {
        let (dir, store) = store().await;
        let path = dir.path().join("stock_movements_history.csv");
        let corrupt = "date,up_15_plus,up_10_15,up_5_10,up_3_5,down_3_5,down_5_10,down_10_15,down_15_plus,neutral\n\
                       2024-03-05,0,0,0,1,0,0,0,0,1\n\
                       not-a-date,x,0,0,1,0,0,0,0,1\n";
        std::fs::write(&path, corrupt).unwrap();

        assert!(matches!(
            store.load_all().await,
            Err(TrackerError::CorruptHistory { .. })
        ));
        assert!(matches!(
            store.upsert(record(d(2024, 3, 6), 1, 1)).await,
            Err(TrackerError::CorruptHistory { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupt);
    }

    #[tokio::test]
    async fn test_duplicate_date_on_disk_is_corrupt() {
        let (dir, store) = store().await;
        let path = dir.path().join("stock_movements_history.csv");
        let duplicated = "date,up_15_plus,up_10_15,up_5_10,up_3_5,down_3_5,down_5_10,down_10_15,down_15_plus,neutral\n\
                          2024-03-05,0,0,0,1,0,0,0,0,1\n\
                          2024-03-05,0,0,0,4,0,0,0,0,2\n";
        std::fs::write(&path, duplicated).unwrap();

        match store.load_all().await {
            Err(TrackerError::CorruptHistory { reason, .. }) => {
                assert!(reason.contains("2024-03-05"), "reason was {reason}")
            }
            other => panic!("expected CorruptHistory, got {other:?}"),
        }
        assert!(store.upsert(record(d(2024, 3, 6), 1, 1)).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), duplicated);
    }

    #[tokio::test]
    async fn test_missing_column_is_corrupt() {
        let (dir, store) = store().await;
        std::fs::write(
            dir.path().join("stock_movements_history.csv"),
            "date,up_15_plus\n2024-03-05,1\n",
        )
        .unwrap();
        assert!(matches!(
            store.load_all().await,
            Err(TrackerError::CorruptHistory { .. })
        ));
    }

    #[tokio::test]
    async fn test_written_header_matches_column_order() {
        let (dir, store) = store().await;
        store.upsert(record(d(2024, 3, 6), 1, 0)).await.unwrap();
        let content =
            std::fs::read_to_string(dir.path().join("stock_movements_history.csv")).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "date,up_15_plus,up_10_15,up_5_10,up_3_5,down_3_5,down_5_10,down_10_15,down_15_plus,neutral"
        );
        assert_eq!(content.lines().nth(1).unwrap(), "2024-03-06,0,0,0,1,0,0,0,0,7");
    }

    #[tokio::test]
    async fn test_details_file_round_trip() {
        let (dir, store) = store().await;
        let date = d(2024, 3, 6);
        let details = vec![
            DailyDetailRecord {
                date,
                symbol: "AAA.NS".to_string(),
                pct_change: 16.1234,
                bucket: Bucket::Up15Plus,
            },
            DailyDetailRecord {
                date,
                symbol: "DDD.NS".to_string(),
                pct_change: -12.0,
                bucket: Bucket::Down10To15,
            },
        ];
        store.save_details(date, &details).await.unwrap();
        assert!(dir.path().join("stock_details_2024-03-06.csv").exists());

        let loaded = store.load_details(date).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].pct_change, 16.12);
        assert_eq!(loaded[1].bucket, Bucket::Down10To15);
        assert!(store.load_details(d(2024, 3, 7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_details_replace_earlier_run() {
        let (dir, store) = store().await;
        let date = d(2024, 3, 6);
        let details = vec![DailyDetailRecord {
            date,
            symbol: "AAA.NS".to_string(),
            pct_change: 4.0,
            bucket: Bucket::Up3To5,
        }];
        store.save_details(date, &details).await.unwrap();
        store.save_details(date, &[]).await.unwrap();

        assert_eq!(store.load_details(date).await.unwrap(), Some(Vec::new()));
        let content = std::fs::read_to_string(dir.path().join("stock_details_2024-03-06.csv")).unwrap();
        assert_eq!(content, "symbol,pct_change,bucket\n");
    }

    fn sector(date: NaiveDate, name: &str, up: u32, total: u32) -> SectorRecord {
        SectorRecord {
            date,
            sector: name.to_string(),
            up_3_plus: up,
            down_3_plus: 0,
            neutral: total - up,
            total,
            breadth: up as f64 / total as f64 * 100.0,
        }
    }

    #[tokio::test]
    async fn test_sector_days_are_replaced_not_merged() {
        let (dir, store) = store().await;
        assert!(store.load_sectors().await.unwrap().is_empty());

        let (mon, tue) = (d(2024, 3, 4), d(2024, 3, 5));
        store
            .upsert_sectors(tue, vec![sector(tue, "IT", 1, 4), sector(tue, "Banks", 2, 4)])
            .await
            .unwrap();
        store.upsert_sectors(mon, vec![sector(mon, "IT", 3, 4)]).await.unwrap();
        store.upsert_sectors(tue, vec![sector(tue, "IT", 4, 4)]).await.unwrap();

        let rows = store.load_sectors().await.unwrap();
        let keys: Vec<(NaiveDate, &str, u32)> = rows
            .iter()
            .map(|r| (r.date, r.sector.as_str(), r.up_3_plus))
            .collect();
        assert_eq!(keys, vec![(mon, "IT", 3), (tue, "IT", 4)]);

        let content =
            std::fs::read_to_string(dir.path().join("sector_movements_history.csv")).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "date,sector,up_3_plus,down_3_plus,neutral,total,breadth"
        );

        store.upsert_sectors(tue, Vec::new()).await.unwrap();
        assert_eq!(store.load_sectors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_sector_file_is_reported() {
        let (dir, store) = store().await;
        let path = dir.path().join("sector_movements_history.csv");
        let corrupt = "date,sector,up_3_plus,down_3_plus,neutral,total,breadth\n\
                       2024-03-05,IT,x,0,0,1,0.0\n";
        std::fs::write(&path, corrupt).unwrap();

        assert!(matches!(
            store.load_sectors().await,
            Err(TrackerError::CorruptHistory { .. })
        ));
        assert!(store.upsert_sectors(d(2024, 3, 6), Vec::new()).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), corrupt);
    }
}
