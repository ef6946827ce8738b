//! Per-sector participation for one day. A sector's breadth is its share
//! of gainers among all of its classified stocks, neutral ones included.

use crate::aggregate::DailyDetailRecord;
use crate::symbols::{Constituent, OTHER_SECTOR};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One row of the sector history. Field order is the CSV column order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectorRecord {
    pub date: NaiveDate,
    pub sector: String,
    pub up_3_plus: u32,
    pub down_3_plus: u32,
    pub neutral: u32,
    pub total: u32,
    /// Percent of `total` that gained 3% or more, one decimal.
    pub breadth: f64,
}

#[derive(Default)]
struct Tally {
    up: u32,
    down: u32,
    neutral: u32,
}

/// Groups the day's classified stocks by sector. Symbols missing from
/// `universe` count under `OTHER_SECTOR`. Sectors with no classified stock
/// produce no row; rows come back ordered by sector name.
pub fn aggregate_sectors(
    details: &[DailyDetailRecord],
    universe: &[Constituent],
    date: NaiveDate,
) -> Vec<SectorRecord> {
    let sector_of: HashMap<&str, &str> = universe
        .iter()
        .map(|c| (c.symbol.as_str(), c.sector.as_str()))
        .collect();

    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for detail in details {
        let sector = sector_of
            .get(detail.symbol.as_str())
            .copied()
            .unwrap_or(OTHER_SECTOR);
        let tally = tallies.entry(sector).or_default();
        if detail.bucket.is_gainer() {
            tally.up += 1;
        } else if detail.bucket.is_loser() {
            tally.down += 1;
        } else {
            tally.neutral += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(sector, t)| {
            let total = t.up + t.down + t.neutral;
            SectorRecord {
                date,
                sector: sector.to_string(),
                up_3_plus: t.up,
                down_3_plus: t.down,
                neutral: t.neutral,
                total,
                breadth: (t.up as f64 / total as f64 * 1000.0).round() / 10.0,
            }
        })
        .collect()
}

/// Rows of the most recent date in `rows`.
pub fn latest_day(rows: &[SectorRecord]) -> Vec<SectorRecord> {
    let Some(latest) = rows.iter().map(|r| r.date).max() else {
        return Vec::new();
    };
    rows.iter().filter(|r| r.date == latest).cloned().collect()
}

/// Sectors with at least `min_stocks` members, strongest breadth first.
/// Ties keep alphabetical order.
pub fn rank_sectors(rows: &[SectorRecord], min_stocks: u32) -> Vec<&SectorRecord> {
    let mut ranked: Vec<&SectorRecord> = rows.iter().filter(|r| r.total >= min_stocks).collect();
    ranked.sort_by(|a, b| {
        b.breadth
            .total_cmp(&a.breadth)
            .then_with(|| a.sector.cmp(&b.sector))
    });
    ranked
}
