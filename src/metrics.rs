//! Derived market metrics. Every function here is a pure function of the
//! history log (oldest record first).

use crate::aggregate::DailyAggregateRecord;
use crate::error::{Result, TrackerError};
use chrono::{Datelike, Weekday};
use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// Breadth reported for a day with no movers at all.
pub const NEUTRAL_BREADTH: f64 = 50.0;

/// Share of 3%+ movers that were gainers, in percent.
pub fn breadth(record: &DailyAggregateRecord) -> f64 {
    let movers = record.total_movers();
    if movers == 0 {
        return NEUTRAL_BREADTH;
    }
    record.gainers() as f64 / movers as f64 * 100.0
}

pub fn breadth_series(records: &[DailyAggregateRecord]) -> Vec<f64> {
    records.iter().map(breadth).collect()
}

/// Cumulative sum of (gainers - losers), starting from zero before the
/// first day.
pub fn advance_decline_line(records: &[DailyAggregateRecord]) -> Vec<i64> {
    records
        .iter()
        .scan(0i64, |acc, r| {
            *acc += r.gainers() as i64 - r.losers() as i64;
            Some(*acc)
        })
        .collect()
}

/// Total 3%+ movers per day.
pub fn volatility_series(records: &[DailyAggregateRecord]) -> Vec<f64> {
    records.iter().map(|r| r.total_movers() as f64).collect()
}

/// Trailing mean over at most `window` points. Early days average whatever
/// is available (a partial window), so the output has one value per input.
pub fn moving_average(values: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut sma = SimpleMovingAverage::new(window).map_err(|_| TrackerError::InvalidWindow(window))?;
    Ok(values.iter().map(|v| sma.next(*v)).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Mixed,
}

impl Sentiment {
    pub fn from_breadth(breadth: f64) -> Self {
        if breadth > 60.0 {
            Sentiment::Bullish
        } else if breadth < 40.0 {
            Sentiment::Bearish
        } else {
            Sentiment::Mixed
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Sentiment::Bullish => "Strong bullish sentiment",
            Sentiment::Bearish => "Strong bearish sentiment",
            Sentiment::Mixed => "Mixed/Neutral sentiment",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekdayAverage {
    pub weekday: Weekday,
    pub days: usize,
    /// `None` when no history falls on this weekday.
    pub avg_gainers: Option<f64>,
    pub avg_losers: Option<f64>,
}

pub const TRADING_WEEKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Mean gainers and losers per weekday, Monday to Friday. Weekend rows are
/// ignored.
pub fn weekly_pattern(records: &[DailyAggregateRecord]) -> Vec<WeekdayAverage> {
    TRADING_WEEKDAYS
        .iter()
        .map(|&weekday| {
            let days: Vec<&DailyAggregateRecord> =
                records.iter().filter(|r| r.date.weekday() == weekday).collect();
            let n = days.len();
            let mean = |f: fn(&DailyAggregateRecord) -> u32| {
                (n > 0).then(|| days.iter().map(|r| f(r) as f64).sum::<f64>() / n as f64)
            };
            WeekdayAverage {
                weekday,
                days: n,
                avg_gainers: mean(DailyAggregateRecord::gainers),
                avg_losers: mean(DailyAggregateRecord::losers),
            }
        })
        .collect()
}

// --- Insights ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub avg_gainers: f64,
    pub avg_losers: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityLevel {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolatilitySummary {
    pub average_movers: f64,
    pub latest_movers: u32,
    pub level: VolatilityLevel,
    /// Distance from the average in percent (positive above, negative below).
    pub deviation_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insights {
    pub latest: DailyAggregateRecord,
    pub trend: Option<TrendSummary>,
    pub volatility: Option<VolatilitySummary>,
}

const TREND_DAYS: usize = 5;

/// Headline numbers for the latest day plus the 5-day trend (needs five
/// days) and the volatility comparison (needs two). `None` on empty history.
pub fn insights(records: &[DailyAggregateRecord]) -> Option<Insights> {
    let latest = records.last()?.clone();

    let trend = (records.len() >= TREND_DAYS).then(|| {
        let recent = &records[records.len() - TREND_DAYS..];
        let avg_gainers = mean(recent.iter().map(|r| r.gainers() as f64));
        let avg_losers = mean(recent.iter().map(|r| r.losers() as f64));
        let trend = if avg_gainers > avg_losers * 1.2 {
            Trend::Bullish
        } else if avg_losers > avg_gainers * 1.2 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };
        TrendSummary {
            avg_gainers,
            avg_losers,
            trend,
        }
    });

    let volatility = if records.len() >= 2 {
        let average_movers = mean(records.iter().map(|r| r.total_movers() as f64));
        let latest_movers = latest.total_movers();
        let latest_f = latest_movers as f64;
        let (level, deviation_pct) = if average_movers > 0.0 {
            let deviation = (latest_f / average_movers - 1.0) * 100.0;
            if latest_f > average_movers * 1.3 {
                (VolatilityLevel::High, deviation)
            } else if latest_f < average_movers * 0.7 {
                (VolatilityLevel::Low, deviation)
            } else {
                (VolatilityLevel::Normal, deviation)
            }
        } else {
            (VolatilityLevel::Normal, 0.0)
        };
        Some(VolatilitySummary {
            average_movers,
            latest_movers,
            level,
            deviation_pct,
        })
    } else {
        None
    };

    Some(Insights {
        latest,
        trend,
        volatility,
    })
}

// --- Market score ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Bull,
    Bear,
    Choppy,
    Neutral,
}

impl Regime {
    pub fn describe(self) -> &'static str {
        match self {
            Regime::Bull => "Strong uptrend, favorable conditions",
            Regime::Bear => "Downtrend, defensive positioning advised",
            Regime::Choppy => "Choppy market, trade carefully",
            Regime::Neutral => "Range-bound, wait for direction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketScore {
    pub overall: f64,
    pub breadth: f64,
    pub momentum: f64,
    pub stability: f64,
    pub regime: Regime,
}

/// Weighted 0-100 health score: half latest breadth, 30% five-day breadth
/// momentum, 20% stability of the last ten breadths. Needs five days.
pub fn market_score(records: &[DailyAggregateRecord]) -> Option<MarketScore> {
    if records.len() < 5 {
        return None;
    }
    let breadths = breadth_series(records);
    let latest = *breadths.last()?;

    let recent = &breadths[breadths.len() - 5..];
    let momentum = (50.0 + (recent[4] - recent[0]) / 50.0 * 100.0).clamp(0.0, 100.0);

    let stability = if breadths.len() >= 10 {
        (100.0 - std_dev(&breadths[breadths.len() - 10..]) * 2.0).max(0.0)
    } else {
        50.0
    };

    let regime = if latest > 60.0 && momentum > 55.0 {
        Regime::Bull
    } else if latest < 40.0 && momentum < 45.0 {
        Regime::Bear
    } else if stability < 40.0 {
        Regime::Choppy
    } else {
        Regime::Neutral
    };

    Some(MarketScore {
        overall: latest * 0.5 + momentum * 0.3 + stability * 0.2,
        breadth: latest,
        momentum,
        stability,
        regime,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// Breadth under 48% three days running.
    Bearish,
    /// Breadth stuck between 48% and 52% three days running.
    Narrow,
}

impl Divergence {
    pub fn describe(self) -> &'static str {
        match self {
            Divergence::Bearish => {
                "Persistent narrow breadth for 3+ days. Weakness likely to continue."
            }
            Divergence::Narrow => "Market lacking conviction. Few stocks participating.",
        }
    }
}

pub fn detect_divergence(records: &[DailyAggregateRecord]) -> Option<Divergence> {
    if records.len() < 3 {
        return None;
    }
    let last3 = breadth_series(&records[records.len() - 3..]);
    if last3.iter().all(|b| *b < 48.0) {
        Some(Divergence::Bearish)
    } else if last3.iter().all(|b| *b > 48.0 && *b < 52.0) {
        Some(Divergence::Narrow)
    } else {
        None
    }
}

// --- Forecast and statistical context ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreadthForecast {
    /// Expected breadth for the next session, clamped to 20..=80.
    pub prediction: f64,
    pub range_low: f64,
    pub range_high: f64,
    /// 50..=100, lower when recent breadth has been erratic.
    pub confidence: f64,
    pub direction: Direction,
}

const FORECAST_DAYS: usize = 10;

/// Next-session breadth from the last ten days: 40% latest breadth, 30%
/// five-day mean, 20% pull towards 50, plus five times the average daily
/// change over the last five days. Needs ten days.
pub fn predict_next_breadth(records: &[DailyAggregateRecord]) -> Option<BreadthForecast> {
    if records.len() < FORECAST_DAYS {
        return None;
    }
    let recent = breadth_series(&records[records.len() - FORECAST_DAYS..]);
    let last5 = &recent[FORECAST_DAYS - 5..];

    let current = last5[4];
    let momentum = mean(last5.iter().copied());
    let trend = (last5[4] - last5[0]) / 4.0;
    let volatility = std_dev(&recent);

    let prediction = (current * 0.4 + momentum * 0.3 + NEUTRAL_BREADTH * 0.2 + trend * 5.0)
        .clamp(20.0, 80.0);
    let direction = if trend > 0.0 {
        Direction::Rising
    } else if trend < 0.0 {
        Direction::Falling
    } else {
        Direction::Flat
    };

    Some(BreadthForecast {
        prediction,
        range_low: prediction - volatility * 1.5,
        range_high: prediction + volatility * 1.5,
        confidence: (100.0 - volatility * 3.0).max(50.0),
        direction,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreadthReading {
    ExtremelyBullish,
    Bullish,
    Normal,
    Bearish,
    ExtremelyBearish,
}

impl BreadthReading {
    fn from_z_score(z: f64) -> Self {
        if z > 2.0 {
            BreadthReading::ExtremelyBullish
        } else if z > 1.0 {
            BreadthReading::Bullish
        } else if z < -2.0 {
            BreadthReading::ExtremelyBearish
        } else if z < -1.0 {
            BreadthReading::Bearish
        } else {
            BreadthReading::Normal
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            BreadthReading::ExtremelyBullish => "Extremely bullish (top 5%)",
            BreadthReading::Bullish => "Bullish (top 16%)",
            BreadthReading::Normal => "Normal range",
            BreadthReading::Bearish => "Bearish (bottom 16%)",
            BreadthReading::ExtremelyBearish => "Extremely bearish (bottom 5%)",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreadthContext {
    pub current: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Rank percentile of the current breadth within the whole history;
    /// ties count half.
    pub percentile: f64,
    /// 0 when the history has no spread.
    pub z_score: f64,
    pub reading: BreadthReading,
}

const CONTEXT_MIN_DAYS: usize = 30;

/// Where the latest breadth sits against the full history. Needs 30 days.
pub fn statistical_context(records: &[DailyAggregateRecord]) -> Option<BreadthContext> {
    if records.len() < CONTEXT_MIN_DAYS {
        return None;
    }
    let all = breadth_series(records);
    let current = *all.last()?;
    let m = mean(all.iter().copied());
    let sd = std_dev(&all);
    let z_score = if sd > 0.0 { (current - m) / sd } else { 0.0 };

    let below = all.iter().filter(|b| **b < current).count();
    let at_or_below = all.iter().filter(|b| **b <= current).count();
    let tie_bonus = usize::from(below < at_or_below);
    let percentile = (below + at_or_below + tie_bonus) as f64 * 50.0 / all.len() as f64;

    Some(BreadthContext {
        current,
        mean: m,
        std_dev: sd,
        percentile,
        z_score,
        reading: BreadthReading::from_z_score(z_score),
    })
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values.iter().copied());
    mean(values.iter().map(|v| (v - m).powi(2))).sqrt()
}
