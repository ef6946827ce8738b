use crate::aggregate::{DailyAggregateRecord, DailyDetailRecord};
use crate::error::Result;
use crate::metrics::{
    self, BreadthContext, BreadthForecast, Direction, Divergence, MarketScore, Sentiment, Trend,
    VolatilityLevel, advance_decline_line, breadth, moving_average, volatility_series,
    weekly_pattern,
};
use crate::movement::Bucket;
use crate::sectors::{SectorRecord, rank_sectors};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

/// The weekly table is only meaningful with at least a week of rows.
pub const WEEKLY_MIN_DAYS: usize = 7;

fn base_table(headers: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers);
    table
}

fn header(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

fn bucket_color(bucket: Bucket) -> Color {
    if bucket.is_gainer() {
        Color::Green
    } else if bucket.is_loser() {
        Color::Red
    } else {
        Color::DarkGrey
    }
}

fn signed_color(value: f64) -> Color {
    if value > 0.0 {
        Color::Green
    } else if value < 0.0 {
        Color::Red
    } else {
        Color::Reset
    }
}

/// Bucket counts for one day, strongest gain first.
pub fn daily_summary_table(record: &DailyAggregateRecord) -> Table {
    let mut table = base_table(vec![
        header("Movement"),
        header("Stocks").set_alignment(CellAlignment::Right),
    ]);

    for bucket in Bucket::ALL {
        table.add_row(vec![
            Cell::new(bucket.label()).fg(bucket_color(bucket)),
            Cell::new(record.count(bucket)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn print_daily_summary(record: &DailyAggregateRecord, failures: usize) {
    println!("\nDAILY MARKET MOVEMENT SUMMARY - {}", record.date);
    println!("{}", daily_summary_table(record));

    let b = breadth(record);
    println!(
        "Gainers (3%+): {} | Losers (3%+): {} | Neutral: {} | Skipped: {}",
        record.gainers(),
        record.losers(),
        record.neutral,
        failures
    );
    if record.total_movers() > 0 {
        println!(
            "Market Breadth: {:.1}% advancing - {}",
            b,
            Sentiment::from_breadth(b).describe()
        );
    }
}

/// Top and bottom `n` movers of the day.
pub fn top_movers_table(details: &[DailyDetailRecord], n: usize) -> Table {
    let mut table = base_table(vec![
        header("Rank"),
        header("Symbol"),
        header("Bucket"),
        header("Change (%)").set_alignment(CellAlignment::Right),
    ]);

    let mut sorted: Vec<&DailyDetailRecord> = details.iter().collect();
    sorted.sort_by(|a, b| b.pct_change.total_cmp(&a.pct_change));

    let top = sorted.iter().take(n);
    let bottom = sorted.iter().skip(n.max(sorted.len().saturating_sub(n)));
    for (rank, detail) in top.chain(bottom).enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(&detail.symbol).fg(Color::Cyan),
            Cell::new(detail.bucket.label()).fg(bucket_color(detail.bucket)),
            Cell::new(format!("{:.2}%", detail.pct_change))
                .fg(signed_color(detail.pct_change))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// Best and worst `n` sectors by breadth, skipping sectors smaller than
/// `min_stocks`. `None` when no sector qualifies.
pub fn sector_table(rows: &[SectorRecord], n: usize, min_stocks: u32) -> Option<Table> {
    let ranked = rank_sectors(rows, min_stocks);
    if ranked.is_empty() {
        return None;
    }

    let mut table = base_table(vec![
        header("Rank"),
        header("Sector"),
        header("Up 3%+").set_alignment(CellAlignment::Right),
        header("Down 3%+").set_alignment(CellAlignment::Right),
        header("Stocks").set_alignment(CellAlignment::Right),
        header("Breadth (%)").set_alignment(CellAlignment::Right),
    ]);

    let worst_start = n.max(ranked.len().saturating_sub(n));
    let shown = ranked.iter().enumerate().take(n).chain(ranked.iter().enumerate().skip(worst_start));
    for (rank, row) in shown {
        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(&row.sector).fg(Color::Cyan),
            Cell::new(row.up_3_plus)
                .fg(Color::Green)
                .set_alignment(CellAlignment::Right),
            Cell::new(row.down_3_plus)
                .fg(Color::Red)
                .set_alignment(CellAlignment::Right),
            Cell::new(row.total).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", row.breadth))
                .fg(signed_color(row.breadth - metrics::NEUTRAL_BREADTH))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    Some(table)
}

pub fn print_sector_summary(rows: &[SectorRecord], n: usize, min_stocks: u32) {
    let Some(first) = rows.first() else {
        return;
    };
    match sector_table(rows, n, min_stocks) {
        Some(table) => {
            println!("\nSector Breadth - {} (sectors with {}+ stocks)", first.date, min_stocks);
            println!("{}", table);
        }
        None => println!("\nNo sector has {}+ classified stocks on {}", min_stocks, first.date),
    }
}

/// Last `rows` days with breadth, A/D line and a moving average of movers.
pub fn history_table(
    records: &[DailyAggregateRecord],
    rows: usize,
    window: usize,
) -> Result<Table> {
    let ad_line = advance_decline_line(records);
    let movers_ma = moving_average(&volatility_series(records), window)?;

    let mut table = base_table(vec![
        header("Date"),
        header("Gainers").set_alignment(CellAlignment::Right),
        header("Losers").set_alignment(CellAlignment::Right),
        header("Breadth (%)").set_alignment(CellAlignment::Right),
        header("A/D Line").set_alignment(CellAlignment::Right),
        header(&format!("Movers {}d MA", window)).set_alignment(CellAlignment::Right),
        header("15%+ Up/Down").set_alignment(CellAlignment::Right),
    ]);

    let start = records.len().saturating_sub(rows);
    for (i, record) in records.iter().enumerate().skip(start) {
        let b = breadth(record);
        table.add_row(vec![
            Cell::new(record.date),
            Cell::new(record.gainers())
                .fg(Color::Green)
                .set_alignment(CellAlignment::Right),
            Cell::new(record.losers())
                .fg(Color::Red)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", b))
                .fg(signed_color(b - metrics::NEUTRAL_BREADTH))
                .set_alignment(CellAlignment::Right),
            Cell::new(ad_line[i])
                .fg(signed_color(ad_line[i] as f64))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", movers_ma[i])).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}/{}", record.up_15_plus, record.down_15_plus))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    Ok(table)
}

pub fn weekly_table(records: &[DailyAggregateRecord]) -> Table {
    let mut table = base_table(vec![
        header("Day"),
        header("Days").set_alignment(CellAlignment::Right),
        header("Avg Gainers").set_alignment(CellAlignment::Right),
        header("Avg Losers").set_alignment(CellAlignment::Right),
    ]);

    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v));
    for day in weekly_pattern(records) {
        table.add_row(vec![
            Cell::new(day.weekday),
            Cell::new(day.days).set_alignment(CellAlignment::Right),
            Cell::new(fmt(day.avg_gainers))
                .fg(Color::Green)
                .set_alignment(CellAlignment::Right),
            Cell::new(fmt(day.avg_losers))
                .fg(Color::Red)
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// Text block equivalent of the insights panel.
pub fn insights_text(records: &[DailyAggregateRecord]) -> Vec<String> {
    let Some(insights) = metrics::insights(records) else {
        return vec!["No history yet. Run the tracker first to collect data.".to_string()];
    };

    let latest = &insights.latest;
    let mut lines = vec![
        format!("Latest Data ({}):", latest.date),
        format!("   Gainers (3%+): {} stocks", latest.gainers()),
        format!("   Losers (3%+): {} stocks", latest.losers()),
        format!("   Extreme gains (15%+): {} stocks", latest.up_15_plus),
        format!("   Extreme losses (15%+): {} stocks", latest.down_15_plus),
    ];

    if let Some(trend) = &insights.trend {
        lines.push("5-Day Trend:".to_string());
        lines.push(format!("   Average gainers: {:.1} stocks/day", trend.avg_gainers));
        lines.push(format!("   Average losers: {:.1} stocks/day", trend.avg_losers));
        lines.push(
            match trend.trend {
                Trend::Bullish => "   Bullish trend - More gainers than losers",
                Trend::Bearish => "   Bearish trend - More losers than gainers",
                Trend::Neutral => "   Neutral/Mixed trend",
            }
            .to_string(),
        );
    }

    if let Some(vol) = &insights.volatility {
        lines.push("Volatility Analysis:".to_string());
        lines.push(format!(
            "   Average daily movers (3%+): {:.1} stocks",
            vol.average_movers
        ));
        lines.push(format!("   Latest: {} stocks", vol.latest_movers));
        match vol.level {
            VolatilityLevel::High => lines.push(format!(
                "   High volatility day (+{:.0}% above average)",
                vol.deviation_pct
            )),
            VolatilityLevel::Low => lines.push(format!(
                "   Low volatility day ({:.0}% below average)",
                -vol.deviation_pct
            )),
            VolatilityLevel::Normal => {}
        }
    }

    if let Some(score) = metrics::market_score(records) {
        lines.extend(score_lines(&score));
    }
    if let Some(divergence) = metrics::detect_divergence(records) {
        let name = match divergence {
            Divergence::Bearish => "BEARISH DIVERGENCE",
            Divergence::Narrow => "NARROW BREADTH",
        };
        lines.push(format!("{}: {}", name, divergence.describe()));
    }
    if let Some(forecast) = metrics::predict_next_breadth(records) {
        lines.extend(forecast_lines(&forecast));
    }
    if let Some(context) = metrics::statistical_context(records) {
        lines.extend(context_lines(&context));
    }

    lines
}

fn forecast_lines(forecast: &BreadthForecast) -> Vec<String> {
    let direction = match forecast.direction {
        Direction::Rising => "Rising",
        Direction::Falling => "Falling",
        Direction::Flat => "Flat",
    };
    vec![
        format!(
            "Next Session Breadth: {:.1}% (range {:.1}% - {:.1}%)",
            forecast.prediction, forecast.range_low, forecast.range_high
        ),
        format!(
            "   Trend {} | Confidence {:.0}%",
            direction, forecast.confidence
        ),
    ]
}

fn context_lines(context: &BreadthContext) -> Vec<String> {
    vec![
        format!(
            "Statistical Context: {:.1}% vs mean {:.1}% (std {:.1})",
            context.current, context.mean, context.std_dev
        ),
        format!(
            "   Percentile {:.0} | Z-score {:.2} | {}",
            context.percentile,
            context.z_score,
            context.reading.describe()
        ),
    ]
}

fn score_lines(score: &MarketScore) -> Vec<String> {
    vec![
        format!("Market Score: {:.0}/100 ({:?})", score.overall, score.regime),
        format!(
            "   Breadth {:.1}% | Momentum {:.0} | Stability {:.0}",
            score.breadth, score.momentum, score.stability
        ),
        format!("   {}", score.regime.describe()),
    ]
}

/// Full console report over the history log.
pub fn print_report(records: &[DailyAggregateRecord], rows: usize, window: usize) -> Result<()> {
    println!("\nMARKET INSIGHTS & TREND ANALYSIS");
    for line in insights_text(records) {
        println!("{}", line);
    }
    if records.is_empty() {
        return Ok(());
    }

    println!("\nHistory (last {} days)", rows.min(records.len()));
    println!("{}", history_table(records, rows, window)?);

    if records.len() >= WEEKLY_MIN_DAYS {
        println!("\nAverage Gainers/Losers by Day of Week");
        println!("{}", weekly_table(records));
    } else {
        println!(
            "\nNeed at least {} days of data for weekly pattern analysis",
            WEEKLY_MIN_DAYS
        );
    }
    Ok(())
}
