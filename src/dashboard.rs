use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols,
    text::Line,
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Borders, Cell, Chart, Clear, Dataset, GraphType,
        Paragraph, Row, Table,
    },
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

use crate::aggregate::DailyAggregateRecord;
use crate::metrics::{
    self, advance_decline_line, breadth, moving_average, volatility_series, weekly_pattern,
};
use crate::movement::Bucket;
use crate::pipeline;
use crate::sectors::{self, SectorRecord, rank_sectors};
use crate::storage_utils::{AppConfig, AsyncStorageManager};

// --- App State ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Breadth,
    AdvanceDecline,
    Volatility,
    Extremes,
    Weekly,
    Distribution,
    Sectors,
}

impl View {
    const ALL: [View; 7] = [
        View::Breadth,
        View::AdvanceDecline,
        View::Volatility,
        View::Extremes,
        View::Weekly,
        View::Distribution,
        View::Sectors,
    ];

    fn title(self) -> &'static str {
        match self {
            View::Breadth => "Gainers vs Losers",
            View::AdvanceDecline => "Advance-Decline Line",
            View::Volatility => "Volatility",
            View::Extremes => "Extreme Moves",
            View::Weekly => "Weekly Pattern",
            View::Distribution => "Distribution",
            View::Sectors => "Sectors",
        }
    }
}

/// Everything the dashboard draws from disk.
struct Snapshot {
    records: Vec<DailyAggregateRecord>,
    /// Sector rows of the most recent sector date only.
    sectors: Vec<SectorRecord>,
}

struct App {
    records: Vec<DailyAggregateRecord>,
    sectors: Vec<SectorRecord>,
    window: usize,
    sector_min_stocks: u32,
    selected: usize,
    is_refreshing: bool,
    status: Option<String>,
}

impl App {
    fn new(snapshot: Snapshot, config: &AppConfig) -> Self {
        Self {
            records: snapshot.records,
            sectors: snapshot.sectors,
            window: config.report.moving_average_window.max(1),
            sector_min_stocks: config.report.sector_min_stocks,
            selected: 0,
            is_refreshing: false,
            status: None,
        }
    }

    fn view(&self) -> View {
        View::ALL[self.selected % View::ALL.len()]
    }

    fn select_previous(&mut self) {
        self.selected = self.selected.checked_sub(1).unwrap_or(View::ALL.len() - 1);
    }

    fn select_next(&mut self) {
        self.selected = (self.selected + 1) % View::ALL.len();
    }
}

// --- Data Loading ---

async fn load_snapshot(storage: &AsyncStorageManager, config: &AppConfig) -> Result<Snapshot> {
    let store = pipeline::history_store(storage, config);
    Ok(Snapshot {
        records: store.load_all().await?,
        sectors: sectors::latest_day(&store.load_sectors().await?),
    })
}

// --- TUI ---

pub async fn run_dashboard(storage: AsyncStorageManager, config: AppConfig) -> Result<()> {
    // Fail before touching the terminal if the history is unreadable.
    let snapshot = load_snapshot(&storage, &config).await?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let app = App::new(snapshot, &config);
    let res = run_app(&mut terminal, app, storage, config).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    storage: AsyncStorageManager,
    config: AppConfig,
) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<Result<Snapshot>>(1);

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(result) = data_rx.try_recv() {
            app.is_refreshing = false;
            match result {
                Ok(snapshot) => {
                    app.records = snapshot.records;
                    app.sectors = snapshot.sectors;
                    app.status = None;
                }
                Err(e) => {
                    error!("Refresh failed: {:#}", e);
                    app.status = Some(format!("Refresh failed: {}", e));
                }
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if !handle_key_event(key, &mut app, &data_tx, &storage, &config) {
                    return Ok(());
                }
            }
            // Resize events need nothing: the next draw picks up the new size.
        }
    }
}

fn handle_key_event(
    key: KeyEvent,
    app: &mut App,
    tx: &mpsc::Sender<Result<Snapshot>>,
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::F(5) if !app.is_refreshing => {
            app.is_refreshing = true;
            let tx_clone = tx.clone();
            let storage = storage.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let result = match pipeline::run_daily_tracking(&storage, &config, pipeline::today())
                    .await
                {
                    Ok(_) => load_snapshot(&storage, &config).await,
                    Err(e) => Err(e),
                };
                let _ = tx_clone.send(result).await;
            });
        }
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::Char(c) => {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            if digit > 0 && digit <= View::ALL.len() {
                app.selected = digit - 1;
            }
        }
        _ => {}
    }
    true
}

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(20), Constraint::Percentage(80)])
        .split(f.size());
    let right_chunks =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).split(main_layout[1]);

    // Sidebar
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Views")
        .title_alignment(Alignment::Center);
    let inner_sidebar_area = sidebar_block.inner(main_layout[0]);
    f.render_widget(sidebar_block, main_layout[0]);

    let sidebar_chunks = Layout::vertical([
        Constraint::Min(1),    // view list
        Constraint::Length(2), // key hints
    ])
    .split(inner_sidebar_area);

    let view_lines: Vec<Line> = View::ALL
        .iter()
        .enumerate()
        .map(|(i, view)| {
            let line = Line::from(format!("{} {}", i + 1, view.title()));
            if *view == app.view() {
                line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
            } else {
                line
            }
        })
        .collect();
    f.render_widget(Paragraph::new(view_lines), sidebar_chunks[0]);
    f.render_widget(
        Paragraph::new("F5 refresh\nq quit").alignment(Alignment::Center),
        sidebar_chunks[1],
    );

    // Header
    f.render_widget(
        Paragraph::new(header_text(app)).block(
            Block::default()
                .borders(Borders::ALL)
                .title_alignment(Alignment::Center)
                .title("Market Breadth Tracker"),
        ),
        right_chunks[0],
    );

    // Body
    let body = right_chunks[1];
    if app.records.is_empty() {
        f.render_widget(
            Paragraph::new("No history yet. Press F5 to run the tracker.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL)),
            body,
        );
    } else {
        match app.view() {
            View::Breadth => render_breadth(f, app, body),
            View::AdvanceDecline => render_advance_decline(f, app, body),
            View::Volatility => render_volatility(f, app, body),
            View::Extremes => render_extremes(f, app, body),
            View::Weekly => render_weekly(f, app, body),
            View::Distribution => render_distribution(f, app, body),
            View::Sectors => render_sectors(f, app, body),
        }
    }

    if app.is_refreshing {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Running tracking pipeline...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn header_text(app: &App) -> String {
    if let Some(status) = &app.status {
        return status.clone();
    }
    match app.records.last() {
        Some(latest) => format!(
            "Latest {} | Gainers {} | Losers {} | Breadth {:.1}% | {} day(s)",
            latest.date,
            latest.gainers(),
            latest.losers(),
            breadth(latest),
            app.records.len()
        ),
        None => "Never updated".to_string(),
    }
}

fn points<T: Copy + Into<f64>>(values: &[T]) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (i as f64, (*v).into()))
        .collect()
}

/// Padded [min, max] of every point, never a zero-height range.
fn y_bounds(series: &[&[(f64, f64)]]) -> [f64; 2] {
    let (min, max) = series
        .iter()
        .flat_map(|s| s.iter().map(|p| p.1))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(y), hi.max(y))
        });
    if !min.is_finite() || !max.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((max - min) * 0.1).max(1.0);
    [min - pad, max + pad]
}

fn date_axis(records: &[DailyAggregateRecord]) -> Axis<'static> {
    let n = records.len();
    let mut labels = Vec::new();
    if let Some(first) = records.first() {
        labels.push(Span::raw(first.date.format("%m-%d").to_string()));
    }
    if n > 2 {
        labels.push(Span::raw(records[n / 2].date.format("%m-%d").to_string()));
    }
    if n > 1 {
        labels.push(Span::raw(records[n - 1].date.format("%m-%d").to_string()));
    }
    Axis::default()
        .title("Date")
        .style(Style::default().fg(Color::Gray))
        .bounds([0.0, (n.saturating_sub(1)).max(1) as f64])
        .labels(labels)
}

fn value_axis(title: &'static str, bounds: [f64; 2]) -> Axis<'static> {
    Axis::default()
        .title(title)
        .style(Style::default().fg(Color::Gray))
        .bounds(bounds)
        .labels(vec![
            Span::raw(format!("{:.0}", bounds[0])),
            Span::raw(format!("{:.0}", (bounds[0] + bounds[1]) / 2.0)),
            Span::raw(format!("{:.0}", bounds[1])),
        ])
}

fn line_dataset<'a>(name: &'a str, data: &'a [(f64, f64)], color: Color) -> Dataset<'a> {
    Dataset::default()
        .name(name)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

fn render_breadth(f: &mut Frame, app: &App, area: Rect) {
    let gainers: Vec<u32> = app.records.iter().map(|r| r.gainers()).collect();
    let losers: Vec<u32> = app.records.iter().map(|r| r.losers()).collect();
    let gainer_points = points(&gainers);
    let loser_points = points(&losers);

    let chart = Chart::new(vec![
        line_dataset("Gainers (3%+)", &gainer_points, Color::Green),
        line_dataset("Losers (3%+)", &loser_points, Color::Red),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Market Breadth: Gainers vs Losers (3%+ moves)"),
    )
    .x_axis(date_axis(&app.records))
    .y_axis(value_axis("Stocks", y_bounds(&[gainer_points.as_slice(), loser_points.as_slice()])));
    f.render_widget(chart, area);
}

fn render_advance_decline(f: &mut Frame, app: &App, area: Rect) {
    let ad: Vec<f64> = advance_decline_line(&app.records)
        .into_iter()
        .map(|v| v as f64)
        .collect();
    let ad_points = points(&ad);
    let zero_points: Vec<(f64, f64)> = ad_points.iter().map(|(x, _)| (*x, 0.0)).collect();

    let color = if ad.last().copied().unwrap_or(0.0) >= 0.0 {
        Color::Green
    } else {
        Color::Red
    };
    let chart = Chart::new(vec![
        line_dataset("Cumulative A/D", &ad_points, color),
        line_dataset("Zero", &zero_points, Color::DarkGray),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Cumulative Advance-Decline Line"),
    )
    .x_axis(date_axis(&app.records))
    .y_axis(value_axis("Cumulative Difference", y_bounds(&[ad_points.as_slice(), zero_points.as_slice()])));
    f.render_widget(chart, area);
}

fn render_volatility(f: &mut Frame, app: &App, area: Rect) {
    let movers = volatility_series(&app.records);
    // The window is clamped to >= 1 in App::new.
    let ma = moving_average(&movers, app.window).unwrap_or_default();
    let mover_points = points(&movers);
    let ma_points = points(&ma);
    let ma_name = format!("{}-day MA", app.window);

    let chart = Chart::new(vec![
        Dataset::default()
            .name("Movers (3%+)")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Magenta))
            .data(&mover_points),
        line_dataset(&ma_name, &ma_points, Color::Yellow),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Market Volatility (Total Stocks Moving 3%+)"),
    )
    .x_axis(date_axis(&app.records))
    .y_axis(value_axis("Stocks", y_bounds(&[mover_points.as_slice(), ma_points.as_slice()])));
    f.render_widget(chart, area);
}

fn render_extremes(f: &mut Frame, app: &App, area: Rect) {
    let up: Vec<u32> = app.records.iter().map(|r| r.up_15_plus).collect();
    let down: Vec<u32> = app.records.iter().map(|r| r.down_15_plus).collect();
    let up_points = points(&up);
    let down_points = points(&down);

    let chart = Chart::new(vec![
        line_dataset("Up 15%+", &up_points, Color::LightGreen),
        line_dataset("Down 15%+", &down_points, Color::LightRed),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Extreme Movements (15%+)"),
    )
    .x_axis(date_axis(&app.records))
    .y_axis(value_axis("Stocks", y_bounds(&[up_points.as_slice(), down_points.as_slice()])));
    f.render_widget(chart, area);
}

fn render_sectors(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.sectors.first() {
        Some(row) => format!(
            "Sector Breadth on {} ({}+ stocks)",
            row.date, app.sector_min_stocks
        ),
        None => "Sector Breadth".to_string(),
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    let ranked = rank_sectors(&app.sectors, app.sector_min_stocks);
    if ranked.is_empty() {
        f.render_widget(
            Paragraph::new("No sector data yet. Press F5 to run the tracker.")
                .alignment(Alignment::Center)
                .block(block),
            area,
        );
        return;
    }

    let header = Row::new([
        Cell::from("Rank"),
        Cell::from("Sector"),
        Cell::from("Up"),
        Cell::from("Down"),
        Cell::from("Stocks"),
        Cell::from("Breadth (%)"),
    ])
    .style(Style::default().bg(Color::DarkGray));

    let rows = ranked.iter().enumerate().map(|(i, row)| {
        let color = if row.breadth > metrics::NEUTRAL_BREADTH {
            Color::Green
        } else if row.breadth < metrics::NEUTRAL_BREADTH {
            Color::Red
        } else {
            Color::Gray
        };
        Row::new([
            Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
            Cell::from(row.sector.clone()).style(Style::default().fg(Color::Cyan)),
            Cell::from(row.up_3_plus.to_string()),
            Cell::from(row.down_3_plus.to_string()),
            Cell::from(row.total.to_string()),
            Cell::from(format!("{:.1}", row.breadth)).style(Style::default().fg(color)),
        ])
    });

    f.render_widget(
        Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Percentage(40),
                Constraint::Length(8),
                Constraint::Length(8),
                Constraint::Length(8),
                Constraint::Length(12),
            ],
        )
        .header(header)
        .block(block),
        area,
    );
}

fn render_weekly(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Average Gainers/Losers by Day of Week");

    if app.records.len() < crate::report::WEEKLY_MIN_DAYS {
        f.render_widget(
            Paragraph::new(format!(
                "Need at least {} days of data\nfor weekly pattern analysis",
                crate::report::WEEKLY_MIN_DAYS
            ))
            .alignment(Alignment::Center)
            .block(block),
            area,
        );
        return;
    }

    let mut chart = BarChart::default()
        .block(block)
        .bar_width(6)
        .bar_gap(1)
        .group_gap(3);
    for day in weekly_pattern(&app.records) {
        let bar = |value: Option<f64>, color: Color| {
            let v = value.unwrap_or(0.0);
            Bar::default()
                .value(v.round() as u64)
                .text_value(format!("{:.1}", v))
                .style(Style::default().fg(color))
        };
        chart = chart.data(
            BarGroup::default()
                .label(Line::from(day.weekday.to_string()))
                .bars(&[
                    bar(day.avg_gainers, Color::Green),
                    bar(day.avg_losers, Color::Red),
                ]),
        );
    }
    f.render_widget(chart, area);
}

fn render_distribution(f: &mut Frame, app: &App, area: Rect) {
    let Some(latest) = app.records.last() else {
        return;
    };
    let bars: Vec<Bar> = Bucket::ALL
        .iter()
        .map(|&bucket| {
            let color = if bucket.is_gainer() {
                Color::Green
            } else if bucket.is_loser() {
                Color::Red
            } else {
                Color::Gray
            };
            Bar::default()
                .value(latest.count(bucket) as u64)
                .label(Line::from(bucket.label()))
                .style(Style::default().fg(color))
        })
        .collect();

    let sentiment = metrics::Sentiment::from_breadth(breadth(latest));
    let chart = BarChart::default()
        .block(Block::default().borders(Borders::ALL).title(format!(
            "Distribution on {} - {}",
            latest.date,
            sentiment.describe()
        )))
        .bar_width(9)
        .bar_gap(1)
        .data(BarGroup::default().bars(&bars));
    f.render_widget(chart, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratatui::backend::TestBackend;

    fn history(n: usize) -> Vec<DailyAggregateRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        (0..n)
            .map(|i| DailyAggregateRecord {
                up_3_5: 3 + (i % 4) as u32,
                down_3_5: 2,
                neutral: 20,
                ..DailyAggregateRecord::empty(start + chrono::Days::new(i as u64))
            })
            .collect()
    }

    fn app(records: Vec<DailyAggregateRecord>, sectors: Vec<SectorRecord>) -> App {
        App::new(Snapshot { records, sectors }, &AppConfig::default())
    }

    fn sector(name: &str, up: u32, total: u32) -> SectorRecord {
        SectorRecord {
            date: NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(),
            sector: name.to_string(),
            up_3_plus: up,
            down_3_plus: 0,
            neutral: total - up,
            total,
            breadth: up as f64 / total as f64 * 100.0,
        }
    }

    fn rendered(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn test_view_selection_wraps() {
        let mut app = app(Vec::new(), Vec::new());
        app.select_previous();
        assert_eq!(app.view(), View::Sectors);
        app.select_next();
        assert_eq!(app.view(), View::Breadth);
    }

    #[test]
    fn test_y_bounds_never_collapse() {
        assert_eq!(y_bounds(&[]), [0.0, 1.0]);
        let flat = [(0.0, 5.0), (1.0, 5.0)];
        assert_eq!(y_bounds(&[flat.as_slice()]), [4.0, 6.0]);
    }

    #[test]
    fn test_every_view_renders() {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        let mut app = app(history(10), vec![sector("Banks", 2, 10), sector("Pharma", 7, 10)]);
        for i in 0..View::ALL.len() {
            app.selected = i;
            terminal.draw(|f| ui(f, &app)).unwrap();
        }

        let empty = self::app(Vec::new(), Vec::new());
        terminal.draw(|f| ui(f, &empty)).unwrap();
    }

    #[test]
    fn test_sector_view_lists_ranked_sectors() {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        let mut app = app(
            history(3),
            vec![sector("Banks", 2, 10), sector("Pharma", 7, 10), sector("Tiny", 1, 1)],
        );
        app.selected = View::ALL.iter().position(|v| *v == View::Sectors).unwrap();
        terminal.draw(|f| ui(f, &app)).unwrap();

        let screen = rendered(&terminal);
        assert!(screen.contains("Pharma"));
        assert!(screen.contains("Banks"));
        assert!(!screen.contains("Tiny"));
        assert!(screen.find("Pharma") < screen.find("Banks"));
    }
}
