use crate::config::{db_path, load_config};
use crate::error::AppError;
use crate::models::{Badge, LeaderboardEntry, ModelSummary, TimeWindow};
use crate::service::{team_dashboard, team_summaries};
use crate::store::{Storage, SyntheticSource, UsageSource};
use crate::ui::app::AppState;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Terminal;
use std::io;
use std::time::{Duration as StdDuration, Instant};

const COLOR_ACCENT: Color = Color::Cyan;
const COLOR_INFO: Color = Color::Green;
const COLOR_WARN: Color = Color::Yellow;
const COLOR_MUTED: Color = Color::DarkGray;
const COLOR_HEADER: Color = Color::White;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Refresh,
    Quit,
}

pub fn run_tui(demo: bool) -> Result<(), AppError> {
    let cfg = load_config()?;
    let source: Box<dyn UsageSource> = if demo {
        Box::new(SyntheticSource::new(Utc::now()))
    } else {
        Box::new(Storage::open(&db_path()?)?)
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let state = AppState {
        demo,
        ..AppState::default()
    };
    let tick_rate = StdDuration::from_secs(cfg.refresh_seconds.max(10));
    let loop_result = run_loop(&mut terminal, source.as_ref(), state, tick_rate);

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    loop_result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    source: &dyn UsageSource,
    mut state: AppState,
    tick_rate: StdDuration,
) -> Result<(), AppError> {
    let mut last_tick = Instant::now();
    refresh_dashboard(&mut state, source);

    while state.running {
        terminal.draw(|f| render(f, &state))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| StdDuration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key(key.code, key.modifiers, &mut state) {
                    KeyAction::Refresh => {
                        refresh_dashboard(&mut state, source);
                        last_tick = Instant::now();
                    }
                    KeyAction::Quit => state.running = false,
                    KeyAction::None => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            refresh_dashboard(&mut state, source);
            last_tick = Instant::now();
        }
    }

    Ok(())
}

fn handle_key(code: KeyCode, modifiers: KeyModifiers, state: &mut AppState) -> KeyAction {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return KeyAction::Quit;
    }

    let window = match code {
        KeyCode::Char('q') | KeyCode::Esc => return KeyAction::Quit,
        KeyCode::Char('r') => return KeyAction::Refresh,
        KeyCode::Tab => {
            state.next_team();
            return KeyAction::Refresh;
        }
        KeyCode::Char('1') => TimeWindow::OneDay,
        KeyCode::Char('7') => TimeWindow::SevenDays,
        KeyCode::Char('3') => TimeWindow::ThirtyDays,
        _ => return KeyAction::None,
    };

    if window == state.window {
        KeyAction::None
    } else {
        state.window = window;
        KeyAction::Refresh
    }
}

fn refresh_dashboard(state: &mut AppState, source: &dyn UsageSource) {
    state.status = "refreshing...".into();
    let now = Utc::now();

    let mut teams = match team_summaries(source, state.window, now) {
        Ok(teams) => teams,
        Err(err) => {
            state.status = format!("refresh failed: {err}");
            return;
        }
    };
    teams.sort_by_key(|t| t.rank.unwrap_or(usize::MAX));
    state.set_teams(teams);

    let selected = state.selected_team_id().map(ToString::to_string);
    state.dashboard = match selected.as_deref() {
        Some(team_id) => match team_dashboard(source, team_id, state.window, now) {
            Ok(dash) => Some(dash),
            Err(err) => {
                state.status = format!("refresh failed: {err}");
                return;
            }
        },
        None => None,
    };

    state.last_refresh = now.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    state.status = if state.teams.is_empty() {
        "no teams yet".into()
    } else {
        "ok".into()
    };
}

fn badge_label(badge: Option<Badge>) -> &'static str {
    badge.map(Badge::as_label).unwrap_or("")
}

fn kpi_values(state: &AppState) -> [String; 4] {
    match &state.dashboard {
        Some(dash) => {
            let s = &dash.summary;
            [
                format!("{:.3} g", s.total_co2_grams),
                format!("{:.6} kWh", s.total_energy_kwh),
                format!("${:.4}", s.total_cost_usd),
                format!("{:.3}", s.efficiency_score),
            ]
        }
        None => ["-".into(), "-".into(), "-".into(), "-".into()],
    }
}

fn leaderboard_rows(entries: &[LeaderboardEntry], selected: Option<&str>) -> Vec<Row<'static>> {
    entries
        .iter()
        .map(|e| {
            let style = if Some(e.subject_id.as_str()) == selected {
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(format!("{} {}", e.rank, badge_label(e.badge))),
                Cell::from(e.subject_name.clone()),
                Cell::from(format!("{:.3}", e.primary_value)),
                Cell::from(format!("{:.2} g", e.secondary_value.unwrap_or(0.0))),
            ])
            .style(style)
        })
        .collect()
}

fn model_rows(models: &[ModelSummary]) -> Vec<Row<'static>> {
    models
        .iter()
        .map(|m| {
            Row::new(vec![
                Cell::from(m.model_name.clone()),
                Cell::from(m.usage_count.to_string()),
                Cell::from(format!("{:.2} g", m.total_co2_grams)),
                Cell::from(format!("{:.0} ms", m.avg_latency_ms)),
            ])
        })
        .collect()
}

fn render(f: &mut ratatui::Frame, state: &AppState) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(f.area());

    let team_label = state
        .dashboard
        .as_ref()
        .map(|d| d.summary.team_name.clone())
        .unwrap_or_else(|| "-".into());
    let header = Paragraph::new(format!(
        " carbonsight{}  ·  team {}  ·  {}  ·  {}  ·  {} ",
        if state.demo { " (demo)" } else { "" },
        team_label,
        state.window.as_label(),
        state.status,
        state.last_refresh
    ))
    .block(Block::default().borders(Borders::ALL).title(" Session "))
    .style(Style::default().fg(COLOR_HEADER));
    f.render_widget(header, root[0]);

    let kpis = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25); 4])
        .split(root[1]);
    let titles = [" CO2 ", " Energy ", " Cost ", " Efficiency "];
    let colors = [COLOR_INFO, COLOR_ACCENT, COLOR_WARN, COLOR_HEADER];
    for (i, value) in kpi_values(state).into_iter().enumerate() {
        let kpi = Paragraph::new(value)
            .block(Block::default().borders(Borders::ALL).title(titles[i]))
            .style(Style::default().fg(colors[i]).add_modifier(Modifier::BOLD));
        f.render_widget(kpi, kpis[i]);
    }

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(root[2]);

    let header_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);

    let (team_board, models) = state
        .dashboard
        .as_ref()
        .map(|d| (d.team_leaderboard.as_slice(), d.models.as_slice()))
        .unwrap_or_default();

    let team_table = Table::new(
        leaderboard_rows(team_board, state.selected_team_id()),
        [
            Constraint::Length(10),
            Constraint::Percentage(35),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ],
    )
    .header(Row::new(vec!["Rank", "Team", "Score", "CO2"]).style(header_style))
    .block(Block::default().borders(Borders::ALL).title(" Team Leaderboard "));
    f.render_widget(team_table, body[0]);

    let model_table = Table::new(
        model_rows(models),
        [
            Constraint::Percentage(40),
            Constraint::Percentage(15),
            Constraint::Percentage(25),
            Constraint::Percentage(20),
        ],
    )
    .header(Row::new(vec!["Model", "Uses", "CO2", "Latency"]).style(header_style))
    .block(Block::default().borders(Borders::ALL).title(" Models "));
    f.render_widget(model_table, body[1]);

    let footer = Paragraph::new("r refresh | 1/7/3 window | Tab next team | q quit")
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(COLOR_MUTED));
    f.render_widget(footer, root[3]);
}
