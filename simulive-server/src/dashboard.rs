//! Terminal dashboard for the stream server

use crate::config::ServerConfig;
use crate::metrics::{LogLevel, Metrics, ServerStatus};
use crate::server::{self, ServerEvent, ServerResult};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lines moved by PageUp/PageDown
const PAGE_SIZE: usize = 10;

/// Dashboard state for scrolling etc.
#[derive(Debug, Clone, PartialEq)]
struct DashboardState {
    /// Log scroll position (0 = most recent at bottom)
    log_scroll: usize,
    /// Whether auto-scroll is enabled (follows new logs)
    auto_scroll: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            log_scroll: 0,
            auto_scroll: true,
        }
    }
}

impl DashboardState {
    /// Scroll toward older entries
    fn scroll_up(&mut self, lines: usize, log_count: usize) {
        if log_count > 0 {
            self.log_scroll = (self.log_scroll + lines).min(log_count - 1);
            self.auto_scroll = false;
        }
    }

    /// Scroll toward newer entries; reaching the bottom re-enables follow
    fn scroll_down(&mut self, lines: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(lines);
        if self.log_scroll == 0 {
            self.auto_scroll = true;
        }
    }

    /// Apply a key press. Returns true when the dashboard should quit.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers, log_count: usize) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Up | KeyCode::Char('k') => self.scroll_up(1, log_count),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_down(1),
            KeyCode::PageUp => self.scroll_up(PAGE_SIZE, log_count),
            KeyCode::PageDown => self.scroll_down(PAGE_SIZE),
            KeyCode::Home => self.scroll_up(log_count, log_count),
            KeyCode::End => self.scroll_down(self.log_scroll),
            KeyCode::Char('a') => {
                self.auto_scroll = !self.auto_scroll;
                if self.auto_scroll {
                    self.log_scroll = 0;
                }
            }
            _ => {}
        }
        false
    }
}

/// Run the dashboard
pub async fn run(config: ServerConfig, metrics: Arc<RwLock<Metrics>>) -> ServerResult<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Channel for server events
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Start the HTTP server in background. Failures land in the activity log;
    // printing would corrupt the alternate screen.
    let metrics_for_server = Arc::clone(&metrics);
    tokio::spawn(async move {
        let _ = server::run_with_dashboard(config, metrics_for_server, event_tx).await;
    });

    let mut state = DashboardState::default();
    let tick_rate = Duration::from_millis(100);

    loop {
        while let Ok(event) = event_rx.try_recv() {
            if let ServerEvent::Failed(_) = event {
                // Keep the failure on screen
                state.auto_scroll = true;
            }
            if state.auto_scroll {
                state.log_scroll = 0;
            }
        }

        terminal.draw(|f| draw(f, &metrics, &state))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let log_count = metrics.read().logs.len();
                    if state.handle_key(key.code, key.modifiers, log_count) {
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Draw the dashboard
fn draw(f: &mut Frame, metrics: &Arc<RwLock<Metrics>>, state: &DashboardState) {
    let m = metrics.read();

    // Main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(5),  // Stats
            Constraint::Min(10),    // Logs
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    // Header
    draw_header(f, chunks[0], &m);

    // Stats
    draw_stats(f, chunks[1], &m);

    // Logs
    draw_logs(f, chunks[2], &m, state);

    // Footer
    draw_footer(f, chunks[3], state);
}

fn draw_header(f: &mut Frame, area: Rect, m: &Metrics) {
    let status_style = match m.status {
        ServerStatus::Starting => Style::default().fg(Color::Yellow),
        ServerStatus::Running => Style::default().fg(Color::Green),
        ServerStatus::Error => Style::default().fg(Color::Red),
    };

    let status_text = match m.status {
        ServerStatus::Starting => "STARTING",
        ServerStatus::Running => "RUNNING",
        ServerStatus::Error => "ERROR",
    };

    let title = vec![
        Line::from(vec![
            Span::styled("Simulive Stream Server", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  │  Status: "),
            Span::styled(status_text, status_style),
            Span::raw("  │  Uptime: "),
            Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
        ])
    ];

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_stats(f: &mut Frame, area: Rect, m: &Metrics) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    // Server Info
    let address = m.bind_address.clone().unwrap_or_else(|| "binding...".to_string());
    let (admin_text, admin_color) = if m.admin_enabled {
        ("enabled", Color::Green)
    } else {
        ("disabled", Color::Yellow)
    };

    let server_info = vec![
        Line::from(vec![
            Span::raw("Address: "),
            Span::styled(address, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Admin: "),
            Span::styled(admin_text, Style::default().fg(admin_color)),
        ]),
        Line::from(vec![
            Span::raw("Catalog: "),
            Span::styled(
                format!("{} streams / {} assets", m.stream_count, m.asset_count),
                Style::default().fg(Color::Cyan),
            ),
        ]),
    ];

    let server_block = Paragraph::new(server_info)
        .block(Block::default().borders(Borders::ALL).title(" Server "));
    f.render_widget(server_block, chunks[0]);

    // Viewer traffic
    let viewer_info = vec![
        Line::from(vec![
            Span::raw("Clock syncs: "),
            Span::styled(
                m.clock_requests.to_string(),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Lookups: "),
            Span::styled(m.stream_lookups.to_string(), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Misses: "),
            Span::styled(m.stream_misses.to_string(), Style::default().fg(Color::Magenta)),
        ]),
    ];

    let viewer_block = Paragraph::new(viewer_info)
        .block(Block::default().borders(Borders::ALL).title(" Viewers "));
    f.render_widget(viewer_block, chunks[1]);

    // Tokens and admin
    let access_info = vec![
        Line::from(vec![
            Span::raw("Tokens: "),
            Span::styled(
                format!("{} issued / {} refused", m.tokens_issued, m.token_failures),
                Style::default().fg(Color::Yellow),
            ),
        ]),
        Line::from(vec![
            Span::raw("Admin changes: "),
            Span::styled(m.admin_mutations.to_string(), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Rejected: "),
            Span::styled(m.rejected_requests.to_string(), Style::default().fg(Color::Red)),
        ]),
    ];

    let access_block = Paragraph::new(access_info)
        .block(Block::default().borders(Borders::ALL).title(" Access "));
    f.render_widget(access_block, chunks[2]);
}

fn draw_logs(f: &mut Frame, area: Rect, m: &Metrics, state: &DashboardState) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total_logs = m.logs.len();

    // Calculate which logs to show based on scroll position
    let log_items: Vec<ListItem> = m.logs
        .iter()
        .rev()
        .skip(state.log_scroll)
        .take(visible_height)
        .map(|entry| {
            let level_style = match entry.level {
                LogLevel::Info => Style::default().fg(Color::Blue),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Error => Style::default().fg(Color::Red),
                LogLevel::Stream => Style::default().fg(Color::Green),
                LogLevel::Admin => Style::default().fg(Color::Magenta),
            };

            let time = entry.timestamp.format("%H:%M:%S").to_string();

            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", time), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("[{}] ", entry.level.as_str()), level_style),
                Span::raw(&entry.message),
            ]))
        })
        .collect();

    // Title with scroll indicator
    let scroll_indicator = if state.auto_scroll {
        " [AUTO] ".to_string()
    } else if total_logs > 0 {
        format!(" [{}/{}] ", total_logs - state.log_scroll, total_logs)
    } else {
        String::new()
    };

    let logs = List::new(log_items)
        .block(Block::default().borders(Borders::ALL).title(format!(" Activity Log{}", scroll_indicator)));

    f.render_widget(logs, area);

    // Render scrollbar if there are more logs than visible
    if total_logs > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));

        let mut scrollbar_state = ScrollbarState::new(total_logs)
            .position(total_logs.saturating_sub(state.log_scroll + visible_height));

        f.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin { vertical: 1, horizontal: 0 }),
            &mut scrollbar_state,
        );
    }
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let auto_text = if state.auto_scroll { "ON " } else { "OFF" };
    let auto_color = if state.auto_scroll { Color::Green } else { Color::Yellow };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Q ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Quit  "),
        Span::styled(" ↑↓ ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Scroll  "),
        Span::styled(" PgUp/Dn ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Page  "),
        Span::styled(" A ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Auto-scroll: "),
        Span::styled(auto_text, Style::default().fg(auto_color)),
    ]));

    f.render_widget(footer, area);
}
