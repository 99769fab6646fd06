use crate::app::App;
use bb_core::status::{BufferStatus, StatusRow, READY_STATUS};
use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

const LABEL_WIDTH: usize = 22;

#[derive(Clone, Copy)]
struct MonitorTheme {
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn monitor_theme() -> MonitorTheme {
    MonitorTheme {
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

pub fn render_ui(frame: &mut ratatui::Frame, app: &App, view: &BufferStatus) {
    let size = frame.size();
    let theme = monitor_theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);
    frame.render_widget(render_header(app, view, theme), layout[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(layout[1]);
    frame.render_widget(
        render_rows("Configuration", &view.config_rows(), theme),
        body[0],
    );
    frame.render_widget(render_rows("Runtime", &view.runtime_rows(), theme), body[1]);
    frame.render_widget(render_footer(app, theme), layout[2]);

    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn state_color(view: &BufferStatus, theme: MonitorTheme) -> Color {
    if !view.enabled {
        return theme.muted;
    }
    match view.state.as_str() {
        "ready" => theme.ok,
        "printing" | "transferring" => theme.title,
        _ => theme.warn,
    }
}

fn status_color(status: &str, theme: MonitorTheme) -> Color {
    let lowered = status.to_ascii_lowercase();
    if status == READY_STATUS {
        theme.ok
    } else if lowered.contains("resend") || lowered.contains("fail") {
        theme.critical
    } else {
        theme.text
    }
}

fn render_header(app: &App, view: &BufferStatus, theme: MonitorTheme) -> Paragraph<'static> {
    let (link_label, link_color) = if app.connected {
        ("live", theme.ok)
    } else {
        ("offline", theme.critical)
    };
    let age = app
        .last_change
        .map(|at| format!("updated {}s ago", (Utc::now() - at).num_seconds().max(0)))
        .unwrap_or_else(|| "no data yet".to_string());
    let mut first = vec![
        Span::styled(
            "Buffer Buddy ",
            Style::default().fg(theme.title).add_modifier(Modifier::BOLD),
        ),
        Span::styled(app.config.octoprint_url.clone(), Style::default().fg(theme.muted)),
        Span::raw("  "),
        Span::styled(format!("[{link_label}]"), Style::default().fg(link_color)),
        Span::raw("  "),
        Span::styled(age, Style::default().fg(theme.muted)),
    ];
    if app.fetches_in_flight > 0 {
        first.push(Span::styled("  fetching…", Style::default().fg(theme.warn)));
    }
    let second = vec![
        Span::styled("state ", Style::default().fg(theme.muted)),
        Span::styled(
            view.state.clone(),
            Style::default()
                .fg(state_color(view, theme))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("  status ", Style::default().fg(theme.muted)),
        Span::styled(
            view.status.clone(),
            Style::default().fg(status_color(&view.status, theme)),
        ),
    ];
    Paragraph::new(vec![Line::from(first), Line::from(second)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border)),
    )
}

fn row_line(row: &StatusRow, theme: MonitorTheme) -> Line<'static> {
    let value_color = match row.value.as_str() {
        "?" => theme.muted,
        "true" => theme.ok,
        _ => theme.text,
    };
    Line::from(vec![
        Span::styled(
            format!("{:<width$}", row.label, width = LABEL_WIDTH),
            Style::default().fg(theme.muted),
        ),
        Span::styled(row.value.clone(), Style::default().fg(value_color)),
    ])
}

fn render_rows(title: &'static str, rows: &[StatusRow], theme: MonitorTheme) -> Paragraph<'static> {
    let lines: Vec<Line<'static>> = rows.iter().map(|row| row_line(row, theme)).collect();
    Paragraph::new(lines).block(
        Block::default()
            .title(Span::styled(title, Style::default().fg(theme.title)))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border)),
    )
}

fn render_footer(app: &App, theme: MonitorTheme) -> Paragraph<'static> {
    let note = app.status_note.clone().unwrap_or_default();
    let note_color = if note.contains("failed") || note.contains("lost") {
        theme.critical
    } else {
        theme.muted
    };
    Paragraph::new(Line::from(vec![
        Span::styled("r", Style::default().fg(theme.title)),
        Span::styled(" refresh  ", Style::default().fg(theme.muted)),
        Span::styled("c", Style::default().fg(theme.title)),
        Span::styled(" clear  ", Style::default().fg(theme.muted)),
        Span::styled("?", Style::default().fg(theme.title)),
        Span::styled(" help  ", Style::default().fg(theme.muted)),
        Span::styled("q", Style::default().fg(theme.title)),
        Span::styled(" quit   ", Style::default().fg(theme.muted)),
        Span::styled(note, Style::default().fg(note_color)),
    ]))
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: MonitorTheme) {
    let area = centered_rect(60, 50, frame.size());
    let lines = vec![
        Line::from(Span::styled(
            "Keys",
            Style::default().fg(theme.title).add_modifier(Modifier::BOLD),
        )),
        Line::from("r        request a fresh snapshot"),
        Line::from("c        ask the plugin to clear its counters"),
        Line::from("? / F1   toggle this help"),
        Line::from("q / Esc  quit"),
        Line::from(""),
        Line::from(Span::styled(
            "Counters update from the push socket. Configuration is re-read on startup, login, logout, settings changes and reconnects.",
            Style::default().fg(theme.muted),
        )),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }).block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border)),
        ),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

/// Single-line rendering used by `watch --plain`.
pub fn plain_line(view: &BufferStatus) -> String {
    view.display_rows()
        .iter()
        .map(|row| format!("{}={}", row.label.to_ascii_lowercase().replace(' ', "_"), row.value))
        .collect::<Vec<_>>()
        .join(" ")
}
