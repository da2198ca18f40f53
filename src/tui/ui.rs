//! Dashboard rendering.
//!
//! Lays out one frame from an aggregator snapshot: header line, host table
//! beside the operator log, footer with the selected host's command menu and
//! the input buffer. All data comes in as an owned snapshot, so rendering
//! never touches a lock.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use crate::core::{CommandSpec, DashboardSnapshot, HostView};
use crate::tui::input::UiState;
use crate::tui::theme::Theme;

/// Draw one frame.
pub fn draw(frame: &mut Frame, snapshot: &DashboardSnapshot, state: &UiState, theme: &Theme) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(5),    // Host table + log
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    let content = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(chunks[1]);

    draw_header(frame, snapshot, theme, chunks[0]);
    draw_host_table(frame, snapshot, theme, content[0]);
    draw_log_pane(frame, snapshot, state, theme, content[1]);
    draw_footer(frame, snapshot, state, theme, chunks[2]);
}

fn draw_header(frame: &mut Frame, snapshot: &DashboardSnapshot, theme: &Theme, area: Rect) {
    let selected = snapshot
        .hosts
        .get(snapshot.selected)
        .map_or("-", |h| h.host.as_str());

    let line = Line::from(vec![
        Span::styled(" hostwatch ", Style::default().fg(theme.primary).add_modifier(Modifier::BOLD)),
        Span::styled(format!("│ {selected} "), Style::default().fg(theme.text)),
        Span::styled(format!("│ {}", snapshot.status_msg), Style::default().fg(theme.text_dim)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

/// Lines of one host entry: identity line plus one line per status row.
fn host_lines<'a>(index: usize, host: &'a HostView, theme: &Theme) -> Vec<Line<'a>> {
    let ip = host.ip.as_deref().unwrap_or("-");
    let log_flag = if host.log_enabled { " [L]" } else { "" };

    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{:>2} ", index + 1), Style::default().fg(theme.text_dim)),
        Span::styled(host.host.as_str(), Style::default().fg(theme.text).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {ip}{log_flag}"), Style::default().fg(theme.text_dim)),
    ])];
    for row in &host.rows {
        lines.push(Line::from(vec![
            Span::raw("    "),
            Span::styled(row.text.as_str(), Style::default().fg(theme.severity(row.severity))),
        ]));
    }
    lines
}

fn draw_host_table(frame: &mut Frame, snapshot: &DashboardSnapshot, theme: &Theme, area: Rect) {
    let items: Vec<ListItem> = snapshot
        .hosts
        .iter()
        .enumerate()
        .map(|(i, host)| {
            let item = ListItem::new(host_lines(i, host, theme));
            if i == snapshot.selected {
                item.style(Style::default().bg(theme.selected_bg))
            } else {
                item
            }
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(" hosts "),
    );
    frame.render_widget(list, area);
}

/// Window of log lines for a pane of `height` rows, `scroll` lines back from
/// the tail. Scrolling past the start pins to the oldest full window.
fn visible_log(log: &[String], height: usize, scroll: usize) -> &[String] {
    if height == 0 || log.is_empty() {
        return &[];
    }
    let end = log.len().saturating_sub(scroll).max(height.min(log.len()));
    let start = end.saturating_sub(height);
    &log[start..end]
}

fn draw_log_pane(
    frame: &mut Frame,
    snapshot: &DashboardSnapshot,
    state: &UiState,
    theme: &Theme,
    area: Rect,
) {
    let inner_height = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = visible_log(&snapshot.log, inner_height, state.log_scroll)
        .iter()
        .map(|line| ListItem::new(Span::styled(line.as_str(), Style::default().fg(theme.text_dim))))
        .collect();

    let title = if state.log_scroll > 0 {
        format!(" log (-{}) ", state.log_scroll)
    } else {
        " log ".to_string()
    };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .title(title),
    );
    frame.render_widget(list, area);
}

/// Footer text for the selected host's command menu.
fn command_menu(commands: &[CommandSpec]) -> String {
    commands
        .iter()
        .map(|c| format!("{}={}", c.key, c.label))
        .collect::<Vec<_>>()
        .join("  ")
}

fn draw_footer(
    frame: &mut Frame,
    snapshot: &DashboardSnapshot,
    state: &UiState,
    theme: &Theme,
    area: Rect,
) {
    let line = Line::from(vec![
        Span::styled(" > ", Style::default().fg(theme.primary)),
        Span::styled(state.input.as_str(), Style::default().fg(theme.text)),
        Span::styled(
            format!("   {}", command_menu(&snapshot.commands)),
            Style::default().fg(theme.text_dim),
        ),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Severity, StatusRow};

    fn log_lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn log_window_follows_tail_at_zero_scroll() {
        let log = log_lines(20);
        let window = visible_log(&log, 5, 0);
        assert_eq!(window.first().map(String::as_str), Some("line 15"));
        assert_eq!(window.last().map(String::as_str), Some("line 19"));
    }

    #[test]
    fn log_window_scrolls_back_and_pins_at_start() {
        let log = log_lines(20);
        let window = visible_log(&log, 5, 10);
        assert_eq!(window.last().map(String::as_str), Some("line 9"));

        // Scrolling past the start keeps the oldest full window.
        let window = visible_log(&log, 5, 100);
        assert_eq!(window.first().map(String::as_str), Some("line 0"));
        assert_eq!(window.len(), 5);

        assert!(visible_log(&log, 0, 0).is_empty());
        assert!(visible_log(&[], 5, 0).is_empty());
    }

    #[test]
    fn command_menu_formats_key_label_pairs() {
        let commands = vec![
            CommandSpec::new("r", "restart nginx"),
            CommandSpec::new("t", "traceroute"),
        ];
        assert_eq!(command_menu(&commands), "r=restart nginx  t=traceroute");
        assert_eq!(command_menu(&[]), "");
    }

    #[test]
    fn host_lines_include_rows_and_log_flag() {
        let host = HostView {
            host: "db1".to_string(),
            ip: Some("10.0.0.5".to_string()),
            rows: vec![StatusRow::new("ping", "PING: 3ms", Severity::Ok, 0.0)],
            log_enabled: true,
        };
        let lines = host_lines(0, &host, &Theme::default());
        assert_eq!(lines.len(), 2);
        let header: String = lines[0].spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(header.contains("db1"));
        assert!(header.contains("[L]"));
        let row: String = lines[1].spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(row.contains("PING: 3ms"));
    }
}
