//! UI rendering for the editor.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
};

use crate::core::models::JobStatus;

use super::app::{EditorApp, View};

/// Main render function - dispatches to view-specific renderers.
pub fn render(frame: &mut Frame, app: &EditorApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Footer/help
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    match app.view {
        View::Progress => render_progress(frame, app, chunks[1]),
        View::Scenes => render_scenes(frame, app, chunks[1]),
    }

    render_footer(frame, app, chunks[2]);
}

fn render_header(frame: &mut Frame, app: &EditorApp, area: Rect) {
    let visitor = app
        .visitor_id
        .as_deref()
        .map(|id| format!("  visitor {}", short(id)))
        .unwrap_or_default();
    let saving = if app.is_saving() { "  [saving]" } else { "" };
    let title = format!("REELSYNC  video {}{}{}", app.video_id, visitor, saving);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    frame.render_widget(block, area);
}

fn render_progress(frame: &mut Frame, app: &EditorApp, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let job_label = app.job_id.as_deref().unwrap_or("-");
    let block = Block::default()
        .title(format!("Job {}", job_label))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let (percent, label) = match &app.job {
        Some(status) => (
            status.display_percentage(),
            format!("{:.0}%", status.percentage_completed.clamp(0.0, 100.0)),
        ),
        None => (0, "waiting for first status".to_string()),
    };

    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .percent(percent)
        .label(label);
    frame.render_widget(gauge, chunks[0]);

    let details = match &app.job {
        Some(status) => format_counters(status),
        None => vec![Line::from("  No status received yet")],
    };
    let paragraph = Paragraph::new(details).block(
        Block::default()
            .title("Units")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(paragraph, chunks[1]);
}

fn format_counters(status: &JobStatus) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![
            Span::styled("  Completed:   ", Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{} / {}", status.completed, status.total)),
        ]),
        Line::from(vec![
            Span::styled("  In progress: ", Style::default().fg(Color::DarkGray)),
            Span::raw(status.in_progress.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Waiting:     ", Style::default().fg(Color::DarkGray)),
            Span::raw(status.waiting.to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Failed:      ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                status.failed.to_string(),
                if status.failed > 0 {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                },
            ),
        ]),
    ];

    if !status.is_consistent() {
        lines.push(Line::from(Span::styled(
            "  (unit counts do not add up to the total)",
            Style::default().fg(Color::Yellow),
        )));
    }
    lines
}

fn render_scenes(frame: &mut Frame, app: &EditorApp, area: Rect) {
    let block = Block::default()
        .title("Scenes")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let scenes = match &app.scenes {
        Some(scenes) if !scenes.is_empty() => scenes,
        _ => {
            let text = Paragraph::new("  No scenes")
                .style(Style::default().fg(Color::DarkGray))
                .block(block);
            frame.render_widget(text, area);
            return;
        }
    };

    let items: Vec<ListItem> = scenes
        .items()
        .iter()
        .enumerate()
        .map(|(i, scene)| {
            let is_cursor = i == app.cursor;
            let is_carried = app.dragging == Some(i);

            let mut style = Style::default();
            if is_cursor {
                style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
            }
            if is_carried {
                style = style.fg(Color::Yellow);
            }

            let marker = match (is_carried, is_cursor) {
                (true, _) => "≡ ",
                (false, true) => "> ",
                _ => "  ",
            };
            let duration = scene
                .duration_secs
                .map(|secs| format!("{:>5.1}s", secs))
                .unwrap_or_else(|| "     -".to_string());

            let line = Line::from(vec![
                Span::raw(marker),
                Span::styled(format!("{:>2}. ", i + 1), Style::default().fg(Color::DarkGray)),
                Span::raw(format!("{:<32}", truncate(&scene.title, 32))),
                Span::styled(duration, Style::default().fg(Color::DarkGray)),
            ]);

            ListItem::new(line).style(style)
        })
        .collect();

    let list = List::new(items).block(block);
    frame.render_widget(list, area);
}

fn render_footer(frame: &mut Frame, app: &EditorApp, area: Rect) {
    let content = match &app.notice {
        Some(notice) => {
            let color = if notice.is_error {
                Color::Red
            } else {
                Color::Green
            };
            Line::from(Span::styled(
                format!(" {}", notice.text),
                Style::default().fg(color),
            ))
        }
        None => {
            let help = match (app.view, app.dragging.is_some()) {
                (View::Progress, _) => " q: Quit",
                (View::Scenes, false) => " j/k: Move  Space: Pick up  r: Reload  q: Quit",
                (View::Scenes, true) => " j/k: Choose slot  Enter: Drop  Esc: Cancel",
            };
            Line::from(Span::styled(help, Style::default().fg(Color::DarkGray)))
        }
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(content).block(block), area);
}

fn short(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_titles() {
        assert_eq!(truncate("Kitchen", 32), "Kitchen");
        assert_eq!(truncate("abcdefgh", 5), "abcd…");
    }

    #[test]
    fn inconsistent_counters_are_flagged() {
        let status = JobStatus {
            id: "j".to_string(),
            percentage_completed: 50.0,
            total: 10,
            completed: 5,
            in_progress: 0,
            failed: 0,
            waiting: 0,
        };
        assert_eq!(format_counters(&status).len(), 5);
    }
}
