//! UI rendering for the drive panel.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};
use serde_json::Value;

use crate::api::{Device, DriveStatus};
use crate::core::tasks::format_timestamp;
use crate::core::{MediaListing, NoticeLevel, PanelAction, PanelPhase, TaskState};

use super::app::TuiApp;
use super::input::key_hint;

/// Main render function.
pub fn render(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Buttons
            Constraint::Min(8),    // Status and media
            Constraint::Length(8), // Running tasks
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_buttons(frame, app, chunks[1]);
    render_details(frame, app, chunks[2]);
    render_tasks(frame, app, chunks[3]);
    render_footer(frame, app, chunks[4]);
}

fn render_header(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let view = &app.view;
    let mode = if app.simulation() { " [SIM]" } else { "" };
    let mut spans = vec![Span::raw(format!(" Drive {}{}  ", view.drive, mode))];

    spans.push(flag_span("ONLINE", "OFFLINE", view.flags.online));
    spans.push(Span::raw("  "));
    if view.flags.busy {
        spans.push(Span::styled("BUSY", Style::default().fg(Color::Yellow)));
    } else {
        spans.push(Span::styled("IDLE", Style::default().fg(Color::DarkGray)));
    }

    let block = Block::default()
        .title("tapewatch")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn flag_span(on: &'static str, off: &'static str, value: bool) -> Span<'static> {
    if value {
        Span::styled(on, Style::default().fg(Color::Green))
    } else {
        Span::styled(off, Style::default().fg(Color::Red))
    }
}

fn render_buttons(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let mut spans = Vec::new();
    for action in PanelAction::ALL {
        let style = if app.is_enabled(action) {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(
            format!(" [{}] {} ", key_hint(action), action.label()),
            style,
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_details(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    render_status(frame, app, chunks[0]);
    render_media(frame, &app.view.media, chunks[1]);

    if app.view.masked {
        render_mask(frame, app, area);
    }
}

fn render_status(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let block = Block::default()
        .title("Drive Status")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let rows = status_rows(app.view.device.as_ref(), app.view.status.as_ref());
    if rows.is_empty() {
        let text = Paragraph::new("  No status loaded")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let lines: Vec<Line> = rows
        .into_iter()
        .map(|(name, value)| {
            Line::from(vec![
                Span::styled(format!("  {:<14}", name), Style::default().fg(Color::Cyan)),
                Span::raw(value),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_media(frame: &mut Frame, media: &MediaListing, area: Rect) {
    let block = Block::default()
        .title("Media")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if media.is_empty() {
        let text = Paragraph::new("  Nothing read yet")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let mut lines = Vec::new();
    for (command, value) in media.iter() {
        lines.push(Line::from(Span::styled(
            format!("  {command}"),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
        if command == "cartridge-memory" {
            for attr in media.cartridge_memory() {
                lines.push(Line::from(format!(
                    "    {:04X}  {:<34} {}",
                    attr.id, attr.name, attr.value
                )));
            }
        } else {
            for (name, value) in value_rows(value) {
                lines.push(Line::from(format!("    {:<24} {}", name, value)));
            }
        }
    }
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_mask(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let text = match app.view.phase {
        PanelPhase::Uninitialized => "Loading...".to_string(),
        _ => match app.view.device.as_ref().and_then(|d| d.state.as_deref()) {
            Some(owner) => format!("Drive is busy: {owner}"),
            None => "Drive is busy".to_string(),
        },
    };

    let overlay = centered(area, 70, 3);
    frame.render_widget(Clear, overlay);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    frame.render_widget(
        Paragraph::new(format!(" {text}"))
            .style(Style::default().fg(Color::Yellow))
            .block(block),
        overlay,
    );
}

fn centered(area: Rect, percent_x: u16, height: u16) -> Rect {
    let width = area.width * percent_x / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn render_tasks(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let block = Block::default()
        .title("Running Tasks")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if app.task_rows.is_empty() {
        let text = match &app.task_error {
            Some(e) => format!("  Failed to load tasks: {e}"),
            None => "  No running tasks".to_string(),
        };
        let text = Paragraph::new(text)
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = app
        .task_rows
        .iter()
        .map(|row| {
            let line = Line::from(vec![
                Span::raw("  "),
                Span::styled(row.state.glyph(), Style::default().fg(state_color(&row.state))),
                Span::raw(format!(
                    "  {:<28} {:<14} {}  {:>8}",
                    row.description,
                    row.user,
                    row.started,
                    format_duration(row.duration)
                )),
            ]);
            ListItem::new(line)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn state_color(state: &TaskState) -> Color {
    match state {
        TaskState::Running => Color::Cyan,
        TaskState::Ok => Color::Green,
        TaskState::Warning(_) => Color::Yellow,
        TaskState::Unknown => Color::Gray,
        TaskState::Error(_) => Color::Red,
    }
}

fn render_footer(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let line = match (&app.prompt, &app.view.notice) {
        (Some(text), _) => Line::from(vec![
            Span::styled("  Label text: ", Style::default().fg(Color::Cyan)),
            Span::raw(format!("{text}_")),
            Span::styled(
                "   [Enter] Label  [Esc] Cancel",
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        (None, Some(notice)) => {
            let color = match notice.level {
                NoticeLevel::Info => Color::Green,
                NoticeLevel::Error => Color::Red,
            };
            Line::from(Span::styled(
                format!("  {}", notice.text),
                Style::default().fg(color),
            ))
        }
        (None, None) => Line::from("  [q] Quit"),
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(line).block(block), area);
}

/// Name/value rows for the status region.
pub fn status_rows(
    device: Option<&Device>,
    status: Option<&DriveStatus>,
) -> Vec<(&'static str, String)> {
    let mut rows = Vec::new();

    if let Some(device) = device {
        rows.push(("Vendor", device.vendor.clone()));
        rows.push(("Model", device.model.clone()));
        rows.push(("Serial", device.serial.clone()));
        rows.push(("Path", device.path.clone()));
        if let Some(changer) = &device.changer {
            let slot = device
                .changer_drivenum
                .map(|n| format!(" (drive {n})"))
                .unwrap_or_default();
            rows.push(("Changer", format!("{changer}{slot}")));
        }
    }

    let Some(status) = status else {
        return rows;
    };

    rows.push(("Status", status.status.clone()));
    if let Some(density) = &status.density {
        rows.push(("Density", density.clone()));
    }
    if let Some(blocksize) = status.blocksize {
        let text = if blocksize == 0 {
            "variable".to_string()
        } else {
            blocksize.to_string()
        };
        rows.push(("Block size", text));
    }
    if let Some(options) = &status.options {
        rows.push(("Options", options.clone()));
    }
    if let Some(alerts) = status.alert_flags.as_ref().filter(|a| !a.is_empty()) {
        rows.push(("Alert flags", alerts.clone()));
    }
    if let (Some(file), Some(block)) = (status.file_number, status.block_number) {
        rows.push(("Position", format!("file {file}, block {block}")));
    }
    if let Some(manufactured) = status.manufactured {
        rows.push(("Manufactured", format_timestamp(manufactured)));
    }
    if let Some(bytes) = status.bytes_read {
        rows.push(("Bytes read", format_bytes(bytes)));
    }
    if let Some(bytes) = status.bytes_written {
        rows.push(("Bytes written", format_bytes(bytes)));
    }
    if let Some(mounts) = status.volume_mounts {
        rows.push(("Mounts", mounts.to_string()));
    }
    if let Some(passes) = status.medium_passes {
        rows.push(("Medium passes", passes.to_string()));
    }
    if let Some(wearout) = status.medium_wearout {
        rows.push(("Wearout", format_wearout(wearout)));
    }

    rows
}

/// Flatten a command result into name/value rows.
fn value_rows(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar(v)))
            .collect(),
        other => vec![("value".to_string(), scalar(other))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_wearout(fraction: f64) -> String {
    format!("{:.2}%", fraction.clamp(0.0, 1.0) * 100.0)
}

pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
