use crate::app::App;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use speedmon::MeasurementKind;

// Color Palette - Elegant & Minimal
const ACCENT: Color = Color::Rgb(100, 149, 237); // Cornflower blue
const SUCCESS: Color = Color::Rgb(134, 194, 156); // Soft green
const INFO: Color = Color::Rgb(147, 180, 220); // Soft blue
const WARN: Color = Color::Rgb(220, 180, 130); // Soft amber
const DANGER: Color = Color::Rgb(220, 120, 120);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(7),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(frame.area());

    draw_header(frame, chunks[0], app);
    draw_status_card(frame, chunks[1], app);
    draw_tests(frame, chunks[2], app);
    draw_help(frame, chunks[3], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([Constraint::Length(12), Constraint::Min(10)]).split(inner);

    frame.render_widget(
        Paragraph::new("speedmon")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        chunks[0],
    );

    let (state, color) = if app.controls_enabled {
        ("idle", TEXT_MUTED)
    } else {
        ("running", ACCENT)
    };
    frame.render_widget(
        Paragraph::new(state)
            .style(Style::default().fg(color))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn draw_status_card(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER_ACTIVE))
        .title(Span::styled(" Connection Test ", Style::default().fg(TEXT_SECONDARY)));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(2),
    ])
    .split(inner);

    let status_color = if app.status.starts_with("Error") {
        DANGER
    } else {
        TEXT_PRIMARY
    };
    frame.render_widget(
        Paragraph::new(app.status.as_str())
            .style(Style::default().fg(status_color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    frame.render_widget(
        Paragraph::new(app.metric.as_str())
            .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_tests(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER))
        .title(Span::styled(" Tests ", Style::default().fg(TEXT_SECONDARY)));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Min(0),
    ])
    .split(inner);

    for (i, row) in app.rows.iter().enumerate() {
        let selected = i == app.selected;
        let color = kind_color(row.kind);

        let title_style = match (app.controls_enabled, selected) {
            (false, _) => Style::default().fg(TEXT_MUTED),
            (true, true) => Style::default().fg(color).add_modifier(Modifier::BOLD),
            (true, false) => Style::default().fg(TEXT_PRIMARY),
        };
        let marker = if selected { "› " } else { "  " };

        let lines = vec![
            Line::from(vec![
                Span::styled(marker, Style::default().fg(color)),
                Span::styled(row.title, title_style),
                Span::styled(format!("  [{}]", key_for(row.kind)), Style::default().fg(TEXT_MUTED)),
            ]),
            Line::from(Span::styled(
                format!("  {}", row.subtitle),
                Style::default().fg(TEXT_MUTED),
            )),
        ];
        frame.render_widget(Paragraph::new(lines), rows[i]);
    }
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.controls_enabled {
        "enter start · tab select · d/u/p quick start · q quit"
    } else {
        "s stop test · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

fn kind_color(kind: MeasurementKind) -> Color {
    match kind {
        MeasurementKind::Download => SUCCESS,
        MeasurementKind::Upload => INFO,
        MeasurementKind::Ping => WARN,
    }
}

fn key_for(kind: MeasurementKind) -> char {
    match kind {
        MeasurementKind::Download => 'd',
        MeasurementKind::Upload => 'u',
        MeasurementKind::Ping => 'p',
    }
}
