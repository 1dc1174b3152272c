use std::time::Duration;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

use crate::core::app::App;
use crate::utils::scroll::ScrollCalculator;

/// Rows the input panel occupies: one text row inside its borders.
pub const INPUT_PANEL_HEIGHT: u16 = 3;

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(INPUT_PANEL_HEIGHT)])
        .split(f.area());

    draw_transcript(f, app, chunks[0]);
    draw_input(f, app, chunks[1]);
}

fn draw_transcript(f: &mut Frame, app: &mut App, area: Rect) {
    let title = format!(
        "causerie v{} - {} • Logging: {}",
        env!("CARGO_PKG_VERSION"),
        app.session.model,
        app.session.logging.status_string()
    );

    let text_width = area.width.saturating_sub(2);
    let available_height = area.height.saturating_sub(2);

    // The paragraph scrolls over lines wrapped ahead of time, so the offset
    // is in the same units the scroll math uses. Clamp in case the terminal
    // grew since the offset was set.
    let total = app.ui.calculate_wrapped_line_count(text_width);
    let max_offset = ScrollCalculator::max_scroll_offset(total, available_height);
    let offset = app.ui.scroll_offset.min(max_offset);
    let lines = app.ui.get_prewrapped_lines_cached(text_width).to_vec();

    let transcript = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((offset, 0));
    f.render_widget(transcript, area);
}

fn draw_input(f: &mut Frame, app: &mut App, area: Rect) {
    let input = Paragraph::new(app.ui.input.as_str())
        .block(Block::default().borders(Borders::ALL).title(input_title(app)));
    f.render_widget(input, area);

    let cursor_x = area.x + 1 + UnicodeWidthStr::width(app.ui.input.as_str()) as u16;
    let max_x = area.x + area.width.saturating_sub(2);
    f.set_cursor_position((cursor_x.min(max_x), area.y + 1));
}

/// The input panel title doubles as the status line: notices take priority,
/// then the streaming indicator, then the usual key hints.
fn input_title(app: &App) -> Line<'static> {
    if let Some(notice) = app.ui.active_notice() {
        return Line::from(Span::styled(
            format!(" {} ", notice),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    if app.ui.is_streaming {
        let glyph = pulse_glyph(app.ui.pulse_start.elapsed());
        Line::from(Span::raw(format!(
            " {} Streaming response (Esc to interrupt) ",
            glyph
        )))
    } else {
        Line::from(Span::raw(
            " Type your message (Enter to send, Ctrl+C to quit) ".to_string(),
        ))
    }
}

fn pulse_glyph(elapsed: Duration) -> char {
    const FRAMES: [char; 4] = ['○', '◐', '●', '◐'];
    let idx = (elapsed.as_millis() / 250) as usize % FRAMES.len();
    FRAMES[idx]
}
