//! Pure transcript-to-lines projection. Given the message list and the
//! streaming state, produce one render unit per message; no terminal
//! handles, no side effects, so the mapping is directly testable.

use std::collections::VecDeque;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use serde_json::Value;

use crate::core::message::{Message, MessageId, Role, ToolInvocation};

/// Offered on the intro screen and filled in by Tab.
pub const SUGGESTED_PROMPT: &str = "How many 'r's are in the word strawberry?";

/// The block of lines one transcript message renders to. `source` is the id
/// of that message; chrome like the intro panel has no source.
pub struct RenderUnit {
    pub source: Option<MessageId>,
    pub lines: Vec<Line<'static>>,
}

/// Project the transcript into render units, in transcript order.
///
/// While a reply is streaming but no delta has arrived yet, a pending
/// indicator trails the last unit, sitting exactly where the reply's first
/// line will appear. A reply record that exists but is still blank renders
/// the indicator in its own unit instead.
pub fn build_render_units(
    messages: &VecDeque<Message>,
    streamed_into: Option<MessageId>,
    awaiting_first_delta: bool,
) -> Vec<RenderUnit> {
    let mut units = Vec::with_capacity(messages.len().max(1));

    if messages.is_empty() {
        units.push(RenderUnit {
            source: None,
            lines: intro_lines(),
        });
        return units;
    }

    for message in messages {
        let lines = match message.role {
            Role::User => user_lines(message),
            Role::Assistant => assistant_lines(message, streamed_into == Some(message.id)),
            Role::System => system_lines(message),
        };
        units.push(RenderUnit {
            source: Some(message.id),
            lines,
        });
    }

    if awaiting_first_delta {
        if let Some(unit) = units.last_mut() {
            unit.lines.push(pending_line());
        }
    }

    units
}

fn intro_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(Span::styled(
            "Welcome to causerie.".to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::raw(
            "Type a message and press Enter to send it.".to_string(),
        )),
        Line::from(vec![
            Span::raw("Press Tab to try: ".to_string()),
            Span::styled(
                SUGGESTED_PROMPT.to_string(),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(Span::raw(
            "Esc interrupts a streaming reply; Ctrl+C quits.".to_string(),
        )),
        Line::from(""),
    ]
}

fn user_lines(message: &Message) -> Vec<Line<'static>> {
    let prefix = Span::styled(
        "You: ".to_string(),
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let mut lines = Vec::new();
    let mut content_lines = message.content.lines();
    let first = content_lines.next().unwrap_or("");
    lines.push(Line::from(vec![prefix, Span::raw(first.to_string())]));
    for rest in content_lines {
        lines.push(Line::from(Span::raw(rest.to_string())));
    }
    lines.push(Line::from(""));
    lines
}

fn assistant_lines(message: &Message, is_streamed_into: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for invocation in &message.tool_invocations {
        lines.extend(tool_invocation_lines(invocation));
    }

    if message.is_blank() && is_streamed_into {
        lines.push(pending_line());
    } else {
        for text_line in message.content.lines() {
            lines.push(Line::from(Span::raw(text_line.to_string())));
        }
    }

    lines.push(Line::from(""));
    lines
}

fn system_lines(message: &Message) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = message
        .content
        .lines()
        .map(|text_line| {
            Line::from(Span::styled(
                text_line.to_string(),
                Style::default().fg(Color::DarkGray),
            ))
        })
        .collect();
    lines.push(Line::from(""));
    lines
}

fn tool_invocation_lines(invocation: &ToolInvocation) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![
        Span::styled(
            format!("⚙ {}", invocation.name),
            Style::default().fg(Color::Magenta),
        ),
        Span::raw(format!(" {}", compact_json(&invocation.arguments))),
    ])];

    match &invocation.result {
        Some(result) => lines.push(Line::from(vec![
            Span::styled("  → ".to_string(), Style::default().fg(Color::Green)),
            Span::raw(compact_json(result)),
        ])),
        None => lines.push(Line::from(Span::styled(
            "  running…".to_string(),
            Style::default().fg(Color::DarkGray),
        ))),
    }
    lines
}

fn pending_line() -> Line<'static> {
    Line::from(Span::styled(
        "…".to_string(),
        Style::default().fg(Color::DarkGray),
    ))
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
