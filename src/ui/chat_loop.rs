//! Terminal lifecycle and the event loop: raw-mode setup, a reader task for
//! terminal events, and a single-threaded apply/draw cycle fed by the action
//! queue and the stream channel.

use std::error::Error;
use std::io;
use std::time::{Duration, Instant};

use ratatui::backend::CrosstermBackend;
use ratatui::crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEvent, MouseEventKind,
};
use ratatui::crossterm::execute;
use ratatui::crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::Terminal;
use tokio::sync::mpsc;

use crate::core::app::actions::{
    apply_actions, AppAction, AppActionContext, AppActionDispatcher, AppActionEnvelope,
    AppCommand,
};
use crate::core::app::{App, SessionContext};
use crate::core::chat_stream::{ChatStreamService, StreamMessage};
use crate::ui::render_units::SUGGESTED_PROMPT;
use crate::ui::renderer;

const FRAME_DURATION: Duration = Duration::from_millis(16);

pub async fn run_chat(session: SessionContext) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, session).await;

    // Always restore the terminal, even when the loop errored.
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: SessionContext,
) -> Result<(), Box<dyn Error>> {
    let mut app = App::new(session);

    let (chat_service, mut stream_rx) = ChatStreamService::new();
    let (action_tx, mut action_rx) = mpsc::unbounded_channel();
    let dispatcher = AppActionDispatcher::new(action_tx);

    // Crossterm's reader blocks, so it lives on its own task and forwards
    // events over a channel. It winds down once the receiver goes away.
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(10)).unwrap_or(false) {
                match event::read() {
                    Ok(ev) => {
                        if input_tx.send(ev).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
    });

    terminal.draw(|f| renderer::draw(f, &mut app))?;
    let mut last_frame = Instant::now();
    let mut needs_redraw = false;

    while !app.ui.exit_requested {
        let size = terminal.size()?;
        let context = AppActionContext {
            term_width: size.width,
            term_height: size.height,
        };

        if process_stream_updates(&mut stream_rx, &dispatcher, context) {
            needs_redraw = true;
        }

        while let Ok(ev) = input_rx.try_recv() {
            handle_terminal_event(&mut app, &dispatcher, context, ev);
            needs_redraw = true;
        }

        let envelopes = drain_action_queue(&mut action_rx);
        if !envelopes.is_empty() {
            for command in apply_actions(&mut app, envelopes) {
                match command {
                    AppCommand::SpawnStream(params) => chat_service.spawn_stream(params),
                }
            }
            needs_redraw = true;
        }

        if app.ui.clear_expired_notice() {
            needs_redraw = true;
        }
        // The pulse in the input title animates while a response streams.
        if app.ui.is_streaming {
            needs_redraw = true;
        }

        if needs_redraw && last_frame.elapsed() >= FRAME_DURATION {
            terminal.draw(|f| renderer::draw(f, &mut app))?;
            last_frame = Instant::now();
            needs_redraw = false;
        }

        tokio::time::sleep(FRAME_DURATION).await;
    }

    Ok(())
}

/// Drain the stream channel into actions, merging runs of adjacent text
/// chunks into the trailing append. Merging never crosses a tool call or an
/// end-of-stream marker, so relative ordering survives.
fn process_stream_updates(
    stream_rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    dispatcher: &AppActionDispatcher,
    context: AppActionContext,
) -> bool {
    let mut actions: Vec<AppAction> = Vec::new();
    while let Ok((message, stream_id)) = stream_rx.try_recv() {
        match message {
            StreamMessage::Chunk(content) => {
                if let Some(AppAction::AppendResponseChunk {
                    content: tail,
                    stream_id: tail_id,
                }) = actions.last_mut()
                {
                    if *tail_id == stream_id {
                        tail.push_str(&content);
                        continue;
                    }
                }
                actions.push(AppAction::AppendResponseChunk { content, stream_id });
            }
            StreamMessage::ToolCall(delta) => {
                actions.push(AppAction::StreamToolCallDelta { delta, stream_id });
            }
            StreamMessage::ToolResult { call_id, payload } => {
                actions.push(AppAction::StreamToolResult {
                    call_id,
                    payload,
                    stream_id,
                });
            }
            StreamMessage::Error(error) => {
                actions.push(AppAction::StreamErrored { error, stream_id });
            }
            StreamMessage::End => {
                actions.push(AppAction::StreamCompleted { stream_id });
            }
        }
    }

    if actions.is_empty() {
        return false;
    }
    dispatcher.dispatch_many(actions, context);
    true
}

fn drain_action_queue(
    action_rx: &mut mpsc::UnboundedReceiver<AppActionEnvelope>,
) -> Vec<AppActionEnvelope> {
    let mut envelopes = Vec::new();
    while let Ok(envelope) = action_rx.try_recv() {
        envelopes.push(envelope);
    }
    envelopes
}

fn handle_terminal_event(
    app: &mut App,
    dispatcher: &AppActionDispatcher,
    context: AppActionContext,
    ev: Event,
) {
    match ev {
        Event::Key(key) => handle_key_event(app, dispatcher, context, key),
        Event::Mouse(mouse) => handle_mouse_event(app, context, mouse),
        Event::Resize(width, height) => {
            app.ui.invalidate_prewrap_cache();
            app.conversation().update_scroll_position(width, height);
        }
        _ => {}
    }
}

fn handle_key_event(
    app: &mut App,
    dispatcher: &AppActionDispatcher,
    context: AppActionContext,
    key: KeyEvent,
) {
    if key.kind == KeyEventKind::Release {
        return;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.request_exit();
        }
        KeyCode::Enter => {
            dispatcher.dispatch(
                AppAction::SubmitMessage {
                    message: app.ui.input.clone(),
                },
                context,
            );
        }
        KeyCode::Esc => {
            if app.ui.is_streaming {
                app.conversation().cancel_current_stream();
            }
        }
        KeyCode::Tab => {
            // Offer the intro screen's sample question on an empty line.
            if app.ui.messages.is_empty() && app.ui.input.is_empty() {
                app.ui.input.push_str(SUGGESTED_PROMPT);
            }
        }
        KeyCode::Backspace => {
            app.ui.input.pop();
        }
        KeyCode::Up => app.conversation().scroll_up_by(1),
        KeyCode::Down => {
            app.conversation()
                .scroll_down_by(1, context.term_width, context.term_height)
        }
        KeyCode::PageUp => {
            let page = page_height(app, context);
            app.conversation().scroll_up_by(page);
        }
        KeyCode::PageDown => {
            let page = page_height(app, context);
            app.conversation()
                .scroll_down_by(page, context.term_width, context.term_height);
        }
        KeyCode::Home => app.conversation().scroll_to_top(),
        KeyCode::End => {
            app.conversation()
                .scroll_to_bottom(context.term_width, context.term_height)
        }
        KeyCode::Char(c) => app.ui.input.push(c),
        _ => {}
    }
}

fn handle_mouse_event(app: &mut App, context: AppActionContext, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollUp => app.conversation().scroll_up_by(3),
        MouseEventKind::ScrollDown => {
            app.conversation()
                .scroll_down_by(3, context.term_width, context.term_height)
        }
        _ => {}
    }
}

fn page_height(app: &mut App, context: AppActionContext) -> u16 {
    app.conversation()
        .calculate_available_height(context.term_height)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::{StreamError, StreamErrorKind, ToolCallDelta};
    use crate::utils::test_utils::create_test_app;
    use serde_json::json;

    fn test_context() -> AppActionContext {
        AppActionContext {
            term_width: 80,
            term_height: 24,
        }
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn wiring() -> (AppActionDispatcher, mpsc::UnboundedReceiver<AppActionEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AppActionDispatcher::new(tx), rx)
    }

    #[test]
    fn typing_edits_the_input_line() {
        let mut app = create_test_app();
        let (dispatcher, _rx) = wiring();
        for c in ['h', 'i', '!'] {
            handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Char(c)));
        }
        assert_eq!(app.ui.input, "hi!");

        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Backspace));
        assert_eq!(app.ui.input, "hi");
    }

    #[test]
    fn enter_submits_the_input_through_the_action_queue() {
        let mut app = create_test_app();
        let (dispatcher, mut rx) = wiring();
        app.ui.input = "hello".to_string();

        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Enter));

        let envelopes = drain_action_queue(&mut rx);
        let commands = apply_actions(&mut app, envelopes);
        assert_eq!(commands.len(), 1);
        assert!(app.ui.is_streaming);
        assert!(app.ui.input.is_empty());
        assert_eq!(app.ui.messages.len(), 1);
    }

    #[test]
    fn esc_interrupts_only_an_active_stream() {
        let mut app = create_test_app();
        let (dispatcher, _rx) = wiring();

        // Idle: nothing to cancel, nothing changes.
        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Esc));
        assert!(!app.ui.is_streaming);

        let (token, _) = app.conversation().start_new_stream();
        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Esc));
        assert!(token.is_cancelled());
        assert!(!app.ui.is_streaming);
    }

    #[test]
    fn tab_offers_the_sample_question_once() {
        let mut app = create_test_app();
        let (dispatcher, _rx) = wiring();

        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Tab));
        assert_eq!(app.ui.input, SUGGESTED_PROMPT);

        // Not on top of existing text.
        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Tab));
        assert_eq!(app.ui.input, SUGGESTED_PROMPT);

        // Not once the conversation has started.
        app.ui.input.clear();
        app.conversation().add_user_message("hi".to_string());
        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Tab));
        assert!(app.ui.input.is_empty());
    }

    #[test]
    fn ctrl_c_requests_exit() {
        let mut app = create_test_app();
        let (dispatcher, _rx) = wiring();
        handle_key_event(
            &mut app,
            &dispatcher,
            test_context(),
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        );
        assert!(app.ui.exit_requested);
    }

    #[test]
    fn arrow_up_unpins_the_view() {
        let mut app = create_test_app();
        let (dispatcher, _rx) = wiring();
        assert!(app.ui.auto_scroll);
        handle_key_event(&mut app, &dispatcher, test_context(), press(KeyCode::Up));
        assert!(!app.ui.auto_scroll);
    }

    #[test]
    fn chunk_runs_merge_without_crossing_tool_activity() {
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        let (dispatcher, mut action_rx) = wiring();

        let delta = ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            name: Some("lookup".to_string()),
            arguments: Some("{}".to_string()),
        };
        for message in [
            StreamMessage::Chunk("a".to_string()),
            StreamMessage::Chunk("b".to_string()),
            StreamMessage::ToolCall(delta),
            StreamMessage::Chunk("c".to_string()),
            StreamMessage::End,
        ] {
            stream_tx.send((message, 1)).expect("send");
        }

        assert!(process_stream_updates(
            &mut stream_rx,
            &dispatcher,
            test_context()
        ));

        let kinds: Vec<String> = drain_action_queue(&mut action_rx)
            .into_iter()
            .map(|envelope| match envelope.action {
                AppAction::AppendResponseChunk { content, .. } => format!("chunk:{}", content),
                AppAction::StreamToolCallDelta { .. } => "tool".to_string(),
                AppAction::StreamCompleted { .. } => "end".to_string(),
                other => panic!("unexpected action: {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec!["chunk:ab", "tool", "chunk:c", "end"]);
    }

    #[test]
    fn errors_pass_through_the_stream_channel_unmerged() {
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        let (dispatcher, mut action_rx) = wiring();

        for message in [
            StreamMessage::Chunk("partial".to_string()),
            StreamMessage::Error(StreamError::new(StreamErrorKind::Provider, "boom")),
            StreamMessage::End,
        ] {
            stream_tx.send((message, 0)).expect("send");
        }
        process_stream_updates(&mut stream_rx, &dispatcher, test_context());

        let envelopes = drain_action_queue(&mut action_rx);
        assert_eq!(envelopes.len(), 3);
        assert!(matches!(
            &envelopes[1].action,
            AppAction::StreamErrored { error, .. } if error.message == "boom"
        ));
    }

    #[test]
    fn an_empty_stream_channel_dispatches_nothing() {
        let (_stream_tx, mut stream_rx) =
            mpsc::unbounded_channel::<(StreamMessage, u64)>();
        let (dispatcher, mut action_rx) = wiring();

        assert!(!process_stream_updates(
            &mut stream_rx,
            &dispatcher,
            test_context()
        ));
        assert!(drain_action_queue(&mut action_rx).is_empty());
    }

    #[test]
    fn tool_results_are_forwarded_with_their_payload() {
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();
        let (dispatcher, mut action_rx) = wiring();

        stream_tx
            .send((
                StreamMessage::ToolResult {
                    call_id: Some("call_7".to_string()),
                    payload: json!({"count": 3}),
                },
                2,
            ))
            .expect("send");
        process_stream_updates(&mut stream_rx, &dispatcher, test_context());

        let envelopes = drain_action_queue(&mut action_rx);
        assert_eq!(envelopes.len(), 1);
        assert!(matches!(
            &envelopes[0].action,
            AppAction::StreamToolResult { call_id, payload, stream_id: 2 }
                if call_id.as_deref() == Some("call_7") && payload == &json!({"count": 3})
        ));
    }
}
