//! Action dispatch: every mutation of [`App`] state is described as an
//! [`AppAction`], queued through an [`AppActionDispatcher`], and applied in
//! arrival order on the event loop. Side effects that must run outside the
//! borrow (spawning a request) come back to the loop as [`AppCommand`]s.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::app::App;
use crate::core::chat_stream::{StreamError, StreamParams, ToolCallDelta};

#[derive(Debug, Clone)]
pub enum AppAction {
    /// The user pressed Enter on the input line. Rejected without side
    /// effects while a stream is active or when the text is blank.
    SubmitMessage { message: String },
    AppendResponseChunk { content: String, stream_id: u64 },
    StreamToolCallDelta { delta: ToolCallDelta, stream_id: u64 },
    StreamToolResult {
        call_id: Option<String>,
        payload: Value,
        stream_id: u64,
    },
    StreamErrored { error: StreamError, stream_id: u64 },
    StreamCompleted { stream_id: u64 },
}

/// Terminal geometry captured when the action was queued, so scroll math
/// uses the dimensions the user was looking at.
#[derive(Debug, Clone, Copy)]
pub struct AppActionContext {
    pub term_width: u16,
    pub term_height: u16,
}

#[derive(Debug, Clone)]
pub struct AppActionEnvelope {
    pub action: AppAction,
    pub context: AppActionContext,
}

/// Work the event loop performs after an apply pass, outside the `&mut App`
/// borrow.
pub enum AppCommand {
    SpawnStream(StreamParams),
}

#[derive(Clone)]
pub struct AppActionDispatcher {
    tx: mpsc::UnboundedSender<AppActionEnvelope>,
}

impl AppActionDispatcher {
    pub fn new(tx: mpsc::UnboundedSender<AppActionEnvelope>) -> Self {
        Self { tx }
    }

    pub fn dispatch(&self, action: AppAction, context: AppActionContext) {
        self.dispatch_many(std::iter::once(action), context);
    }

    pub fn dispatch_many<I>(&self, actions: I, context: AppActionContext)
    where
        I: IntoIterator<Item = AppAction>,
    {
        for action in actions {
            let _ = self.tx.send(AppActionEnvelope { action, context });
        }
    }
}

pub fn apply_actions(app: &mut App, envelopes: Vec<AppActionEnvelope>) -> Vec<AppCommand> {
    let mut commands = Vec::new();
    for envelope in envelopes {
        apply_action(app, envelope, &mut commands);
    }
    commands
}

fn apply_action(app: &mut App, envelope: AppActionEnvelope, commands: &mut Vec<AppCommand>) {
    let AppActionEnvelope { action, context } = envelope;
    let AppActionContext {
        term_width,
        term_height,
    } = context;

    match action {
        AppAction::SubmitMessage { message } => {
            if let Some(command) = handle_submit(app, message, term_width, term_height) {
                commands.push(command);
            }
        }
        AppAction::AppendResponseChunk { content, stream_id } => {
            if !app.is_current_stream(stream_id) {
                return;
            }
            app.conversation()
                .append_to_response(&content, term_width, term_height);
        }
        AppAction::StreamToolCallDelta { delta, stream_id } => {
            if !app.is_current_stream(stream_id) {
                return;
            }
            app.conversation()
                .apply_tool_call_delta(delta, term_width, term_height);
        }
        AppAction::StreamToolResult {
            call_id,
            payload,
            stream_id,
        } => {
            if !app.is_current_stream(stream_id) {
                return;
            }
            app.conversation()
                .resolve_tool_invocation(call_id, payload, term_width, term_height);
        }
        AppAction::StreamErrored { error, stream_id } => {
            if !app.is_current_stream(stream_id) {
                return;
            }
            app.conversation().handle_stream_error(error);
        }
        AppAction::StreamCompleted { stream_id } => {
            if !app.is_current_stream(stream_id) {
                return;
            }
            app.conversation().finalize_response();
        }
    }
}

fn handle_submit(
    app: &mut App,
    message: String,
    term_width: u16,
    term_height: u16,
) -> Option<AppCommand> {
    // One stream at a time. The rejected submission leaves the input line
    // untouched so nothing the user typed is lost.
    if app.ui.is_streaming {
        return None;
    }
    if message.trim().is_empty() {
        return None;
    }

    app.ui.input.clear();
    let api_messages = app.conversation().add_user_message(message);
    app.conversation()
        .update_scroll_position(term_width, term_height);
    let (cancel_token, stream_id) = app.conversation().start_new_stream();
    Some(AppCommand::SpawnStream(app.build_stream_params(
        api_messages,
        cancel_token,
        stream_id,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::StreamErrorKind;
    use crate::utils::test_utils::create_test_app;

    fn env(action: AppAction) -> AppActionEnvelope {
        AppActionEnvelope {
            action,
            context: AppActionContext {
                term_width: 80,
                term_height: 24,
            },
        }
    }

    fn submit(text: &str) -> AppAction {
        AppAction::SubmitMessage {
            message: text.to_string(),
        }
    }

    #[test]
    fn submitting_while_idle_spawns_a_stream() {
        let mut app = create_test_app();
        app.ui.input = "hi".to_string();

        let commands = apply_actions(&mut app, vec![env(submit("hi"))]);

        assert_eq!(commands.len(), 1);
        let AppCommand::SpawnStream(params) = &commands[0];
        assert_eq!(params.model, "test-model");
        assert_eq!(params.stream_id, app.session.current_stream_id);
        assert_eq!(
            params.api_messages.last().map(|m| m.content.as_str()),
            Some("hi")
        );
        assert!(app.ui.is_streaming);
        assert!(app.ui.input.is_empty());
        assert_eq!(app.ui.messages.len(), 1);
    }

    #[test]
    fn blank_submissions_are_rejected() {
        let mut app = create_test_app();
        for text in ["", "   "] {
            let commands = apply_actions(&mut app, vec![env(submit(text))]);
            assert!(commands.is_empty());
        }
        assert!(app.ui.messages.is_empty());
        assert!(!app.ui.is_streaming);
    }

    #[test]
    fn submitting_during_a_stream_is_a_no_op() {
        let mut app = create_test_app();
        let commands = apply_actions(&mut app, vec![env(submit("first"))]);
        assert_eq!(commands.len(), 1);
        let stream_id = app.session.current_stream_id;

        app.ui.input = "again".to_string();
        let commands = apply_actions(&mut app, vec![env(submit("again"))]);

        assert!(commands.is_empty());
        assert_eq!(app.session.current_stream_id, stream_id);
        assert_eq!(app.ui.messages.len(), 1);
        // The rejected text stays in the input line.
        assert_eq!(app.ui.input, "again");
    }

    #[test]
    fn deltas_from_superseded_streams_are_dropped() {
        let mut app = create_test_app();
        apply_actions(&mut app, vec![env(submit("hi"))]);
        let current = app.session.current_stream_id;

        apply_actions(
            &mut app,
            vec![env(AppAction::AppendResponseChunk {
                content: "stale".to_string(),
                stream_id: current - 1,
            })],
        );
        assert_eq!(app.ui.messages.len(), 1);

        apply_actions(
            &mut app,
            vec![env(AppAction::AppendResponseChunk {
                content: "fresh".to_string(),
                stream_id: current,
            })],
        );
        assert_eq!(app.ui.messages.len(), 2);
        assert_eq!(app.ui.messages[1].content, "fresh");
    }

    #[test]
    fn late_deltas_after_completion_change_nothing() {
        let mut app = create_test_app();
        apply_actions(&mut app, vec![env(submit("hi"))]);
        let stream_id = app.session.current_stream_id;

        apply_actions(
            &mut app,
            vec![
                env(AppAction::AppendResponseChunk {
                    content: "done".to_string(),
                    stream_id,
                }),
                env(AppAction::StreamCompleted { stream_id }),
                env(AppAction::AppendResponseChunk {
                    content: " straggler".to_string(),
                    stream_id,
                }),
            ],
        );

        assert_eq!(app.ui.messages[1].content, "done");
        assert!(!app.ui.is_streaming);
    }

    #[test]
    fn a_full_question_and_answer_round_trip() {
        let mut app = create_test_app();
        apply_actions(
            &mut app,
            vec![env(submit("How many 'r's are in the word strawberry?"))],
        );
        let stream_id = app.session.current_stream_id;

        let chunks = ["There are ", "three ", "'r's in \"strawberry\"."];
        let mut envelopes: Vec<AppActionEnvelope> = chunks
            .iter()
            .map(|chunk| {
                env(AppAction::AppendResponseChunk {
                    content: chunk.to_string(),
                    stream_id,
                })
            })
            .collect();
        envelopes.push(env(AppAction::StreamCompleted { stream_id }));
        apply_actions(&mut app, envelopes);

        assert_eq!(app.ui.messages.len(), 2);
        assert_eq!(
            app.ui.messages[0].content,
            "How many 'r's are in the word strawberry?"
        );
        assert_eq!(
            app.ui.messages[1].content,
            "There are three 'r's in \"strawberry\"."
        );
        assert!(!app.ui.is_streaming);
        assert!(app.ui.active_notice().is_none());
    }

    #[test]
    fn stream_errors_surface_exactly_one_notice() {
        let mut app = create_test_app();
        apply_actions(&mut app, vec![env(submit("hi"))]);
        let stream_id = app.session.current_stream_id;

        apply_actions(
            &mut app,
            vec![
                env(AppAction::StreamErrored {
                    error: StreamError::new(StreamErrorKind::RateLimited, "429"),
                    stream_id,
                }),
                env(AppAction::StreamCompleted { stream_id }),
            ],
        );

        assert_eq!(app.ui.messages.len(), 1);
        assert_eq!(
            app.ui.active_notice(),
            Some("You've been rate limited, please try again later!")
        );
        assert!(!app.ui.is_streaming);
    }

    #[tokio::test]
    async fn dispatched_actions_arrive_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = AppActionDispatcher::new(tx);
        let context = AppActionContext {
            term_width: 80,
            term_height: 24,
        };

        dispatcher.dispatch_many(
            (0..3).map(|i| AppAction::AppendResponseChunk {
                content: i.to_string(),
                stream_id: 1,
            }),
            context,
        );

        for expected in ["0", "1", "2"] {
            let envelope = rx.recv().await.expect("queued action");
            match envelope.action {
                AppAction::AppendResponseChunk { content, .. } => {
                    assert_eq!(content, expected)
                }
                other => panic!("unexpected action: {:?}", other),
            }
        }
    }
}
