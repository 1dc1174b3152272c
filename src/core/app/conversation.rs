use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ChatMessage;
use crate::core::app::session::SessionContext;
use crate::core::app::ui_state::UiState;
use crate::core::chat_stream::{StreamError, ToolCallDelta};
use crate::core::message::{Message, MessageId, ToolInvocation};

/// Borrows the session and UI state together and applies conversation flow
/// to both: user turns, streamed deltas, stream lifecycle, and the scroll
/// position that tracks them.
pub struct ConversationController<'a> {
    session: &'a mut SessionContext,
    ui: &'a mut UiState,
}

impl<'a> ConversationController<'a> {
    pub fn new(session: &'a mut SessionContext, ui: &'a mut UiState) -> Self {
        Self { session, ui }
    }

    /// Append the user's turn to the transcript and return the message
    /// history to send upstream. Blank assistant records are skipped; the
    /// provider rejects empty content.
    pub fn add_user_message(&mut self, content: String) -> Vec<ChatMessage> {
        let _ = self
            .session
            .logging
            .log_message(&format!("You: {}", content));

        let id = self.ui.alloc_message_id();
        self.ui.push_message(Message::user(id, content));
        self.ui.auto_scroll = true;

        self.ui
            .messages
            .iter()
            .filter(|m| (m.is_user() || m.is_assistant()) && !m.content.is_empty())
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// The assistant record streamed into, created on the first delta that
    /// needs it. Until then the transcript still ends with the user's turn.
    fn ensure_streamed_into(&mut self) -> MessageId {
        if let Some(id) = self.ui.streamed_into {
            return id;
        }
        let id = self.ui.alloc_message_id();
        self.ui.push_message(Message::assistant(id));
        self.ui.streamed_into = Some(id);
        id
    }

    pub fn append_to_response(&mut self, content: &str, term_width: u16, term_height: u16) {
        if !self.ui.is_streaming {
            return;
        }
        let record_id = self.ensure_streamed_into();
        if let Some(message) = self.ui.message_mut(record_id) {
            message.content.push_str(content);
        }
        self.update_scroll_position(term_width, term_height);
    }

    /// Fold one tool-call fragment into the invocation it belongs to,
    /// creating the invocation on the fragment that announces it. Argument
    /// text accumulates across fragments and is surfaced as parsed JSON once
    /// it parses, raw text until then.
    pub fn apply_tool_call_delta(
        &mut self,
        delta: ToolCallDelta,
        term_width: u16,
        term_height: u16,
    ) {
        if !self.ui.is_streaming {
            return;
        }
        let record_id = self.ensure_streamed_into();

        let (call_id, name, arguments_raw, slot) = {
            let entry = self
                .session
                .pending_tool_calls
                .entry(delta.index)
                .or_default();
            if let Some(id) = delta.id {
                entry.id.get_or_insert(id);
            }
            if let Some(name) = delta.name {
                entry.name.get_or_insert(name);
            }
            if let Some(fragment) = delta.arguments {
                entry.arguments.push_str(&fragment);
            }
            (
                entry.id.clone(),
                entry.name.clone(),
                entry.arguments.clone(),
                entry.slot,
            )
        };

        let arguments = serde_json::from_str::<Value>(&arguments_raw)
            .unwrap_or_else(|_| Value::String(arguments_raw));

        let mut new_slot = slot;
        if let Some(message) = self.ui.message_mut(record_id) {
            match slot {
                Some(idx) => {
                    if let Some(invocation) = message.tool_invocations.get_mut(idx) {
                        if invocation.call_id.is_none() {
                            invocation.call_id = call_id;
                        }
                        if invocation.name.is_empty() {
                            if let Some(name) = name {
                                invocation.name = name;
                            }
                        }
                        invocation.arguments = arguments;
                    }
                }
                None => {
                    message.tool_invocations.push(ToolInvocation::pending(
                        call_id,
                        name.unwrap_or_default(),
                        arguments,
                    ));
                    new_slot = Some(message.tool_invocations.len() - 1);
                }
            }
        }
        if new_slot != slot {
            if let Some(entry) = self.session.pending_tool_calls.get_mut(&delta.index) {
                entry.slot = new_slot;
            }
        }

        self.update_scroll_position(term_width, term_height);
    }

    /// Attach a result payload to the invocation it answers. Correlated by
    /// call id when the provider sends one, otherwise by the oldest still
    /// pending invocation. A second result for the same call is dropped.
    pub fn resolve_tool_invocation(
        &mut self,
        call_id: Option<String>,
        payload: Value,
        term_width: u16,
        term_height: u16,
    ) {
        if !self.ui.is_streaming {
            return;
        }
        let Some(record_id) = self.ui.streamed_into else {
            debug!("dropping tool result with no assistant record in flight");
            return;
        };
        let Some(message) = self.ui.message_mut(record_id) else {
            return;
        };
        let target = match call_id.as_deref() {
            Some(cid) => message
                .tool_invocations
                .iter_mut()
                .find(|inv| inv.call_id.as_deref() == Some(cid)),
            None => message
                .tool_invocations
                .iter_mut()
                .find(|inv| inv.is_pending()),
        };
        let resolved = match target {
            Some(invocation) => invocation.resolve(payload),
            None => {
                debug!("dropping tool result with no matching invocation");
                false
            }
        };
        if resolved {
            self.update_scroll_position(term_width, term_height);
        }
    }

    /// Normal end of stream. Logs the finished reply and returns the app to
    /// idle. Safe to call twice; the second call finds nothing in flight.
    pub fn finalize_response(&mut self) {
        if !self.ui.is_streaming {
            return;
        }
        self.log_response_content();
        self.session.pending_tool_calls.clear();
        self.session.stream_cancel_token = None;
        self.ui.end_streaming();
    }

    /// Stop the in-flight stream, keeping whatever content already arrived.
    pub fn cancel_current_stream(&mut self) {
        if let Some(token) = self.session.stream_cancel_token.take() {
            token.cancel();
            debug!("cancelled stream {}", self.session.current_stream_id);
        }
        if self.ui.is_streaming {
            self.log_response_content();
            self.session.pending_tool_calls.clear();
            self.ui.end_streaming();
        }
    }

    pub fn start_new_stream(&mut self) -> (CancellationToken, u64) {
        self.cancel_current_stream();

        self.session.current_stream_id += 1;
        let stream_id = self.session.current_stream_id;
        let token = CancellationToken::new();
        self.session.stream_cancel_token = Some(token.clone());
        self.ui.begin_streaming();
        (token, stream_id)
    }

    /// One failure ends the stream: the notice carries the user-facing text,
    /// the transcript keeps exactly what had already arrived. Late errors
    /// from a stream that already ended are dropped, so a session surfaces
    /// a single notice per failure.
    pub fn handle_stream_error(&mut self, error: StreamError) {
        if !self.ui.is_streaming {
            return;
        }
        debug!(
            "stream {} failed: {}",
            self.session.current_stream_id, error.message
        );
        self.log_response_content();
        self.session.pending_tool_calls.clear();
        self.session.stream_cancel_token = None;
        self.ui.set_notice(error.notice());
        self.ui.end_streaming();
    }

    fn log_response_content(&mut self) {
        let Some(id) = self.ui.streamed_into else {
            return;
        };
        let content = self
            .ui
            .messages
            .iter()
            .rev()
            .find(|m| m.id == id)
            .map(|m| m.content.clone());
        if let Some(content) = content {
            if !content.is_empty() {
                let _ = self.session.logging.log_message(&content);
            }
        }
    }

    /// Transcript rows left after the input panel and the transcript borders.
    pub fn calculate_available_height(&self, term_height: u16) -> u16 {
        term_height
            .saturating_sub(crate::ui::renderer::INPUT_PANEL_HEIGHT)
            .saturating_sub(2)
    }

    /// Largest scroll offset for the current transcript at this terminal
    /// size; also the offset that shows the transcript bottom. Wrapping
    /// happens at the text width inside the transcript borders.
    pub fn max_scroll_offset(&mut self, term_width: u16, term_height: u16) -> u16 {
        let available = self.calculate_available_height(term_height);
        let text_width = term_width.saturating_sub(2);
        self.ui.calculate_max_scroll_offset(text_width, available)
    }

    /// While pinned, keep the view on the transcript bottom.
    pub fn update_scroll_position(&mut self, term_width: u16, term_height: u16) {
        if !self.ui.auto_scroll {
            return;
        }
        self.ui.scroll_offset = self.max_scroll_offset(term_width, term_height);
    }

    pub fn scroll_up_by(&mut self, lines: u16) {
        self.ui.auto_scroll = false;
        self.ui.scroll_offset = self.ui.scroll_offset.saturating_sub(lines);
    }

    /// Scrolling back down to the bottom re-pins the view.
    pub fn scroll_down_by(&mut self, lines: u16, term_width: u16, term_height: u16) {
        let max = self.max_scroll_offset(term_width, term_height);
        let next = self.ui.scroll_offset.saturating_add(lines).min(max);
        self.ui.scroll_offset = next;
        if next >= max {
            self.ui.auto_scroll = true;
        }
    }

    pub fn scroll_to_top(&mut self) {
        self.ui.auto_scroll = false;
        self.ui.scroll_offset = 0;
    }

    pub fn scroll_to_bottom(&mut self, term_width: u16, term_height: u16) {
        self.ui.auto_scroll = true;
        self.update_scroll_position(term_width, term_height);
    }
}
