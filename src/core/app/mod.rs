pub mod actions;
pub mod conversation;
pub mod session;
pub mod ui_state;

use tokio_util::sync::CancellationToken;

use crate::api::ChatMessage;
use crate::core::chat_stream::StreamParams;

pub use conversation::ConversationController;
pub use session::SessionContext;
pub use ui_state::UiState;

/// Top-level application state, split into the connection side and the
/// presentation side. Controllers borrow both halves for the duration of one
/// state change.
pub struct App {
    pub session: SessionContext,
    pub ui: UiState,
}

impl App {
    pub fn new(session: SessionContext) -> Self {
        Self {
            session,
            ui: UiState::new(),
        }
    }

    pub fn conversation(&mut self) -> ConversationController<'_> {
        ConversationController::new(&mut self.session, &mut self.ui)
    }

    /// Stream updates carry the id of the stream that produced them; anything
    /// not from the current stream is stale and gets dropped.
    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.session.current_stream_id == stream_id
    }

    pub fn build_stream_params(
        &self,
        api_messages: Vec<ChatMessage>,
        cancel_token: CancellationToken,
        stream_id: u64,
    ) -> StreamParams {
        StreamParams {
            client: self.session.client.clone(),
            base_url: self.session.base_url.clone(),
            api_key: self.session.api_key.clone(),
            model: self.session.model.clone(),
            api_messages,
            cancel_token,
            stream_id,
        }
    }

    pub fn request_exit(&mut self) {
        self.conversation().cancel_current_stream();
        self.ui.exit_requested = true;
    }
}
