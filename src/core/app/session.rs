use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::utils::logging::LoggingState;

/// A tool call still being assembled from streamed fragments.
///
/// Providers send tool calls in pieces keyed by a wire index; the id and name
/// usually arrive on the first fragment and the argument string grows across
/// later ones. `slot` remembers where the invocation landed in the assistant
/// message so later fragments update in place.
#[derive(Debug, Clone, Default)]
pub struct PendingToolCall {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
    pub slot: Option<usize>,
}

/// Connection-side state: API target, HTTP client, transcript logging, and
/// bookkeeping for the stream currently in flight.
pub struct SessionContext {
    pub client: reqwest::Client,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub logging: LoggingState,
    pub stream_cancel_token: Option<CancellationToken>,
    /// Monotonic id used to ignore updates from superseded streams.
    pub current_stream_id: u64,
    pub pending_tool_calls: HashMap<u32, PendingToolCall>,
}

impl SessionContext {
    pub fn new(
        client: reqwest::Client,
        model: String,
        api_key: String,
        base_url: String,
        logging: LoggingState,
    ) -> Self {
        Self {
            client,
            model,
            api_key,
            base_url,
            logging,
            stream_cancel_token: None,
            current_stream_id: 0,
            pending_tool_calls: HashMap::new(),
        }
    }
}
