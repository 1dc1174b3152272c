//! Shared constructors for unit tests.

use crate::core::app::{App, SessionContext};
use crate::core::message::{Message, MessageId, Role};
use crate::utils::logging::LoggingState;

/// An [`App`] wired to a dummy endpoint, with logging disabled. Nothing in it
/// performs network traffic unless a test spawns a stream itself.
pub fn create_test_app() -> App {
    let logging = LoggingState::new(None).expect("logging without a file cannot fail");
    let session = SessionContext::new(
        reqwest::Client::new(),
        "test-model".to_string(),
        "test-key".to_string(),
        "http://localhost:0/v1".to_string(),
        logging,
    );
    App::new(session)
}

pub fn create_test_message(id: MessageId, role: Role, content: &str) -> Message {
    Message::new(id, role, content)
}
