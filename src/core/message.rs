use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identity for a transcript message. Allocated from a per-session
/// counter; never reused within a run.
pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle of a tool invocation attached to an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolInvocationState {
    /// The call has been announced; no result yet.
    CallPending,

    /// The provider delivered a result payload.
    ResultAvailable,
}

/// A structured record of the assistant requesting an external capability.
///
/// `result` is populated exactly when `state` is `ResultAvailable`; the
/// transition from `CallPending` happens at most once.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Provider-assigned call id, used to correlate a later result event.
    pub call_id: Option<String>,
    pub name: String,
    pub arguments: Value,
    pub state: ToolInvocationState,
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn pending(call_id: Option<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id,
            name: name.into(),
            arguments,
            state: ToolInvocationState::CallPending,
            result: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ToolInvocationState::CallPending
    }

    /// Attach the result payload. Returns false (and leaves the record
    /// untouched) if a result was already attached.
    pub fn resolve(&mut self, payload: Value) -> bool {
        if self.state == ToolInvocationState::ResultAvailable {
            return false;
        }
        self.state = ToolInvocationState::ResultAvailable;
        self.result = Some(payload);
        true
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content)
    }

    /// A fresh assistant record to stream into. Starts with no content; the
    /// streaming layer fills it delta by delta.
    pub fn assistant(id: MessageId) -> Self {
        Self::new(id, Role::Assistant, String::new())
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// True when there is nothing to show yet: no content and no tool
    /// invocations. The renderer substitutes a pending indicator for such a
    /// message while it is being streamed into.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && self.tool_invocations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_strings_round_trip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("tool").is_err());
        assert!(Role::try_from("").is_err());
    }

    #[test]
    fn assistant_records_start_blank() {
        let msg = Message::assistant(7);
        assert_eq!(msg.id, 7);
        assert!(msg.is_assistant());
        assert!(msg.is_blank());
    }

    #[test]
    fn tool_invocation_resolves_at_most_once() {
        let mut invocation =
            ToolInvocation::pending(Some("call_1".into()), "lookup", json!({"q": "strawberry"}));
        assert!(invocation.is_pending());
        assert!(invocation.result.is_none());

        assert!(invocation.resolve(json!({"count": 3})));
        assert_eq!(invocation.state, ToolInvocationState::ResultAvailable);
        assert_eq!(invocation.result, Some(json!({"count": 3})));

        // A repeat result for the same call is ignored.
        assert!(!invocation.resolve(json!({"count": 99})));
        assert_eq!(invocation.result, Some(json!({"count": 3})));
    }

    #[test]
    fn result_absent_while_pending() {
        let invocation = ToolInvocation::pending(None, "search", json!({}));
        assert_eq!(invocation.state, ToolInvocationState::CallPending);
        assert!(invocation.result.is_none());
    }
}
