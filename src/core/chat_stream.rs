use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, ChatResponse};

/// Why a streaming session ended early. All kinds are handled identically by
/// the application: one notice, transcript kept as-is, no retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamErrorKind {
    RateLimited,
    Transport,
    Provider,
}

#[derive(Clone, Debug)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The one-line text shown in the notice toast.
    pub fn notice(&self) -> String {
        match self.kind {
            StreamErrorKind::RateLimited => {
                "You've been rate limited, please try again later!".to_string()
            }
            StreamErrorKind::Transport => format!("Network error: {}", self.message),
            StreamErrorKind::Provider => format!("API error: {}", self.message),
        }
    }
}

/// One incremental fragment of a tool call. Providers split a single call
/// across several deltas, so id/name arrive once and argument text arrives in
/// pieces; `index` identifies the call being extended.
#[derive(Clone, Debug)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    ToolCall(ToolCallDelta),
    ToolResult {
        call_id: Option<String>,
        payload: serde_json::Value,
    },
    Error(StreamError),
    End,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(
    payload: &str,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) -> bool {
    if payload == "[DONE]" {
        let _ = tx.send((StreamMessage::End, stream_id));
        return true;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            if let Some(choice) = response.choices.first() {
                if let Some(content) = &choice.delta.content {
                    let _ = tx.send((StreamMessage::Chunk(content.clone()), stream_id));
                }
                if let Some(tool_calls) = &choice.delta.tool_calls {
                    for call in tool_calls {
                        let delta = ToolCallDelta {
                            index: call.index.unwrap_or(0),
                            id: call.id.clone(),
                            name: call
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone()),
                            arguments: call
                                .function
                                .as_ref()
                                .and_then(|f| f.arguments.clone()),
                        };
                        let _ = tx.send((StreamMessage::ToolCall(delta), stream_id));
                    }
                }
                if let Some(result) = &choice.delta.tool_result {
                    let _ = tx.send((
                        StreamMessage::ToolResult {
                            call_id: result.tool_call_id.clone(),
                            payload: result.content.clone(),
                        },
                        stream_id,
                    ));
                }
            }
            false
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }

            debug!(stream_id, body = %format_api_error(payload), "in-stream error payload");
            let summary = serde_json::from_str::<serde_json::Value>(payload)
                .ok()
                .and_then(|value| extract_error_summary(&value))
                .unwrap_or_else(|| "provider returned an error".to_string());
            let error = StreamError::new(StreamErrorKind::Provider, summary);
            let _ = tx.send((StreamMessage::Error(error), stream_id));
            let _ = tx.send((StreamMessage::End, stream_id));
            true
        }
    }
}

fn process_sse_line(
    line: &str,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
    stream_id: u64,
) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx, stream_id))
        .unwrap_or(false)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Pretty-print an error body for the debug log. JSON bodies get a fenced
/// block plus an extracted one-line summary when one is present.
fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

/// Classify a non-success HTTP response into the error taxonomy.
fn classify_http_failure(status: u16, body: &str) -> StreamError {
    if status == 429 {
        let summary = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| extract_error_summary(&value))
            .unwrap_or_else(|| "rate limited".to_string());
        return StreamError::new(StreamErrorKind::RateLimited, summary);
    }

    let summary = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| format!("request failed with status {status}"));
    StreamError::new(StreamErrorKind::Provider, summary)
}

fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub api_messages: Vec<ChatMessage>,
    pub cancel_token: tokio_util::sync::CancellationToken,
    pub stream_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx_clone = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                base_url,
                api_key,
                model,
                api_messages,
                cancel_token,
                stream_id,
            } = params;

            debug!(stream_id, %model, "starting completion stream");

            let request = ChatRequest {
                model,
                messages: api_messages,
                stream: true,
            };

            tokio::select! {
                _ = async {
                    let send_result = client
                        .post(chat_completions_url(&base_url))
                        .header("Authorization", format!("Bearer {api_key}"))
                        .header("Content-Type", "application/json")
                        .json(&request)
                        .send()
                        .await;

                    match send_result {
                        Ok(response) => {
                            let status = response.status();
                            if !status.is_success() {
                                let body = response
                                    .text()
                                    .await
                                    .unwrap_or_else(|_| "<no body>".to_string());
                                debug!(stream_id, status = status.as_u16(), body = %format_api_error(&body), "completion request failed");
                                let error = classify_http_failure(status.as_u16(), &body);
                                let _ = tx_clone.send((StreamMessage::Error(error), stream_id));
                                let _ = tx_clone.send((StreamMessage::End, stream_id));
                                return;
                            }

                            let mut stream = response.bytes_stream();
                            let mut buffer: Vec<u8> = Vec::new();

                            while let Some(chunk) = stream.next().await {
                                if cancel_token.is_cancelled() {
                                    return;
                                }

                                match chunk {
                                    Ok(chunk_bytes) => {
                                        buffer.extend_from_slice(&chunk_bytes);

                                        while let Some(newline_pos) = memchr(b'\n', &buffer) {
                                            let line_str = match std::str::from_utf8(&buffer[..newline_pos]) {
                                                Ok(s) => s.trim().to_string(),
                                                Err(_) => {
                                                    buffer.drain(..=newline_pos);
                                                    continue;
                                                }
                                            };

                                            let should_end = process_sse_line(
                                                &line_str,
                                                &tx_clone,
                                                stream_id,
                                            );
                                            buffer.drain(..=newline_pos);
                                            if should_end {
                                                return;
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        let error = StreamError::new(
                                            StreamErrorKind::Transport,
                                            e.to_string(),
                                        );
                                        let _ = tx_clone.send((StreamMessage::Error(error), stream_id));
                                        let _ = tx_clone.send((StreamMessage::End, stream_id));
                                        return;
                                    }
                                }
                            }

                            let _ = tx_clone.send((StreamMessage::End, stream_id));
                        }
                        Err(e) => {
                            let error = StreamError::new(StreamErrorKind::Transport, e.to_string());
                            let _ = tx_clone.send((StreamMessage::Error(error), stream_id));
                            let _ = tx_clone.send((StreamMessage::End, stream_id));
                        }
                    }
                } => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "completion stream cancelled");
                }
            }
        });
    }

}
