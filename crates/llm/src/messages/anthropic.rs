//! Wire types for the downstream Anthropic Messages API.
//!
//! This is the only protocol surface the gateway exposes to clients
//! (`POST /v1/messages`). Shapes follow the
//! [Anthropic API Reference](https://docs.anthropic.com/en/api/messages).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/messages`.
///
/// Mirrors the [Anthropic Messages API](https://docs.anthropic.com/en/api/messages)
/// request shape; `transform::request` converts this into the upstream
/// OpenAI-compatible `OpenAIRequest` (spec §4.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicRequest {
    /// The model to route to. Passed through to the upstream request
    /// unchanged; the gateway does not validate model names itself.
    pub model: String,

    /// The conversation so far. Alternates "user"/"assistant" roles; each
    /// message carries either a plain string or an array of content blocks.
    pub messages: Vec<Message>,

    /// System prompt, as a plain string or an array of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Maximum number of tokens to generate.
    ///
    /// Optional: when absent, `max_completion_tokens` is omitted from the
    /// upstream request entirely rather than defaulted (spec §4.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Controls randomness in the response. Range 0.0-1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter. Range 0.0-1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Sequences that cause the model to stop generating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools available for the model to call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Controls whether/how the model must use a tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Opaque caller metadata; values are coerced to strings before being
    /// forwarded upstream (spec §4.1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

/// `system` may be a plain string or an array of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content may be a plain string or an array of content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single block of message content.
///
/// Anthropic content is always an array of typed blocks; `MessageContent`
/// handles the plain-string shorthand form above this type.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text. `citations` is carried through verbatim and always
    /// serializes, explicit `null` included, never omitted.
    Text {
        text: String,
        #[serde(default)]
        citations: Option<Value>,
    },
    /// An image, either inlined as base64 or referenced by URL.
    Image { source: ImageSource },
    /// A document attachment (PDF, plain text, or nested content blocks).
    Document {
        source: DocumentSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// A model-issued tool call. `input` is the tool's arguments object.
    ToolUse { id: String, name: String, input: Value },
    /// The result of a previously issued tool call, sent back on the next
    /// user turn.
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Extended-thinking output. `signature` authenticates the thinking
    /// block when echoed back on a subsequent request; not forwarded
    /// upstream on the request side (`transform::request` drops it).
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolResultBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentSource {
    Base64 { media_type: String, data: String },
    Text { media_type: String, data: String },
    Content { content: Vec<ContentBlock> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Tool {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    None,
}

/// Response body for a non-streaming `POST /v1/messages` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::Refusal => "refusal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_tool_use: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            service_tier: Some("standard".to_string()),
            ..Default::default()
        }
    }
}

/// Error envelope returned for non-streaming failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_type: "error".to_string(),
            error: ErrorBody {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// SSE event types emitted on the downstream stream, per spec §4.3.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: StreamMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: u32, content_block: ContentBlock },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: ContentDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDelta, usage: Usage },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

impl StreamEvent {
    /// SSE event name used in the `event:` line.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamMessageStart {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_system_string() {
        let v: AnthropicRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "max_tokens": 100,
            "system": "be nice",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        assert!(matches!(v.system, Some(SystemPrompt::Text(s)) if s == "be nice"));
    }

    #[test]
    fn deserialize_system_blocks() {
        let v: AnthropicRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "max_tokens": 100,
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "messages": [],
        }))
        .unwrap();
        let Some(SystemPrompt::Blocks(blocks)) = v.system else {
            unreachable!("expected blocks")
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn deserialize_tool_result_string_content() {
        let v: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "abc",
            "content": "ok",
        }))
        .unwrap();
        assert!(matches!(v, ContentBlock::ToolResult { content: ToolResultContent::Text(s), .. } if s == "ok"));
    }

    #[test]
    fn serialize_message_start_event_nests_under_message_key() {
        let event = StreamEvent::MessageStart {
            message: StreamMessageStart {
                id: "msg_1".into(),
                message_type: "message".into(),
                role: Role::Assistant,
                content: vec![],
                model: "gpt-4o".into(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::new(0, 0),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_start");
        assert_eq!(json["message"]["id"], "msg_1");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn tool_choice_none_has_no_fields() {
        let json = serde_json::to_value(ToolChoice::None).unwrap();
        assert_eq!(json, json!({"type": "none"}));
    }

    #[test]
    fn text_block_serializes_citations_as_explicit_null() {
        let block = ContentBlock::Text {
            text: "hello".into(),
            citations: None,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json, json!({"type": "text", "text": "hello", "citations": null}));
    }
}
