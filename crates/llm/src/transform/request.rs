//! Converts an [`AnthropicRequest`] into the [`OpenAIRequest`] body sent to
//! the upstream chat-completions endpoint (spec §4.1, §4.1.1).

use base64::Engine as _;
use serde_json::{Map, Value};

use crate::messages::{anthropic, openai};

pub(crate) fn transform(req: anthropic::AnthropicRequest) -> openai::OpenAIRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system_content) = system_message_content(req.system) {
        messages.push(openai::ChatMessage {
            role: openai::ChatRole::System,
            content: Some(Value::String(system_content)),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in req.messages {
        messages.extend(convert_message(message));
    }

    let tools = req.tools.map(|tools| tools.into_iter().map(convert_tool).collect());

    let (tool_choice, parallel_tool_calls) = match req.tool_choice {
        Some(choice) => convert_tool_choice(choice),
        None => (None, None),
    };

    openai::OpenAIRequest {
        model: req.model,
        messages,
        max_completion_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences,
        stream: req.stream.unwrap_or(false),
        tools,
        tool_choice,
        parallel_tool_calls,
        metadata: req.metadata.map(convert_metadata),
    }
}

/// `system` as either a plain string, or text blocks concatenated with no
/// separator (spec §4.1).
fn system_message_content(system: Option<anthropic::SystemPrompt>) -> Option<String> {
    match system? {
        anthropic::SystemPrompt::Text(text) => Some(text),
        anthropic::SystemPrompt::Blocks(blocks) => {
            let joined: String = blocks.into_iter().map(|b| b.text).collect();
            if joined.is_empty() { None } else { Some(joined) }
        }
    }
}

fn convert_tool(tool: anthropic::ToolDef) -> openai::Tool {
    openai::Tool {
        tool_type: openai::ToolCallType::Function,
        function: openai::FunctionDefinition {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        },
    }
}

fn convert_tool_choice(choice: anthropic::ToolChoice) -> (Option<openai::ToolChoice>, Option<bool>) {
    match choice {
        anthropic::ToolChoice::Auto { disable_parallel_tool_use } => (
            Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto)),
            parallel_flag(disable_parallel_tool_use),
        ),
        anthropic::ToolChoice::Any { disable_parallel_tool_use } => (
            Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::Required)),
            parallel_flag(disable_parallel_tool_use),
        ),
        anthropic::ToolChoice::Tool {
            name,
            disable_parallel_tool_use,
        } => (
            Some(openai::ToolChoice::Specific {
                tool_type: openai::ToolCallType::Function,
                function: openai::ToolChoiceFunction { name },
            }),
            parallel_flag(disable_parallel_tool_use),
        ),
        anthropic::ToolChoice::None => (Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::None)), None),
    }
}

fn parallel_flag(disable_parallel_tool_use: Option<bool>) -> Option<bool> {
    // Only emit parallel_tool_calls when the caller explicitly disabled it.
    disable_parallel_tool_use.filter(|disabled| *disabled).map(|_| false)
}

fn convert_metadata(metadata: Map<String, Value>) -> Map<String, Value> {
    metadata
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, Value::String(s))),
            other => Some((key, Value::String(serde_json::to_string(&other).unwrap_or_default()))),
        })
        .collect()
}

/// A message yields zero or more OpenAI messages (spec §4.1.1).
fn convert_message(message: anthropic::Message) -> Vec<openai::ChatMessage> {
    let role = message.role;

    let blocks = match message.content {
        anthropic::MessageContent::Text(text) => {
            let openai_role = match role {
                anthropic::Role::User => openai::ChatRole::User,
                anthropic::Role::Assistant => openai::ChatRole::Assistant,
            };
            return vec![openai::ChatMessage {
                role: openai_role,
                content: Some(Value::String(text)),
                tool_calls: None,
                tool_call_id: None,
            }];
        }
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut text_parts = String::new();
    let mut content_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text, .. } => {
                text_parts.push_str(&text);
                content_parts.push(serde_json::json!({ "type": "text", "text": text }));
            }
            anthropic::ContentBlock::Image { source } => {
                content_parts.push(image_part(source));
            }
            anthropic::ContentBlock::Document { source, title } => {
                content_parts.push(document_part(source, title));
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    tool_type: openai::ToolCallType::Function,
                    function: openai::FunctionCall {
                        name,
                        arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            anthropic::ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                tool_results.push((tool_use_id, content));
            }
            anthropic::ContentBlock::Thinking { .. } => {
                log::debug!("dropping thinking block from outbound request (input-side thinking is not forwarded)");
            }
        }
    }

    if !tool_results.is_empty() {
        return tool_results
            .into_iter()
            .map(|(tool_use_id, content)| openai::ChatMessage {
                role: openai::ChatRole::Tool,
                content: Some(tool_result_content(content)),
                tool_calls: None,
                tool_call_id: Some(tool_use_id),
            })
            .collect();
    }

    match role {
        anthropic::Role::Assistant => vec![openai::ChatMessage {
            role: openai::ChatRole::Assistant,
            content: if text_parts.is_empty() {
                None
            } else {
                Some(Value::String(text_parts))
            },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }],
        anthropic::Role::User => {
            if content_parts.is_empty() {
                vec![]
            } else {
                vec![openai::ChatMessage {
                    role: openai::ChatRole::User,
                    content: Some(Value::Array(content_parts)),
                    tool_calls: None,
                    tool_call_id: None,
                }]
            }
        }
    }
}

fn image_part(source: anthropic::ImageSource) -> Value {
    let url = match source {
        anthropic::ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        anthropic::ImageSource::Url { url } => url,
    };
    serde_json::json!({ "type": "image_url", "image_url": { "url": url } })
}

fn document_part(source: anthropic::DocumentSource, title: Option<String>) -> Value {
    let file_data = match source {
        anthropic::DocumentSource::Base64 { data, .. } => data,
        anthropic::DocumentSource::Text { data, .. } => base64::engine::general_purpose::STANDARD.encode(data),
        anthropic::DocumentSource::Content { content } => {
            let text: String = content
                .into_iter()
                .filter_map(|block| match block {
                    anthropic::ContentBlock::Text { text, .. } => Some(text),
                    _ => None,
                })
                .collect();
            base64::engine::general_purpose::STANDARD.encode(text)
        }
    };

    let mut file = serde_json::json!({ "file_data": file_data });
    if let Some(title) = title {
        file["filename"] = Value::String(title);
    }
    serde_json::json!({ "type": "file", "file": file })
}

fn tool_result_content(content: anthropic::ToolResultContent) -> Value {
    match content {
        anthropic::ToolResultContent::Text(text) => Value::String(text),
        anthropic::ToolResultContent::Blocks(blocks) => Value::Array(
            blocks
                .into_iter()
                .map(|block| serde_json::json!({ "type": "text", "text": block.text }))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: Vec<anthropic::Message>) -> anthropic::AnthropicRequest {
        anthropic::AnthropicRequest {
            model: "gpt-4o".to_string(),
            messages,
            system: None,
            max_tokens: Some(100),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            metadata: None,
        }
    }

    #[test]
    fn max_tokens_becomes_max_completion_tokens() {
        let out = transform(request(vec![]));
        assert_eq!(out.max_completion_tokens, Some(100));
    }

    #[test]
    fn absent_max_tokens_omits_max_completion_tokens() {
        let mut req = request(vec![]);
        req.max_tokens = None;
        let out = transform(req);
        assert_eq!(out.max_completion_tokens, None);
    }

    #[test]
    fn system_array_concatenates_without_separator() {
        let mut req = request(vec![]);
        req.system = Some(anthropic::SystemPrompt::Blocks(vec![
            anthropic::SystemBlock {
                block_type: "text".into(),
                text: "foo".into(),
            },
            anthropic::SystemBlock {
                block_type: "text".into(),
                text: "bar".into(),
            },
        ]));
        let out = transform(req);
        assert_eq!(out.messages[0].content, Some(Value::String("foobar".to_string())));
    }

    #[test]
    fn tool_result_routes_to_tool_message_and_drops_siblings() {
        let message = anthropic::Message {
            role: anthropic::Role::User,
            content: anthropic::MessageContent::Blocks(vec![
                anthropic::ContentBlock::Text {
                    text: "ignored".into(),
                    citations: None,
                },
                anthropic::ContentBlock::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: anthropic::ToolResultContent::Text("42".into()),
                    is_error: None,
                },
            ]),
        };
        let out = transform(request(vec![message]));
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(out.messages[0].role, openai::ChatRole::Tool));
        assert_eq!(out.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out.messages[0].content, Some(Value::String("42".into())));
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let message = anthropic::Message {
            role: anthropic::Role::Assistant,
            content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: json!({"city": "SF"}),
            }]),
        };
        let out = transform(request(vec![message]));
        assert_eq!(out.messages.len(), 1);
        let calls = out.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
    }

    #[test]
    fn disable_parallel_tool_use_emits_false_flag() {
        let mut req = request(vec![]);
        req.tool_choice = Some(anthropic::ToolChoice::Auto {
            disable_parallel_tool_use: Some(true),
        });
        let out = transform(req);
        assert_eq!(out.parallel_tool_calls, Some(false));
    }

    #[test]
    fn metadata_nulls_are_dropped_and_values_coerced_to_strings() {
        let mut req = request(vec![]);
        let mut meta = Map::new();
        meta.insert("user_id".into(), Value::String("u1".into()));
        meta.insert("count".into(), json!(3));
        meta.insert("dropped".into(), Value::Null);
        req.metadata = Some(meta);
        let out = transform(req);
        let meta = out.metadata.unwrap();
        assert_eq!(meta.get("user_id"), Some(&Value::String("u1".into())));
        assert_eq!(meta.get("count"), Some(&Value::String("3".into())));
        assert!(!meta.contains_key("dropped"));
    }
}
