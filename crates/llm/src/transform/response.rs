//! Converts a non-streaming OpenAI chat-completion response into an
//! [`AnthropicResponse`] (spec §4.2).

use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::DispatchError,
    messages::{anthropic, openai},
};

pub(crate) fn transform(
    response: openai::ChatCompletionResponse,
    model: &str,
) -> Result<anthropic::AnthropicResponse, DispatchError> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(DispatchError::ParseError);
    };

    let mut content = Vec::new();

    if let Some(text) = choice.message.content {
        content.push(anthropic::ContentBlock::Text { text, citations: None });
    }

    if let Some(thinking) = choice.message.reasoning_content {
        content.push(anthropic::ContentBlock::Thinking {
            thinking,
            signature: None,
        });
    }

    for call in choice.message.tool_calls {
        let input = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(value) => value,
            Err(_) => Value::String(call.function.arguments.clone()),
        };
        content.push(anthropic::ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    let stop_reason = map_finish_reason(choice.finish_reason.as_deref());

    let usage = response
        .usage
        .map(|u| anthropic::Usage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(anthropic::AnthropicResponse {
        id: response.id.unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple())),
        response_type: "message".to_string(),
        role: anthropic::Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    })
}

pub(crate) fn map_finish_reason(reason: Option<&str>) -> anthropic::StopReason {
    match reason {
        Some("stop") => anthropic::StopReason::EndTurn,
        Some("length") => anthropic::StopReason::MaxTokens,
        Some("tool_calls") => anthropic::StopReason::ToolUse,
        Some("function_call") => anthropic::StopReason::ToolUse,
        Some("content_filter") => anthropic::StopReason::Refusal,
        _ => anthropic::StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::openai::{ChatChoice, ChatResponseMessage, Usage};

    #[test]
    fn empty_choices_is_invalid_upstream_response() {
        let response = openai::ChatCompletionResponse {
            id: None,
            choices: vec![],
            usage: None,
        };
        assert!(matches!(transform(response, "gpt-4o"), Err(DispatchError::ParseError)));
    }

    #[test]
    fn content_order_is_text_then_thinking_then_tool_use() {
        let response = openai::ChatCompletionResponse {
            id: Some("chatcmpl_1".into()),
            choices: vec![ChatChoice {
                message: ChatResponseMessage {
                    content: Some("hi".into()),
                    reasoning_content: Some("pondering".into()),
                    tool_calls: vec![openai::ToolCall {
                        id: "call_1".into(),
                        tool_type: openai::ToolCallType::Function,
                        function: openai::FunctionCall {
                            name: "f".into(),
                            arguments: "{}".into(),
                        },
                    }],
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
            }),
        };
        let out = transform(response, "gpt-4o").unwrap();
        assert!(matches!(out.content[0], anthropic::ContentBlock::Text { .. }));
        assert!(matches!(out.content[1], anthropic::ContentBlock::Thinking { .. }));
        assert!(matches!(out.content[2], anthropic::ContentBlock::ToolUse { .. }));
        assert_eq!(out.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn unparseable_tool_arguments_fall_back_to_raw_string() {
        let response = openai::ChatCompletionResponse {
            id: Some("chatcmpl_1".into()),
            choices: vec![ChatChoice {
                message: ChatResponseMessage {
                    content: None,
                    reasoning_content: None,
                    tool_calls: vec![openai::ToolCall {
                        id: "call_1".into(),
                        tool_type: openai::ToolCallType::Function,
                        function: openai::FunctionCall {
                            name: "f".into(),
                            arguments: "not json".into(),
                        },
                    }],
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
        };
        let out = transform(response, "gpt-4o").unwrap();
        let anthropic::ContentBlock::ToolUse { input, .. } = &out.content[0] else {
            unreachable!("expected tool_use block")
        };
        assert_eq!(input, &Value::String("not json".into()));
    }
}
