//! Translates upstream OpenAI streaming chunks into Anthropic SSE events,
//! maintaining [`StreamState`] across calls (spec §4.3).
//!
//! One upstream chunk can produce zero, one, or several downstream events —
//! e.g. closing a thinking block, opening a text block and emitting its
//! first delta is three events from one chunk. `translate` is the single
//! entry point the dispatch loop calls per reframed upstream data line.

use crate::{
    messages::{anthropic, openai},
    stream::state::{StreamState, ToolBlock},
    transform::response::map_finish_reason,
};

pub(crate) fn translate(state: &mut StreamState, chunk: openai::ChatCompletionChunk) -> Vec<anthropic::StreamEvent> {
    let mut events = Vec::new();

    if let Some(usage) = chunk.usage {
        state.update_usage(usage.prompt_tokens, usage.completion_tokens);
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return events;
    };

    if choice.delta.role.is_some() && !state.message_started {
        events.push(anthropic::StreamEvent::MessageStart {
            message: anthropic::StreamMessageStart {
                id: state.session_id.clone(),
                message_type: "message".to_string(),
                role: anthropic::Role::Assistant,
                content: vec![],
                model: state.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: anthropic::Usage::new(0, 0),
            },
        });
        state.message_started = true;
    }

    if let Some(text) = choice.delta.content {
        handle_text_delta(state, &mut events, text);
    } else if let Some(thinking) = choice.delta.reasoning_content {
        handle_thinking_delta(state, &mut events, thinking);
    } else if let Some(tool_calls) = choice.delta.tool_calls {
        handle_tool_call_deltas(state, &mut events, tool_calls);
    }

    if let Some(finish_reason) = choice.finish_reason {
        close_open_non_tool_block(state, &mut events);
        close_all_tool_blocks(state, &mut events);

        events.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDelta {
                stop_reason: Some(map_finish_reason(Some(&finish_reason))),
                stop_sequence: None,
            },
            // Preserved as specified: output_tokens is the sum of input+output, not output alone.
            usage: anthropic::Usage {
                input_tokens: 0,
                output_tokens: state.input_tokens + state.output_tokens,
                ..Default::default()
            },
        });
    }

    events
}

fn handle_text_delta(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>, text: String) {
    if state.thinking_block_started {
        close_thinking_block(state, events);
    }
    if !state.tool_blocks.is_empty() {
        close_all_tool_blocks(state, events);
    }
    if !state.text_block_started {
        events.push(anthropic::StreamEvent::ContentBlockStart {
            index: state.content_block_index,
            content_block: anthropic::ContentBlock::Text {
                text: String::new(),
                citations: None,
            },
        });
        state.text_block_started = true;
    }
    events.push(anthropic::StreamEvent::ContentBlockDelta {
        index: state.content_block_index,
        delta: anthropic::ContentDelta::TextDelta { text },
    });
}

fn handle_thinking_delta(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>, thinking: String) {
    if state.text_block_started {
        close_text_block(state, events);
    }
    if !state.tool_blocks.is_empty() {
        close_all_tool_blocks(state, events);
    }
    if !state.thinking_block_started {
        events.push(anthropic::StreamEvent::ContentBlockStart {
            index: state.content_block_index,
            content_block: anthropic::ContentBlock::Thinking {
                thinking: String::new(),
                signature: Some(String::new()),
            },
        });
        state.thinking_block_started = true;
    }
    events.push(anthropic::StreamEvent::ContentBlockDelta {
        index: state.content_block_index,
        delta: anthropic::ContentDelta::ThinkingDelta { thinking },
    });
}

fn handle_tool_call_deltas(
    state: &mut StreamState,
    events: &mut Vec<anthropic::StreamEvent>,
    tool_calls: Vec<openai::ChunkToolCall>,
) {
    if state.text_block_started {
        close_text_block(state, events);
    }
    if state.thinking_block_started {
        close_thinking_block(state, events);
    }

    for call in tool_calls {
        let index = call.index as u32;

        if let Some(id) = call.id {
            if state.tool_blocks.remove(&index).is_some() {
                events.push(anthropic::StreamEvent::ContentBlockStop { index });
            }
            let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
            state.tool_blocks.insert(index, ToolBlock { id: id.clone(), name: name.clone() });
            events.push(anthropic::StreamEvent::ContentBlockStart {
                index,
                content_block: anthropic::ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::json!({}),
                },
            });
        }

        if let Some(arguments) = call.function.and_then(|f| f.arguments) {
            events.push(anthropic::StreamEvent::ContentBlockDelta {
                index,
                delta: anthropic::ContentDelta::InputJsonDelta { partial_json: arguments },
            });
        }
    }
}

fn close_text_block(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>) {
    events.push(anthropic::StreamEvent::ContentBlockStop {
        index: state.content_block_index,
    });
    state.text_block_started = false;
    state.content_block_index += 1;
}

fn close_thinking_block(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>) {
    events.push(anthropic::StreamEvent::ContentBlockDelta {
        index: state.content_block_index,
        delta: anthropic::ContentDelta::SignatureDelta {
            signature: String::new(),
        },
    });
    events.push(anthropic::StreamEvent::ContentBlockStop {
        index: state.content_block_index,
    });
    state.thinking_block_started = false;
    state.content_block_index += 1;
}

fn close_all_tool_blocks(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>) {
    if state.tool_blocks.is_empty() {
        return;
    }
    let max_index = *state.tool_blocks.keys().max().unwrap();
    for index in std::mem::take(&mut state.tool_blocks).into_keys() {
        events.push(anthropic::StreamEvent::ContentBlockStop { index });
    }
    state.content_block_index = max_index + 1;
}

fn close_open_non_tool_block(state: &mut StreamState, events: &mut Vec<anthropic::StreamEvent>) {
    if state.text_block_started {
        close_text_block(state, events);
    } else if state.thinking_block_started {
        close_thinking_block(state, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::openai::{ChunkDelta, ChunkFunctionCall, ChunkToolCall};

    fn chunk(delta: ChunkDelta, finish_reason: Option<&str>) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk {
            choices: vec![openai::ChunkChoice {
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
        }
    }

    fn new_state() -> StreamState {
        StreamState::new("msg_1".to_string(), "gpt-4o".to_string())
    }

    #[test]
    fn text_only_stream_emits_expected_sequence() {
        let mut state = new_state();
        let mut events = translate(
            &mut state,
            chunk(
                ChunkDelta {
                    role: Some("assistant".into()),
                    ..Default::default()
                },
                None,
            ),
        );
        events.extend(translate(
            &mut state,
            chunk(
                ChunkDelta {
                    content: Some("Hi".into()),
                    ..Default::default()
                },
                None,
            ),
        ));
        events.extend(translate(&mut state, chunk(ChunkDelta::default(), Some("stop"))));

        assert!(matches!(events[0], anthropic::StreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], anthropic::StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], anthropic::StreamEvent::ContentBlockDelta { index: 0, .. }));
        assert!(matches!(events[3], anthropic::StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[4], anthropic::StreamEvent::MessageDelta { .. }));
    }

    #[test]
    fn thinking_then_text_closes_thinking_with_signature_delta_first() {
        let mut state = new_state();
        let mut events = translate(
            &mut state,
            chunk(
                ChunkDelta {
                    reasoning_content: Some("pondering".into()),
                    ..Default::default()
                },
                None,
            ),
        );
        events.extend(translate(
            &mut state,
            chunk(
                ChunkDelta {
                    content: Some("answer".into()),
                    ..Default::default()
                },
                None,
            ),
        ));

        assert!(matches!(events[0], anthropic::StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[1], anthropic::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: anthropic::ContentDelta::ThinkingDelta { .. }
        }));
        assert!(matches!(events[2], anthropic::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: anthropic::ContentDelta::SignatureDelta { .. }
        }));
        assert!(matches!(events[3], anthropic::StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[4], anthropic::StreamEvent::ContentBlockStart { index: 1, .. }));
    }

    #[test]
    fn parallel_tool_calls_use_upstream_indices_and_close_independently() {
        let mut state = new_state();
        let events = translate(
            &mut state,
            chunk(
                ChunkDelta {
                    tool_calls: Some(vec![
                        ChunkToolCall {
                            index: 0,
                            id: Some("call_0".into()),
                            function: Some(ChunkFunctionCall {
                                name: Some("a".into()),
                                arguments: Some(String::new()),
                            }),
                        },
                        ChunkToolCall {
                            index: 1,
                            id: Some("call_1".into()),
                            function: Some(ChunkFunctionCall {
                                name: Some("b".into()),
                                arguments: Some(String::new()),
                            }),
                        },
                    ]),
                    ..Default::default()
                },
                None,
            ),
        );
        assert!(matches!(events[0], anthropic::StreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], anthropic::StreamEvent::ContentBlockStart { index: 1, .. }));

        let mut events = translate(
            &mut state,
            chunk(
                ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index: 1,
                        id: None,
                        function: Some(ChunkFunctionCall {
                            name: None,
                            arguments: Some("{\"x\":1}".into()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            ),
        );
        events.extend(translate(&mut state, chunk(ChunkDelta::default(), Some("tool_calls"))));

        let stop_count = events
            .iter()
            .filter(|e| matches!(e, anthropic::StreamEvent::ContentBlockStop { .. }))
            .count();
        assert_eq!(stop_count, 2);
    }

    #[test]
    fn message_delta_output_tokens_sums_input_and_output_by_design() {
        let mut state = new_state();
        state.input_tokens = 10;
        state.output_tokens = 5;
        let events = translate(&mut state, chunk(ChunkDelta::default(), Some("stop")));
        let anthropic::StreamEvent::MessageDelta { usage, .. } = &events[0] else {
            unreachable!("expected message_delta")
        };
        assert_eq!(usage.output_tokens, 15);
        assert_eq!(usage.input_tokens, 0);
    }
}
