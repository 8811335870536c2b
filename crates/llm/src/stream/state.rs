//! Per-session mutable state threaded through [`super::translator`] (spec §3, §9).
//!
//! Owned exclusively by the request task driving one streaming response;
//! never shared across requests or stored in a process-wide table (the spec
//! allows but does not require one, and a per-task owned value is simpler
//! while still satisfying "every entry owned by exactly one request task").

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) struct ToolBlock {
    pub id: String,
    pub name: String,
}

#[derive(Debug)]
pub(crate) struct StreamState {
    pub session_id: String,
    pub model: String,
    pub message_started: bool,
    pub text_block_started: bool,
    pub thinking_block_started: bool,
    pub tool_blocks: BTreeMap<u32, ToolBlock>,
    pub content_block_index: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl StreamState {
    pub fn new(session_id: String, model: String) -> Self {
        Self {
            session_id,
            model,
            message_started: false,
            text_block_started: false,
            thinking_block_started: false,
            tool_blocks: BTreeMap::new(),
            content_block_index: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn any_non_tool_block_open(&self) -> bool {
        self.text_block_started || self.thinking_block_started
    }

    pub fn update_usage(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        if prompt_tokens != 0 {
            self.input_tokens = prompt_tokens;
        }
        if completion_tokens != 0 {
            self.output_tokens = completion_tokens;
        }
    }
}
