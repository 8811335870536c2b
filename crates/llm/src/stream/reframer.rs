//! Reframes raw upstream SSE bytes into `data:` payloads (spec §4.5).
//!
//! Owns a tail buffer for partial frames split across reads; frame
//! boundaries are `\n\n`. Unparseable `data:` lines are the caller's
//! concern — this stage only extracts the raw payload string.

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct Reframer {
    buf: String,
}

impl Reframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in newly-received bytes (as UTF-8 text) and drain any complete
    /// frames. Remaining partial data stays buffered for the next call.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(boundary) = self.buf.find("\n\n") {
            let frame_text: String = self.buf.drain(..boundary + 2).collect();
            for line in frame_text.split('\n') {
                let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    frames.push(Frame::Done);
                } else if !data.is_empty() {
                    frames.push(Frame::Data(data.to_string()));
                }
            }
        }

        frames
    }
}

/// Best-effort side channel: some upstreams emit a terminal frame carrying
/// only a `usage` object after the final content delta. Extract it whenever
/// present, independent of whether the line otherwise parses as a chunk.
pub(crate) fn sniff_usage(data: &str) -> Option<(u32, u32)> {
    if !data.contains("\"usage\"") {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let usage = value.get("usage")?;
    let prompt = usage.get("prompt_tokens")?.as_u64()? as u32;
    let completion = usage.get("completion_tokens")?.as_u64()? as u32;
    Some((prompt, completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reframes_split_across_pushes() {
        let mut reframer = Reframer::new();
        assert!(reframer.push("data: {\"a\":1}\n").is_empty());
        let frames = reframer.push("\n");
        assert_eq!(frames, vec![Frame::Data("{\"a\":1}".to_string())]);
    }

    #[test]
    fn detects_done_sentinel() {
        let mut reframer = Reframer::new();
        let frames = reframer.push("data: [DONE]\n\n");
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn tolerates_multiple_frames_in_one_push() {
        let mut reframer = Reframer::new();
        let frames = reframer.push("data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn sniff_usage_extracts_terminal_usage_block() {
        let data = r#"{"usage":{"prompt_tokens":5,"completion_tokens":7}}"#;
        assert_eq!(sniff_usage(data), Some((5, 7)));
    }

    #[test]
    fn sniff_usage_ignores_lines_without_usage_key() {
        assert_eq!(sniff_usage(r#"{"choices":[]}"#), None);
    }
}
