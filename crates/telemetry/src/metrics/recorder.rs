//! Request-scoped gen_ai metrics recorder.
//!
//! Accumulates attributes and token counts for a single dispatch and records
//! the operation duration histogram on drop, so the caller cannot forget to
//! record on an early return or a streaming response that ends mid-task.

use std::time::Instant;

use opentelemetry::{Key, KeyValue, Value, metrics::Histogram};

use crate::attributes::GEN_AI_TOKEN_TYPE;
use crate::metrics::{GEN_AI_CLIENT_OPERATION_DURATION, GEN_AI_CLIENT_TOKEN_USAGE};

pub struct Recorder {
    start: Instant,
    duration_histogram: Histogram<f64>,
    token_usage_histogram: Histogram<u64>,
    attributes: Vec<KeyValue>,
    input_tokens: u64,
    output_tokens: u64,
}

impl Recorder {
    pub fn new() -> Self {
        let meter = super::meter();

        Self {
            start: Instant::now(),
            duration_histogram: meter.f64_histogram(GEN_AI_CLIENT_OPERATION_DURATION).with_unit("s").build(),
            token_usage_histogram: meter.u64_histogram(GEN_AI_CLIENT_TOKEN_USAGE).build(),
            attributes: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn push_attribute<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        self.attributes.push(KeyValue::new(key, value));
    }

    pub fn record_tokens(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens += input_tokens as u64;
        self.output_tokens += output_tokens as u64;
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.duration_histogram
            .record(self.start.elapsed().as_secs_f64(), &self.attributes);

        if self.input_tokens > 0 {
            self.push_attribute(GEN_AI_TOKEN_TYPE, "input");
            self.token_usage_histogram.record(self.input_tokens, &self.attributes);
            self.attributes.pop();
        }
        if self.output_tokens > 0 {
            self.push_attribute(GEN_AI_TOKEN_TYPE, "output");
            self.token_usage_histogram.record(self.output_tokens, &self.attributes);
            self.attributes.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_attribute_and_record_tokens_do_not_panic() {
        let mut recorder = Recorder::new();
        recorder.push_attribute("gen_ai.operation.name", "chat");
        recorder.record_tokens(10, 5);
    }
}
