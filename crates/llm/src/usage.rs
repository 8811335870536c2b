//! Usage recording (spec.md §6's `UsageRecorder` contract).

use async_trait::async_trait;
use telemetry::metrics::Recorder;

/// Token counts accrued by one dispatch, handed to the recorder after
/// completion (non-stream) or at stream end (spec.md §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RecordedUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Records completed dispatch usage against an account (spec.md §6).
#[async_trait]
pub(crate) trait UsageRecorder: Send + Sync {
    async fn record(&self, account_id: &str, usage: RecordedUsage);
}

/// Records usage as `gen_ai.client.token.usage` histogram observations
/// (spec.md §9 ambient stack, following the metrics the teacher already
/// emits per chat completion).
pub(crate) struct TelemetryUsageRecorder;

#[async_trait]
impl UsageRecorder for TelemetryUsageRecorder {
    async fn record(&self, account_id: &str, usage: RecordedUsage) {
        let mut recorder = Recorder::new();
        recorder.push_attribute("gen_ai.provider.name", "openai");
        recorder.push_attribute("server.address", account_id.to_string());
        recorder.record_tokens(usage.input_tokens, usage.output_tokens);
        // `recorder` emits on drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_does_not_panic() {
        let recorder = TelemetryUsageRecorder;
        recorder
            .record(
                "acct_1",
                RecordedUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            )
            .await;
    }
}
