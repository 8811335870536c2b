//! Wires the permission/model gates, account selection, and non-stream and
//! streaming dispatch paths together (spec.md §4.4).

mod rate_limit_detection;

use std::{collections::VecDeque, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use fastrace::{future::FutureExt as _, prelude::LocalSpan};
use fastrace_futures::StreamExt as FastraceStreamExt;
use futures::{Stream, StreamExt};
use rate_limit::{RateLimitKind, RateLimitTracker};

use crate::{
    account_selector::{AccountSelector, SelectedAccount},
    error::DispatchError,
    messages::{anthropic, openai},
    request::RequestContext,
    stream::{
        reframer::{Frame, Reframer},
        state::StreamState,
        translator,
    },
    transform,
    upstream_client::UpstreamClient,
    usage::{RecordedUsage, UsageRecorder},
};

/// Coordinates a single `/v1/messages` request end to end (spec.md §4.4).
pub(crate) struct DispatchPipeline {
    account_selector: Arc<dyn AccountSelector>,
    usage_recorder: Arc<dyn UsageRecorder>,
    rate_limits: Arc<RateLimitTracker>,
    upstream: UpstreamClient,
}

impl DispatchPipeline {
    pub fn new(
        account_selector: Arc<dyn AccountSelector>,
        usage_recorder: Arc<dyn UsageRecorder>,
        rate_limits: Arc<RateLimitTracker>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            account_selector,
            usage_recorder,
            rate_limits,
            upstream,
        }
    }

    /// Non-streaming dispatch (spec.md §4.4 step 5, non-stream branch).
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        request: anthropic::AnthropicRequest,
    ) -> Result<anthropic::AnthropicResponse, DispatchError> {
        self.permission_and_model_gate(ctx, &request.model)?;

        let model = request.model.clone();
        let span = ctx.new_span("llm:dispatch");
        span.add_property(|| ("gen_ai.request.model", model.clone()));

        let fut = async move {
            let openai_request = transform::request::transform(request);
            let body = sonic_rs::to_vec(&openai_request).map_err(|_| DispatchError::ParseError)?;

            let account = self.select_account(ctx, &ctx.api_key.key_id, &model).await?;
            let response = self.upstream.send(&account, body).await?;

            if response.status.as_u16() >= 400 {
                let body_text = String::from_utf8_lossy(&response.body).into_owned();

                if response.status.as_u16() == 429 {
                    let resets_in = rate_limit_detection::resets_in(&body_text);
                    self.rate_limits.mark_rate_limited(
                        &account.account_id,
                        RateLimitKind::Requests,
                        &ctx.api_key.key_id,
                        resets_in,
                    );
                }

                let error = DispatchError::UpstreamStatus {
                    status: response.status.as_u16(),
                    body: body_text,
                };
                LocalSpan::add_property(|| ("error", "true"));
                LocalSpan::add_property(|| ("error.type", error.error_type().to_string()));
                return Err(error);
            }

            let parsed: openai::ChatCompletionResponse =
                sonic_rs::from_slice(&response.body).map_err(|_| DispatchError::ParseError)?;
            let anthropic_response = transform::response::transform(parsed, &model)?;

            self.clear_rate_limit(&account.account_id);
            self.usage_recorder
                .record(
                    &account.account_id,
                    RecordedUsage {
                        input_tokens: anthropic_response.usage.input_tokens,
                        output_tokens: anthropic_response.usage.output_tokens,
                    },
                )
                .await;

            LocalSpan::add_property(|| ("gen_ai.usage.input_tokens", anthropic_response.usage.input_tokens.to_string()));
            LocalSpan::add_property(|| ("gen_ai.usage.output_tokens", anthropic_response.usage.output_tokens.to_string()));

            Ok(anthropic_response)
        };

        fut.in_span(span).await
    }

    /// Streaming dispatch (spec.md §4.4 step 5, stream branch; §4.5 reframer
    /// loop). The outer `Result` covers everything that can fail before any
    /// commitment is made to an SSE response; once the upstream stream is
    /// open, failures end the item stream silently (spec.md §7
    /// `stream_mid_error`: connection ends, no event, no status change).
    pub async fn dispatch_stream(
        &self,
        ctx: &RequestContext,
        request: anthropic::AnthropicRequest,
    ) -> Result<impl Stream<Item = anthropic::StreamEvent> + use<>, DispatchError> {
        self.permission_and_model_gate(ctx, &request.model)?;

        let model = request.model.clone();
        let span = ctx.new_span("llm:dispatch_stream");
        span.add_property(|| ("gen_ai.request.model", model.clone()));
        span.add_property(|| ("llm.stream", "true"));

        let mut openai_request = transform::request::transform(request);
        openai_request.stream = true;
        let body = sonic_rs::to_vec(&openai_request).map_err(|_| DispatchError::ParseError)?;

        let account = self.select_account(ctx, &ctx.api_key.key_id, &model).await?;
        let session_id = format!("msg_{}", uuid::Uuid::new_v4().simple());

        let byte_stream = match self.upstream.send_stream(&account, body).await {
            Ok(stream) => Some(Box::pin(stream) as Pin<Box<dyn Stream<Item = Result<Bytes, DispatchError>> + Send>>),
            Err(DispatchError::UpstreamStatus { status, body }) => {
                if status == 429 {
                    let resets_in = rate_limit_detection::resets_in(&body);
                    self.rate_limits
                        .mark_rate_limited(&account.account_id, RateLimitKind::Requests, &ctx.api_key.key_id, resets_in);
                }
                log::warn!("upstream stream failed to open for account {}: status {status}", account.account_id);
                span.add_property(|| ("error", "true"));
                span.add_property(|| ("error.type", if status == 429 { "rate_limit_error" } else { "api_error" }));
                None
            }
            Err(e) => {
                log::warn!("upstream stream failed to open for account {}: {e}", account.account_id);
                span.add_property(|| ("error", "true"));
                span.add_property(|| ("error.type", e.error_type().to_string()));
                None
            }
        };

        let state = StreamDispatchState {
            byte_stream,
            reframer: Reframer::new(),
            translator_state: StreamState::new(session_id, model),
            pending: VecDeque::new(),
            message_stop_sent: false,
            account_id: account.account_id,
            usage_recorder: self.usage_recorder.clone(),
            rate_limits: self.rate_limits.clone(),
        };

        Ok(futures::stream::unfold(state, poll_stream_state).in_span(span))
    }

    fn permission_and_model_gate(&self, ctx: &RequestContext, model: &str) -> Result<(), DispatchError> {
        if !ctx.api_key.has_openai_permission() {
            return Err(DispatchError::PermissionDenied);
        }
        if !ctx.api_key.allows_model(model) {
            return Err(DispatchError::ModelRestricted);
        }
        Ok(())
    }

    /// Account selection with the refetch-once-by-id fallback (spec.md §4.4 step 4):
    /// a selection whose credentials come back redacted is re-resolved by the
    /// account id it did return, once, before giving up with a 503.
    async fn select_account(
        &self,
        ctx: &RequestContext,
        session_hint: &str,
        model: &str,
    ) -> Result<SelectedAccount, DispatchError> {
        let account = self.account_selector.select(&ctx.api_key.key_id, session_hint, model).await?;

        if credentials_present(&account) {
            return Ok(account);
        }

        let refetched = self.account_selector.get_by_id(&account.account_id).await?;
        if credentials_present(&refetched) {
            Ok(refetched)
        } else {
            Err(DispatchError::MisconfiguredAccount)
        }
    }

    fn clear_rate_limit(&self, account_id: &str) {
        if self.rate_limits.is_rate_limited(account_id) {
            self.rate_limits.remove_rate_limit(account_id, RateLimitKind::Requests);
            self.rate_limits.remove_rate_limit(account_id, RateLimitKind::Tokens);
        }
    }
}

/// A redacted `SelectedAccount` carries an empty API key; the account id is
/// still meaningful and is what the refetch-by-id fallback keys off.
fn credentials_present(account: &SelectedAccount) -> bool {
    !secrecy::ExposeSecret::expose_secret(&account.api_key).is_empty()
}

struct StreamDispatchState {
    byte_stream: Option<Pin<Box<dyn Stream<Item = Result<Bytes, DispatchError>> + Send>>>,
    reframer: Reframer,
    translator_state: StreamState,
    pending: VecDeque<anthropic::StreamEvent>,
    message_stop_sent: bool,
    account_id: String,
    usage_recorder: Arc<dyn UsageRecorder>,
    rate_limits: Arc<RateLimitTracker>,
}

async fn poll_stream_state(mut state: StreamDispatchState) -> Option<(anthropic::StreamEvent, StreamDispatchState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((event, state));
        }

        let Some(byte_stream) = state.byte_stream.as_mut() else {
            finish_session(&mut state);
            return None;
        };

        match byte_stream.next().await {
            Some(Ok(chunk)) => {
                let text = String::from_utf8_lossy(&chunk).into_owned();
                for frame in state.reframer.push(&text) {
                    match frame {
                        Frame::Data(data) => {
                            if let Some((input, output)) = crate::stream::reframer::sniff_usage(&data) {
                                state.translator_state.update_usage(input, output);
                            }
                            if let Ok(chunk) = sonic_rs::from_str::<openai::ChatCompletionChunk>(&data) {
                                let events = translator::translate(&mut state.translator_state, chunk);
                                state.pending.extend(events);
                            }
                        }
                        Frame::Done => {
                            if !state.message_stop_sent {
                                state.pending.push_back(anthropic::StreamEvent::MessageStop);
                                state.message_stop_sent = true;
                            }
                            state.byte_stream = None;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                log::warn!("upstream stream error mid-session: {e}");
                // spec.md §7 stream_mid_error: end the connection, no event, no message_stop.
                state.byte_stream = None;
                return None;
            }
            None => {
                if !state.message_stop_sent {
                    state.pending.push_back(anthropic::StreamEvent::MessageStop);
                    state.message_stop_sent = true;
                }
                state.byte_stream = None;
            }
        }
    }
}

/// Fire-and-forget usage recording and rate-limit clearing once a session
/// completes normally (spec.md §5: must not block emission of events).
fn finish_session(state: &mut StreamDispatchState) {
    let usage_recorder = state.usage_recorder.clone();
    let rate_limits = state.rate_limits.clone();
    let account_id = state.account_id.clone();
    let usage = RecordedUsage {
        input_tokens: state.translator_state.input_tokens,
        output_tokens: state.translator_state.output_tokens,
    };

    tokio::spawn(async move {
        usage_recorder.record(&account_id, usage).await;
        if rate_limits.is_rate_limited(&account_id) {
            rate_limits.remove_rate_limit(&account_id, RateLimitKind::Requests);
            rate_limits.remove_rate_limit(&account_id, RateLimitKind::Tokens);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account_selector::AccountSelector, usage::TelemetryUsageRecorder};
    use async_trait::async_trait;
    use context::ApiKeyContext;

    struct StaticSelector(Result<SelectedAccount, DispatchError>);

    #[async_trait]
    impl AccountSelector for StaticSelector {
        async fn select(&self, _api_key: &str, _session_hint: &str, _model: &str) -> Result<SelectedAccount, DispatchError> {
            self.0.clone()
        }

        async fn get_by_id(&self, _account_id: &str) -> Result<SelectedAccount, DispatchError> {
            self.0.clone()
        }
    }

    impl Clone for DispatchError {
        fn clone(&self) -> Self {
            match self {
                DispatchError::PermissionDenied => DispatchError::PermissionDenied,
                DispatchError::ModelRestricted => DispatchError::ModelRestricted,
                DispatchError::NoAccount => DispatchError::NoAccount,
                DispatchError::MisconfiguredAccount => DispatchError::MisconfiguredAccount,
                DispatchError::UpstreamStatus { status, body } => DispatchError::UpstreamStatus {
                    status: *status,
                    body: body.clone(),
                },
                DispatchError::ParseError => DispatchError::ParseError,
                DispatchError::TransportError(message) => DispatchError::TransportError(message.clone()),
            }
        }
    }

    fn ctx(permissions: Vec<config::Permission>, model_restrictions: Vec<String>) -> RequestContext {
        RequestContext {
            api_key: ApiKeyContext {
                key_id: "key_1".to_string(),
                permissions,
                model_restrictions,
            },
            span_context: None,
        }
    }

    fn request(model: &str) -> anthropic::AnthropicRequest {
        anthropic::AnthropicRequest {
            model: model.to_string(),
            messages: vec![],
            system: None,
            max_tokens: Some(10),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            metadata: None,
        }
    }

    fn pipeline(selector_result: Result<SelectedAccount, DispatchError>) -> DispatchPipeline {
        DispatchPipeline::new(
            Arc::new(StaticSelector(selector_result)),
            Arc::new(TelemetryUsageRecorder),
            Arc::new(RateLimitTracker::new()),
            UpstreamClient::new(Duration::from_secs(600)).unwrap(),
        )
    }

    #[tokio::test]
    async fn permission_gate_rejects_key_without_openai_permission() {
        let pipeline = pipeline(Err(DispatchError::NoAccount));
        let ctx = ctx(vec![], vec![]);
        let result = pipeline.dispatch(&ctx, request("gpt-4o")).await;
        assert!(matches!(result, Err(DispatchError::PermissionDenied)));
    }

    #[tokio::test]
    async fn model_restriction_gate_rejects_unlisted_model() {
        let pipeline = pipeline(Err(DispatchError::NoAccount));
        let ctx = ctx(vec![config::Permission::Openai], vec!["gpt-4o".to_string()]);
        let result = pipeline.dispatch(&ctx, request("gpt-4o-mini")).await;
        assert!(matches!(result, Err(DispatchError::ModelRestricted)));
    }

    #[tokio::test]
    async fn no_account_available_surfaces_as_no_account_error() {
        let pipeline = pipeline(Err(DispatchError::NoAccount));
        let ctx = ctx(vec![config::Permission::All], vec![]);
        let result = pipeline.dispatch(&ctx, request("gpt-4o")).await;
        assert!(matches!(result, Err(DispatchError::NoAccount)));
    }

    #[tokio::test]
    async fn misconfigured_account_surfaces_when_refetch_still_lacks_credentials() {
        let redacted = SelectedAccount {
            account_id: "acct_1".to_string(),
            api_key: secrecy::SecretString::from(""),
            base_api: "https://api.example.com/v1".parse().unwrap(),
            user_agent: None,
            proxy: None,
        };
        let pipeline = pipeline(Ok(redacted));
        let ctx = ctx(vec![config::Permission::All], vec![]);
        let result = pipeline.dispatch(&ctx, request("gpt-4o")).await;
        assert!(matches!(result, Err(DispatchError::MisconfiguredAccount)));
    }
}
