//! Bidirectional Anthropic Messages ⇄ OpenAI chat-completions dispatch
//! (spec.md overview). Exposes a single axum router mounted by the `server`
//! crate; everything else here is `pub(crate)` so the wire types, transforms
//! and dispatch machinery stay an implementation detail of this router.

mod account_selector;
mod dispatch;
mod error;
mod messages;
mod request;
mod stream;
mod transform;
mod upstream_client;
mod usage;

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::post,
};
use axum_serde::Sonic;
use context::ApiKeyContext;
use fastrace::collector::SpanContext;
use futures::StreamExt;
use rate_limit::RateLimitTracker;

use crate::{
    account_selector::ConfiguredAccountSelector, dispatch::DispatchPipeline, error::DispatchError,
    messages::anthropic, request::RequestContext, upstream_client::UpstreamClient, usage::TelemetryUsageRecorder,
};

/// Builds the `/v1/messages` router (spec.md §6 HTTP surface). Returns an
/// empty router when `[llm] enabled = false`.
///
/// The server's auth layer is expected to insert an `Extension<ApiKeyContext>`
/// for every request that reaches this router; the tracing layer may insert
/// an `Extension<SpanContext>` for sampled requests.
pub async fn router(config: &config::Config) -> anyhow::Result<Router> {
    if !config.llm.enabled {
        return Ok(Router::new());
    }

    let rate_limits = Arc::new(RateLimitTracker::new());
    let account_selector = Arc::new(ConfiguredAccountSelector::new(
        config.llm.accounts.clone(),
        rate_limits.clone(),
    ));
    let usage_recorder = Arc::new(TelemetryUsageRecorder);
    let upstream = UpstreamClient::new(Duration::from_secs(config.llm.request_timeout_secs))?;
    let pipeline = Arc::new(DispatchPipeline::new(account_selector, usage_recorder, rate_limits, upstream));

    Ok(Router::new().route(&config.llm.path, post(messages)).with_state(pipeline))
}

/// Handles `POST /v1/messages`, branching on `stream` (spec.md §4.4 step 5).
async fn messages(
    State(pipeline): State<Arc<DispatchPipeline>>,
    Extension(api_key): Extension<ApiKeyContext>,
    span_context: Option<Extension<SpanContext>>,
    Sonic(request): Sonic<anthropic::AnthropicRequest>,
) -> Result<Response, DispatchError> {
    let ctx = RequestContext {
        api_key,
        span_context: span_context.map(|Extension(span)| span),
    };

    if request.stream.unwrap_or(false) {
        let stream = pipeline.dispatch_stream(&ctx, request).await?;

        let event_stream = stream.map(|event| {
            let name = event.event_name();
            let data = sonic_rs::to_string(&event).unwrap_or_else(|e| {
                log::error!("failed to serialize stream event: {e}");
                r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
            });

            Ok::<_, Infallible>(Event::default().event(name).data(data))
        });

        // spec.md §4.4 step 5: text/event-stream, no-cache, keep-alive,
        // proxy buffering disabled. No `[DONE]` sentinel downstream — that's
        // an upstream-only convention (spec.md §4.5).
        let mut response = Sse::new(event_stream).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        Ok(response)
    } else {
        let response = pipeline.dispatch(&ctx, request).await?;
        Ok(Json(response).into_response())
    }
}
