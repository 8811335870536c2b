use context::ApiKeyContext;
use fastrace::{Span, collector::SpanContext};

/// Per-request context threaded from the server's auth layer into the
/// dispatch pipeline: who is calling, and the trace context the HTTP
/// tracing layer established for this request, if sampled.
#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub api_key: ApiKeyContext,
    pub span_context: Option<SpanContext>,
}

impl RequestContext {
    /// A child span rooted in this request's trace, or a no-op span if the
    /// request wasn't sampled (spec.md §9 ambient tracing).
    pub fn new_span(&self, name: &'static str) -> Span {
        telemetry::tracing::create_child_span(name, self.span_context)
    }
}
